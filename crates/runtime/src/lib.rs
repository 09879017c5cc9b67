//! Iteration runtime: the patch session, the planner and reflection drivers,
//! and the top-level controller that sequences one plan→build→merge cycle.

pub mod controller;
pub mod logbook;
pub mod planner;
pub mod prompts;
pub mod reflect;
pub mod session;
pub mod snapshot;

pub use controller::Controller;
pub use logbook::IterationLogger;
pub use planner::{PlanOutcome, PlannerInputs, run_planner};
pub use reflect::{run_reflection, transcript_digest};
pub use session::{PatchSession, Plan};

use seedling_ci::CiError;
use seedling_llm::LlmError;
use seedling_memory::MemoryError;
use seedling_scm::ScmError;
use seedling_store::StoreError;

/// Everything that can end an iteration early.
#[derive(Debug, thiserror::Error)]
pub enum IterationError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scm(#[from] ScmError),
    #[error(transparent)]
    Ci(#[from] CiError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("planner did not submit a plan")]
    NoPlan,
    #[error("fix attempts exhausted")]
    FixExhausted,
}

impl IterationError {
    /// Cancellation unwinds the iteration instead of being recorded as an
    /// outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            IterationError::Llm(LlmError::Cancelled)
                | IterationError::Ci(CiError::Cancelled)
                | IterationError::Memory(MemoryError::Llm(LlmError::Cancelled))
        )
    }

    /// Fatal errors abort the whole run (nonzero exit) rather than rolling
    /// into the next iteration: a dead store or a broken workspace cannot be
    /// planned around.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IterationError::Store(_)
                | IterationError::Memory(MemoryError::Store(_))
                | IterationError::Llm(LlmError::Store(_))
                | IterationError::Scm(ScmError::Setup(_))
        )
    }
}

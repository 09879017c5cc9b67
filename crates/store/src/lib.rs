//! Durable record store for the agent: every LLM exchange, memory item, and
//! iteration log lands here, with the secondary indexes the rest of the
//! system queries (recency, iteration id, pin state, full text).

pub mod schema;
pub mod store;
pub mod text;

pub use schema::{
    GeneratedRecord, IdeaStatus, IterationLog, LogEntry, LogLevel, MemoryItem, Phase, PhaseUsage,
};
pub use store::{Metric, RecordStore, Result, ScoredMemory, StoreError};

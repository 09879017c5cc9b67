//! The patch session: a stateful builder/fixer dialog bound to one plan.
//!
//! Each assistant turn may request tools; the session executes them, feeds
//! the results back, and re-invokes the gateway until the model replies
//! without tool calls.  Tool failures come back as `is_error` tool results so
//! the model can recover inside the same dialog; they never abort it.

use std::sync::Arc;

use tracing::{debug, info, warn};

use seedling_ci::truncate_chars;
use seedling_llm::{
    ContentBlock, LlmClient, Message, PromptLayers, layer_system_prompt,
};
use seedling_scm::{EditOperation, Workspace};
use seedling_store::Phase;
use seedling_tools::{ToolRegistry, edit_tools};

use crate::IterationError;
use crate::prompts;

/// The immutable result of planning: title seeds the branch name, the
/// description becomes the PR body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub title: String,
    pub description: String,
}

/// Character cap applied to a CI failure report before it enters the fixer
/// prompt.
const CI_ERROR_CHAR_CAP: usize = 4_000;

pub struct PatchSession {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    workspace: Arc<Workspace>,
    plan: Plan,
    memory_context: String,
    /// Codebase snapshot reused as the cached stable block of every call.
    snapshot: String,
    transcript: Vec<Message>,
    attempts: u32,
    max_fix_attempts: u32,
    max_tool_rounds: u32,
}

impl PatchSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        workspace: Arc<Workspace>,
        plan: Plan,
        memory_context: String,
        snapshot: String,
        max_fix_attempts: u32,
        max_tool_rounds: u32,
    ) -> Self {
        Self {
            llm,
            registry,
            workspace,
            plan,
            memory_context,
            snapshot,
            transcript: Vec::new(),
            attempts: 0,
            max_fix_attempts,
            max_tool_rounds,
        }
    }

    /// True once the fix budget is spent.
    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_fix_attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Read-only copy of the full builder/fixer transcript.
    pub fn conversation(&self) -> Vec<Message> {
        self.transcript.clone()
    }

    /// Drive the builder dialog and return the edit operations it applied.
    pub async fn create_patch(&mut self) -> Result<Vec<EditOperation>, IterationError> {
        self.transcript.push(Message::user(prompts::builder_kickoff(
            &self.plan.title,
            &self.plan.description,
            &self.memory_context,
        )));
        self.run_dialog(Phase::Builder, prompts::BUILDER_PREFIX).await
    }

    /// Drive one fixer round against a CI failure report.
    pub async fn fix_patch(&mut self, ci_error: &str) -> Result<Vec<EditOperation>, IterationError> {
        if self.exhausted() {
            return Err(IterationError::FixExhausted);
        }
        self.attempts += 1;
        info!(attempt = self.attempts, "starting fix round");

        let diff = match self.workspace.diff_vs_main().await {
            Ok(diff) => diff,
            Err(err) => {
                warn!(%err, "diff unavailable for fixer prompt");
                String::new()
            }
        };
        self.transcript.push(Message::user(prompts::fixer_kickoff(
            &truncate_chars(ci_error, CI_ERROR_CHAR_CAP),
            &diff,
        )));
        self.run_dialog(Phase::Fixer, prompts::FIXER_PREFIX).await
    }

    /// The tool loop shared by builder and fixer: send, execute tool calls,
    /// append results, repeat until the model stops asking for tools or the
    /// round cap trips.
    async fn run_dialog(
        &mut self,
        phase: Phase,
        prefix: &str,
    ) -> Result<Vec<EditOperation>, IterationError> {
        let mut operations: Vec<EditOperation> = Vec::new();
        let definitions = self.registry.definitions();

        for round in 0..self.max_tool_rounds {
            let system = layer_system_prompt(&PromptLayers {
                prefix: prefix.to_string(),
                snapshot: Some(self.snapshot.clone()),
                ..Default::default()
            });
            let reply = self
                .llm
                .complete(phase, system, &self.transcript, Some(definitions.as_slice()))
                .await?;

            let calls: Vec<(String, String, serde_json::Value)> = reply
                .message
                .tool_uses()
                .into_iter()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();
            self.transcript.push(reply.message);

            if calls.is_empty() {
                debug!(round, phase = %phase, "dialog ended without tool calls");
                return Ok(operations);
            }

            let mut results: Vec<ContentBlock> = Vec::new();
            for (id, name, input) in calls {
                match self.registry.dispatch(&name, &input).await {
                    Ok(output) => {
                        if output.success {
                            if let Some(op) = edit_tools::operation_for_call(&name, &input) {
                                operations.push(op);
                            }
                        }
                        results.push(ContentBlock::tool_result(
                            id,
                            output.output,
                            !output.success,
                        ));
                    }
                    Err(err) => {
                        results.push(ContentBlock::tool_result(id, err.to_string(), true));
                    }
                }
            }
            self.transcript.push(Message::tool_results(results));
        }

        warn!(phase = %phase, cap = self.max_tool_rounds, "dialog hit the tool-round cap");
        Ok(operations)
    }
}

// ── tests ─────────────────────────────────────────────────────────────────────

//! The planner driver: a tool dialog that ends with a `submit_plan` call.

use std::sync::Arc;

use tracing::{debug, info};

use seedling_llm::{ContentBlock, LlmClient, Message, PromptLayers, layer_system_prompt};
use seedling_store::Phase;
use seedling_tools::{SUBMIT_PLAN, ToolRegistry};

use crate::IterationError;
use crate::prompts;
use crate::session::Plan;

/// Inputs for the planner's dynamic system blocks, in presentation order.
#[derive(Debug, Clone, Default)]
pub struct PlannerInputs {
    pub snapshot: String,
    pub coverage: Option<String>,
    pub git_log: String,
    pub memory_context: String,
    pub dead_functions: Vec<String>,
}

/// The plan plus the dialog that produced it (kept for reflection).
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub plan: Plan,
    pub transcript: Vec<Message>,
}

fn planner_layers(inputs: &PlannerInputs) -> PromptLayers {
    let coverage = inputs
        .coverage
        .clone()
        .map(|c| format!("Latest CI coverage on main:\n{c}"))
        .unwrap_or_default();
    let dead = if inputs.dead_functions.is_empty() {
        String::new()
    } else {
        format!(
            "Possibly dead functions (defined but never referenced):\n{}",
            inputs.dead_functions.join("\n")
        )
    };
    PromptLayers {
        prefix: prompts::PLANNER_PREFIX.to_string(),
        snapshot: Some(inputs.snapshot.clone()),
        dynamic: vec![
            coverage,
            format!("Recent commits:\n{}", inputs.git_log),
            inputs.memory_context.clone(),
            dead,
        ],
        working: None,
    }
}

/// Run the planner dialog until the model submits a plan.
///
/// Non-terminal tool calls are executed normally.  A dialog that ends
/// without `submit_plan` gets one nudge; if the model still will not commit
/// to a plan the iteration aborts with [`IterationError::NoPlan`].
pub async fn run_planner(
    llm: &Arc<dyn LlmClient>,
    registry: &ToolRegistry,
    inputs: &PlannerInputs,
    max_tool_rounds: u32,
) -> Result<PlanOutcome, IterationError> {
    let layers = planner_layers(inputs);
    let definitions = registry.definitions();
    let mut transcript = vec![Message::user(prompts::PLANNER_KICKOFF)];
    let mut nudged = false;

    for round in 0..max_tool_rounds {
        let system = layer_system_prompt(&layers);
        let reply = llm
            .complete(Phase::Planner, system, &transcript, Some(definitions.as_slice()))
            .await?;

        let calls: Vec<(String, String, serde_json::Value)> = reply
            .message
            .tool_uses()
            .into_iter()
            .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
            .collect();
        transcript.push(reply.message);

        if calls.is_empty() {
            if nudged {
                break;
            }
            debug!(round, "planner stopped without submitting; nudging once");
            nudged = true;
            transcript.push(Message::user(prompts::PLANNER_NUDGE));
            continue;
        }

        let mut results: Vec<ContentBlock> = Vec::new();
        let mut submitted: Option<Plan> = None;
        for (id, name, input) in calls {
            match registry.dispatch(&name, &input).await {
                Ok(output) => {
                    if name == SUBMIT_PLAN && output.success {
                        let title = input
                            .get("title")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .trim()
                            .to_string();
                        let description = input
                            .get("description")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .trim()
                            .to_string();
                        if !title.is_empty() && !description.is_empty() {
                            submitted = Some(Plan { title, description });
                        }
                    }
                    results.push(ContentBlock::tool_result(id, output.output, !output.success));
                }
                Err(err) => {
                    results.push(ContentBlock::tool_result(id, err.to_string(), true));
                }
            }
        }
        transcript.push(Message::tool_results(results));

        if let Some(plan) = submitted {
            info!(title = %plan.title, "planner submitted a plan");
            return Ok(PlanOutcome { plan, transcript });
        }
    }

    Err(IterationError::NoPlan)
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use seedling_llm::{LlmReply, Role, SystemBlock, TokenUsage, ToolDefinition};
    use seedling_memory::MemoryService;
    use seedling_store::RecordStore;
    use seedling_tools::HeuristicLinter;

    use super::*;

    struct ScriptedLlm {
        replies: Mutex<VecDeque<Message>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(
            &self,
            phase: Phase,
            system: Vec<SystemBlock>,
            _messages: &[Message],
            extra_tools: Option<&[ToolDefinition]>,
        ) -> seedling_llm::Result<LlmReply> {
            if phase == Phase::Planner {
                // Planner calls must carry the tool set and a single cache
                // marker on the snapshot block.
                assert!(extra_tools.is_some_and(|t| t.iter().any(|d| d.name == "submit_plan")));
                let marked = system.iter().filter(|b| b.cache_control.is_some()).count();
                assert_eq!(marked, 1);
            }
            let message = if phase == Phase::Memory {
                Message::assistant("summary")
            } else {
                self.replies
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Message::assistant("no more script"))
            };
            Ok(LlmReply {
                message,
                stop_reason: Some("end_turn".to_string()),
                usage: TokenUsage::default(),
                model: "scripted".to_string(),
            })
        }
    }

    fn fixture(
        replies: Vec<Message>,
    ) -> (tempfile::TempDir, tempfile::TempDir, Arc<dyn LlmClient>, ToolRegistry) {
        let work = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::open(store_dir.path().join("s.redb")).unwrap());
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm {
            replies: Mutex::new(replies.into()),
        });
        let memory = Arc::new(MemoryService::new(store.clone(), llm.clone(), 1_000));
        let registry = seedling_tools::planner_registry(
            work.path().to_path_buf(),
            memory,
            store,
            Arc::new(HeuristicLinter),
        );
        (work, store_dir, llm, registry)
    }

    fn submit(title: &str, description: &str) -> Message {
        Message {
            role: Role::Assistant,
            content: vec![ContentBlock::ToolUse {
                id: "tu_plan".to_string(),
                name: SUBMIT_PLAN.to_string(),
                input: serde_json::json!({"title": title, "description": description}),
            }],
        }
    }

    #[tokio::test]
    async fn planner_extracts_plan_from_submit_call() {
        let (_work, _store, llm, registry) =
            fixture(vec![submit("Add greet", "Adds a greet module.")]);
        let outcome = run_planner(&llm, &registry, &PlannerInputs::default(), 8)
            .await
            .unwrap();
        assert_eq!(outcome.plan.title, "Add greet");
        assert_eq!(outcome.plan.description, "Adds a greet module.");
        // kickoff, assistant, tool results
        assert_eq!(outcome.transcript.len(), 3);
    }

    #[tokio::test]
    async fn planner_is_nudged_once_then_fails() {
        let (_work, _store, llm, registry) = fixture(vec![
            Message::assistant("thinking out loud"),
            Message::assistant("still no plan"),
        ]);
        let err = run_planner(&llm, &registry, &PlannerInputs::default(), 8)
            .await
            .unwrap_err();
        assert!(matches!(err, IterationError::NoPlan));
    }

    #[tokio::test]
    async fn planner_can_use_tools_before_submitting() {
        let investigate = Message {
            role: Role::Assistant,
            content: vec![ContentBlock::ToolUse {
                id: "tu_hist".to_string(),
                name: "query_iteration_history".to_string(),
                input: serde_json::json!({}),
            }],
        };
        let (_work, _store, llm, registry) = fixture(vec![
            investigate,
            submit("Tidy docs", "Clean up the README."),
        ]);
        let outcome = run_planner(&llm, &registry, &PlannerInputs::default(), 8)
            .await
            .unwrap();
        assert_eq!(outcome.plan.title, "Tidy docs");
        // kickoff, assistant, results, assistant, results
        assert_eq!(outcome.transcript.len(), 5);
    }

    #[test]
    fn planner_dynamic_blocks_are_ordered() {
        let inputs = PlannerInputs {
            snapshot: "code".to_string(),
            coverage: Some("81%".to_string()),
            git_log: "abc initial".to_string(),
            memory_context: "## Past\n- x".to_string(),
            dead_functions: vec!["orphan (src/lib.rs)".to_string()],
        };
        let layers = planner_layers(&inputs);
        assert_eq!(layers.dynamic.len(), 4);
        assert!(layers.dynamic[0].contains("coverage"));
        assert!(layers.dynamic[1].contains("Recent commits"));
        assert!(layers.dynamic[2].contains("## Past"));
        assert!(layers.dynamic[3].contains("orphan"));
    }
}

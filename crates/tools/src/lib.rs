//! Tool registry and handlers for the builder/planner dialogs.
//!
//! The model asks for tools by string name; the registry maps
//! `name → {schema, handler}`, is built once at startup, and rejects unknown
//! names before dispatch.  Handler failures become `is_error` tool results —
//! never exceptions — so the model can recover within the same session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use seedling_llm::ToolDefinition;
use seedling_memory::MemoryService;
use seedling_scm::Workspace;
use seedling_store::RecordStore;

pub mod edit_tools;
pub mod fs_tools;
pub mod memory_tools;
pub mod planner_tools;

pub use planner_tools::{HeuristicLinter, QualityLinter, SUBMIT_PLAN};

// ── trait and registry ────────────────────────────────────────────────────────

/// The result returned after a tool runs.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

impl ToolOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn err(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Unknown tool name or arguments that do not match the schema.
    #[error("invalid tool usage: {0}")]
    Usage(String),
}

/// Trait implemented by every tool handler.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn run(&self, input: &serde_json::Value) -> Result<ToolOutput, ToolError>;
}

/// Central registry, built once at startup.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.definition().name;
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    /// Tool definitions in registration order, for the LLM request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    /// Dispatch one call.  Unknown names are rejected before any handler
    /// runs.
    pub async fn dispatch(
        &self,
        name: &str,
        input: &serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Usage(format!("unknown tool: {name}")))?;
        tool.run(input).await
    }
}

// ── argument helpers ──────────────────────────────────────────────────────────

pub(crate) fn require_str<'a>(
    input: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::Usage(format!("missing required argument: {key}")))
}

pub(crate) fn optional_str<'a>(input: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(|v| v.as_str())
}

pub(crate) fn optional_u64(input: &serde_json::Value, key: &str) -> Option<u64> {
    input.get(key).and_then(|v| v.as_u64())
}

// ── stock registries ──────────────────────────────────────────────────────────

/// Read + edit + memory tools for the builder/fixer dialogs.
pub fn builder_registry(
    workspace_root: PathBuf,
    workspace: Arc<Workspace>,
    memory: Arc<MemoryService>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    register_read_tools(&mut registry, workspace_root);
    registry.register(Box::new(edit_tools::EditFileTool {
        workspace: workspace.clone(),
    }));
    registry.register(Box::new(edit_tools::CreateFileTool {
        workspace: workspace.clone(),
    }));
    registry.register(Box::new(edit_tools::DeleteFileTool {
        workspace: workspace.clone(),
    }));
    registry.register(Box::new(edit_tools::GitDiffTool { workspace }));
    register_memory_tools(&mut registry, memory);
    registry
}

/// Read + memory + introspective tools plus the terminal `submit_plan` for
/// the planner dialog.
pub fn planner_registry(
    workspace_root: PathBuf,
    memory: Arc<MemoryService>,
    store: Arc<RecordStore>,
    linter: Arc<dyn QualityLinter>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    register_read_tools(&mut registry, workspace_root.clone());
    register_memory_tools(&mut registry, memory);
    registry.register(Box::new(planner_tools::QueryIterationHistoryTool {
        store: store.clone(),
    }));
    registry.register(Box::new(planner_tools::QueryPerformanceMetricsTool { store }));
    registry.register(Box::new(planner_tools::CodeQualityTool {
        workspace_root,
        linter,
    }));
    registry.register(Box::new(planner_tools::SubmitPlanTool));
    registry
}

fn register_read_tools(registry: &mut ToolRegistry, root: PathBuf) {
    registry.register(Box::new(fs_tools::ReadFileTool { root: root.clone() }));
    registry.register(Box::new(fs_tools::GrepSearchTool { root: root.clone() }));
    registry.register(Box::new(fs_tools::FileSearchTool { root: root.clone() }));
    registry.register(Box::new(fs_tools::ListDirectoryTool { root }));
}

fn register_memory_tools(registry: &mut ToolRegistry, memory: Arc<MemoryService>) {
    registry.register(Box::new(memory_tools::RecallTool {
        memory: memory.clone(),
    }));
    registry.register(Box::new(memory_tools::RecallByIdTool {
        memory: memory.clone(),
    }));
    registry.register(Box::new(memory_tools::StoreNoteTool {
        memory: memory.clone(),
    }));
    registry.register(Box::new(memory_tools::DismissNoteTool {
        memory: memory.clone(),
    }));
    registry.register(Box::new(memory_tools::StoreIdeaTool {
        memory: memory.clone(),
    }));
    registry.register(Box::new(memory_tools::UpdateIdeaStatusTool { memory }));
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyTool {
        name: String,
    }

    #[async_trait]
    impl Tool for DummyTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.name.clone(),
                description: format!("dummy tool {}", self.name),
                input_schema: serde_json::json!({"type": "object", "properties": {}}),
            }
        }

        async fn run(&self, _input: &serde_json::Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::ok(format!("ran {}", self.name)))
        }
    }

    #[tokio::test]
    async fn dispatch_runs_registered_tool() {
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(DummyTool {
            name: "alpha".to_string(),
        }));
        let out = registry
            .dispatch("alpha", &serde_json::json!({}))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.output, "ran alpha");
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected_before_dispatch() {
        let registry = ToolRegistry::default();
        let err = registry
            .dispatch("nope", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown tool: nope"));
    }

    #[test]
    fn definitions_preserve_registration_order() {
        let mut registry = ToolRegistry::default();
        for name in ["one", "two", "three"] {
            registry.register(Box::new(DummyTool {
                name: name.to_string(),
            }));
        }
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["one", "two", "three"]);
    }

    #[test]
    fn require_str_reports_missing_key() {
        let input = serde_json::json!({"present": "yes"});
        assert_eq!(require_str(&input, "present").unwrap(), "yes");
        let err = require_str(&input, "absent").unwrap_err();
        assert!(err.to_string().contains("absent"));
    }
}

//! Edit tools: structured mutations of the working copy, applied through the
//! source-control adapter so the single-match replace invariant holds.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use seedling_llm::ToolDefinition;
use seedling_scm::{EditOperation, Workspace};

use crate::{Tool, ToolError, ToolOutput, require_str};

/// Build the edit operation a tool call describes, if the call is one of the
/// three edit tools.  The patch session uses this to accumulate the
/// operations it returns.
pub fn operation_for_call(name: &str, input: &serde_json::Value) -> Option<EditOperation> {
    match name {
        "edit_file" => Some(EditOperation::Replace {
            path: input.get("filePath")?.as_str()?.to_string(),
            old_string: input.get("oldString")?.as_str()?.to_string(),
            new_string: input.get("newString")?.as_str()?.to_string(),
        }),
        "create_file" => Some(EditOperation::Create {
            path: input.get("filePath")?.as_str()?.to_string(),
            content: input.get("content")?.as_str()?.to_string(),
        }),
        "delete_file" => Some(EditOperation::Delete {
            path: input.get("filePath")?.as_str()?.to_string(),
        }),
        _ => None,
    }
}

fn apply(workspace: &Workspace, op: EditOperation) -> ToolOutput {
    match workspace.apply_one(&op) {
        Ok(()) => ToolOutput::ok(match &op {
            EditOperation::Replace { path, .. } => format!("Edited {path}."),
            EditOperation::Create { path, .. } => format!("Created {path}."),
            EditOperation::Delete { path } => format!("Deleted {path}."),
        }),
        Err(err) => ToolOutput::err(err.to_string()),
    }
}

// ── edit_file ─────────────────────────────────────────────────────────────────

pub struct EditFileTool {
    pub workspace: Arc<Workspace>,
}

#[async_trait]
impl Tool for EditFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "edit_file".to_string(),
            description: "Replace one occurrence of oldString with newString in a file. \
                          oldString must match exactly once; include enough surrounding \
                          context to make it unique."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "filePath": {"type": "string"},
                    "oldString": {"type": "string"},
                    "newString": {"type": "string"}
                },
                "required": ["filePath", "oldString", "newString"]
            }),
        }
    }

    async fn run(&self, input: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        let op = EditOperation::Replace {
            path: require_str(input, "filePath")?.to_string(),
            old_string: require_str(input, "oldString")?.to_string(),
            new_string: require_str(input, "newString")?.to_string(),
        };
        Ok(apply(&self.workspace, op))
    }
}

// ── create_file ───────────────────────────────────────────────────────────────

pub struct CreateFileTool {
    pub workspace: Arc<Workspace>,
}

#[async_trait]
impl Tool for CreateFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "create_file".to_string(),
            description: "Create a file with the given content, making parent directories."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "filePath": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["filePath", "content"]
            }),
        }
    }

    async fn run(&self, input: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        let op = EditOperation::Create {
            path: require_str(input, "filePath")?.to_string(),
            content: require_str(input, "content")?.to_string(),
        };
        Ok(apply(&self.workspace, op))
    }
}

// ── delete_file ───────────────────────────────────────────────────────────────

pub struct DeleteFileTool {
    pub workspace: Arc<Workspace>,
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "delete_file".to_string(),
            description: "Delete a file from the workspace.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "filePath": {"type": "string"}
                },
                "required": ["filePath"]
            }),
        }
    }

    async fn run(&self, input: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        let op = EditOperation::Delete {
            path: require_str(input, "filePath")?.to_string(),
        };
        Ok(apply(&self.workspace, op))
    }
}

// ── git_diff ──────────────────────────────────────────────────────────────────

pub struct GitDiffTool {
    pub workspace: Arc<Workspace>,
}

#[async_trait]
impl Tool for GitDiffTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "git_diff".to_string(),
            description: "Abbreviated diff of the working tree against main.".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn run(&self, _input: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        match self.workspace.diff_vs_main().await {
            Ok(diff) if diff.is_empty() => Ok(ToolOutput::ok("No changes vs main.")),
            Ok(diff) => Ok(ToolOutput::ok(diff)),
            Err(err) => Ok(ToolOutput::err(err.to_string())),
        }
    }
}

// ── tests ─────────────────────────────────────────────────────────────────────

//! Memory tools: recall, notes, and idea management for the model.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use seedling_llm::ToolDefinition;
use seedling_memory::MemoryService;

use crate::{Tool, ToolError, ToolOutput, optional_str, require_str};

fn from_result(result: seedling_memory::Result<String>) -> ToolOutput {
    match result {
        Ok(text) => ToolOutput::ok(text),
        Err(err) => ToolOutput::err(err.to_string()),
    }
}

// ── recall ────────────────────────────────────────────────────────────────────

pub struct RecallTool {
    pub memory: Arc<MemoryService>,
}

#[async_trait]
impl Tool for RecallTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "recall".to_string(),
            description: "Search stored memories by text query.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }),
        }
    }

    async fn run(&self, input: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        let query = require_str(input, "query")?;
        Ok(from_result(self.memory.recall(query).await))
    }
}

// ── recall_by_id ──────────────────────────────────────────────────────────────

pub struct RecallByIdTool {
    pub memory: Arc<MemoryService>,
}

#[async_trait]
impl Tool for RecallByIdTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "recall_by_id".to_string(),
            description: "Fetch one stored memory by its id.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"id": {"type": "string"}},
                "required": ["id"]
            }),
        }
    }

    async fn run(&self, input: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        let id = require_str(input, "id")?;
        Ok(from_result(self.memory.recall_by_id(id).await))
    }
}

// ── store_note ────────────────────────────────────────────────────────────────

pub struct StoreNoteTool {
    pub memory: Arc<MemoryService>,
}

#[async_trait]
impl Tool for StoreNoteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "store_note".to_string(),
            description: "Save a pinned note-to-self, surfaced in every future context."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"content": {"type": "string"}},
                "required": ["content"]
            }),
        }
    }

    async fn run(&self, input: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        let content = require_str(input, "content")?;
        Ok(from_result(self.memory.store_pinned(content).await))
    }
}

// ── dismiss_note ──────────────────────────────────────────────────────────────

pub struct DismissNoteTool {
    pub memory: Arc<MemoryService>,
}

#[async_trait]
impl Tool for DismissNoteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "dismiss_note".to_string(),
            description: "Unpin a note so it stops appearing in the active context."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"id": {"type": "string"}},
                "required": ["id"]
            }),
        }
    }

    async fn run(&self, input: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        let id = require_str(input, "id")?;
        Ok(match self.memory.unpin(id).await {
            Ok(()) => ToolOutput::ok(format!("Note {id} unpinned.")),
            Err(err) => ToolOutput::err(err.to_string()),
        })
    }
}

// ── store_idea ────────────────────────────────────────────────────────────────

pub struct StoreIdeaTool {
    pub memory: Arc<MemoryService>,
}

#[async_trait]
impl Tool for StoreIdeaTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "store_idea".to_string(),
            description: "Save an improvement idea to try in a future iteration.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "description": {"type": "string"},
                    "context": {"type": "string", "description": "Why this idea matters"}
                },
                "required": ["description"]
            }),
        }
    }

    async fn run(&self, input: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        let description = require_str(input, "description")?;
        let context = optional_str(input, "context").unwrap_or_default();
        Ok(from_result(self.memory.store_idea(description, context).await))
    }
}

// ── update_idea_status ────────────────────────────────────────────────────────

pub struct UpdateIdeaStatusTool {
    pub memory: Arc<MemoryService>,
}

#[async_trait]
impl Tool for UpdateIdeaStatusTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "update_idea_status".to_string(),
            description: "Mark an idea attempted or completed.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string"},
                    "status": {"type": "string", "enum": ["attempted", "completed"]}
                },
                "required": ["id", "status"]
            }),
        }
    }

    async fn run(&self, input: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        let id = require_str(input, "id")?;
        let status = require_str(input, "status")?;
        Ok(match self.memory.update_idea_status(id, status).await {
            Ok(()) => ToolOutput::ok(format!("Idea {id} marked {status}.")),
            Err(err) => ToolOutput::err(err.to_string()),
        })
    }
}

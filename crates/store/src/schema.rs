use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which LLM invocation context produced an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Planner,
    Builder,
    Fixer,
    Reflect,
    Memory,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Planner => "planner",
            Phase::Builder => "builder",
            Phase::Fixer => "fixer",
            Phase::Reflect => "reflect",
            Phase::Memory => "memory",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted LLM exchange.  Created by the gateway on every successful
/// call and never mutated afterwards.
///
/// The `system` / `messages` / `response` payloads are stored as raw JSON
/// documents: the store does not interpret them, and the gateway strips
/// thinking signatures before handing the record over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedRecord {
    pub id: Uuid,
    pub phase: Phase,
    pub model_id: String,
    pub iteration_id: Option<String>,
    pub system: serde_json::Value,
    pub messages: serde_json::Value,
    pub response: serde_json::Value,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_5m_tokens: u64,
    pub cache_write_1h_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost: f64,
    pub batch: bool,
    pub stop_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Workflow state of an improvement idea.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdeaStatus {
    Pending,
    Attempted,
    Completed,
}

impl IdeaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdeaStatus::Pending => "pending",
            IdeaStatus::Attempted => "attempted",
            IdeaStatus::Completed => "completed",
        }
    }
}

/// A single remembered item: past outcome, pinned note, or improvement idea.
///
/// Invariants maintained by the memory service: an item carrying an
/// `idea_status` starts out pinned, and completing an idea clears the pin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: Uuid,
    pub content: String,
    pub summary: String,
    pub pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idea_status: Option<IdeaStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idea_context: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryItem {
    pub fn new(content: impl Into<String>, summary: impl Into<String>, pinned: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            summary: summary.into(),
            pinned,
            idea_status: None,
            idea_context: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

/// One entry in an iteration's persisted log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

/// Aggregated token usage for one phase within one iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseUsage {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub cost: f64,
}

/// The durable record of one complete iteration attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationLog {
    pub id: Uuid,
    pub iteration_id: String,
    pub entries: Vec<LogEntry>,
    /// Per-phase token usage summary, keyed by phase name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<BTreeMap<String, PhaseUsage>>,
    pub created_at: DateTime<Utc>,
}

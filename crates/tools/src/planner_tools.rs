//! Planner-only tools: iteration history, performance metrics, a heuristic
//! code-quality report, and the terminal `submit_plan`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use seedling_llm::ToolDefinition;
use seedling_store::{LogLevel, Metric, RecordStore};

use crate::{Tool, ToolError, ToolOutput, optional_u64, require_str};

/// Name of the planner's terminal tool; the planner driver watches for it.
pub const SUBMIT_PLAN: &str = "submit_plan";

const DEFAULT_HISTORY_LIMIT: u64 = 10;

// ── query_iteration_history ───────────────────────────────────────────────────

pub struct QueryIterationHistoryTool {
    pub store: Arc<RecordStore>,
}

#[async_trait]
impl Tool for QueryIterationHistoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "query_iteration_history".to_string(),
            description: "Summaries of recent iterations: outcome, errors, token spend."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "description": "How many iterations (default 10)"}
                }
            }),
        }
    }

    async fn run(&self, input: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        let limit = optional_u64(input, "limit").unwrap_or(DEFAULT_HISTORY_LIMIT) as usize;
        let logs = match self.store.recent_iteration_logs(limit) {
            Ok(logs) => logs,
            Err(err) => return Ok(ToolOutput::err(err.to_string())),
        };
        if logs.is_empty() {
            return Ok(ToolOutput::ok("No prior iterations recorded."));
        }

        let mut out = String::new();
        for log in logs {
            let errors = log
                .entries
                .iter()
                .filter(|e| matches!(e.level, LogLevel::Error | LogLevel::Warn))
                .count();
            let last = log
                .entries
                .last()
                .map(|e| e.message.as_str())
                .unwrap_or("(no entries)");
            let cost: f64 = log
                .token_usage
                .as_ref()
                .map(|usage| usage.values().map(|u| u.cost).sum())
                .unwrap_or(0.0);
            out.push_str(&format!(
                "{} [{}] entries={} warnings_or_errors={} cost=${:.4}\n  last: {}\n",
                log.iteration_id,
                log.created_at.format("%Y-%m-%d %H:%M"),
                log.entries.len(),
                errors,
                cost,
                last,
            ));
        }
        Ok(ToolOutput::ok(out.trim_end().to_string()))
    }
}

// ── query_performance_metrics ─────────────────────────────────────────────────

pub struct QueryPerformanceMetricsTool {
    pub store: Arc<RecordStore>,
}

#[async_trait]
impl Tool for QueryPerformanceMetricsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "query_performance_metrics".to_string(),
            description: "Per-iteration totals of one metric: cost, input_tokens, \
                          output_tokens, or cache_read_tokens."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "metric": {
                        "type": "string",
                        "enum": ["cost", "input_tokens", "output_tokens", "cache_read_tokens"]
                    },
                    "limit": {"type": "integer"}
                },
                "required": ["metric"]
            }),
        }
    }

    async fn run(&self, input: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        let metric_name = require_str(input, "metric")?;
        let Some(metric) = Metric::parse(metric_name) else {
            return Err(ToolError::Usage(format!("unknown metric: {metric_name}")));
        };
        let limit = optional_u64(input, "limit").unwrap_or(DEFAULT_HISTORY_LIMIT) as usize;
        match self.store.iteration_metric(metric, limit) {
            Ok(rows) if rows.is_empty() => Ok(ToolOutput::ok("No recorded exchanges yet.")),
            Ok(rows) => {
                let lines: Vec<String> = rows
                    .iter()
                    .map(|(iteration, value)| match metric {
                        Metric::Cost => format!("{iteration}: ${value:.4}"),
                        _ => format!("{iteration}: {value:.0}"),
                    })
                    .collect();
                Ok(ToolOutput::ok(lines.join("\n")))
            }
            Err(err) => Ok(ToolOutput::err(err.to_string())),
        }
    }
}

// ── code_quality ──────────────────────────────────────────────────────────────

/// Seam for the code-quality report; the heuristic implementation below is
/// the default, a real linter can be slotted in at assembly time.
pub trait QualityLinter: Send + Sync {
    fn analyze(&self, path: &Path) -> anyhow::Result<String>;
}

/// Cheap text heuristics: size, long lines, deferred-work markers.
pub struct HeuristicLinter;

impl QualityLinter for HeuristicLinter {
    fn analyze(&self, path: &Path) -> anyhow::Result<String> {
        let content = std::fs::read_to_string(path)?;
        let total_lines = content.lines().count();
        let long_lines = content.lines().filter(|l| l.chars().count() > 100).count();
        let todos = content.matches("TODO").count() + content.matches("FIXME").count();

        let mut findings = Vec::new();
        if total_lines > 400 {
            findings.push(format!("file is large ({total_lines} lines); consider splitting"));
        }
        if long_lines > 0 {
            findings.push(format!("{long_lines} lines exceed 100 characters"));
        }
        if todos > 0 {
            findings.push(format!("{todos} TODO/FIXME markers"));
        }
        if findings.is_empty() {
            Ok(format!("{total_lines} lines; no findings."))
        } else {
            Ok(format!("{total_lines} lines; {}", findings.join("; ")))
        }
    }
}

pub struct CodeQualityTool {
    pub workspace_root: PathBuf,
    pub linter: Arc<dyn QualityLinter>,
}

#[async_trait]
impl Tool for CodeQualityTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "code_quality".to_string(),
            description: "Quality report for one source file.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"filePath": {"type": "string"}},
                "required": ["filePath"]
            }),
        }
    }

    async fn run(&self, input: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        let rel = require_str(input, "filePath")?;
        let path = self.workspace_root.join(rel);
        match self.linter.analyze(&path) {
            Ok(report) => Ok(ToolOutput::ok(report)),
            Err(err) => Ok(ToolOutput::err(format!("cannot analyze {rel}: {err}"))),
        }
    }
}

// ── submit_plan ───────────────────────────────────────────────────────────────

/// Terminal planner tool.  The planner driver extracts the plan from the
/// tool_use input; the handler only acknowledges so the transcript stays
/// well-formed.
pub struct SubmitPlanTool;

#[async_trait]
impl Tool for SubmitPlanTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: SUBMIT_PLAN.to_string(),
            description: "Submit the chosen change: a short title and a full description. \
                          Call exactly once, when the plan is final."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string", "description": "Short human title; becomes the branch name and PR title"},
                    "description": {"type": "string", "description": "What to change and why; becomes the PR body"}
                },
                "required": ["title", "description"]
            }),
        }
    }

    async fn run(&self, input: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        require_str(input, "title")?;
        require_str(input, "description")?;
        Ok(ToolOutput::ok("Plan recorded."))
    }
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use seedling_store::{GeneratedRecord, IterationLog, LogEntry, Phase};
    use uuid::Uuid;

    use super::*;

    fn store() -> (tempfile::TempDir, Arc<RecordStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::open(dir.path().join("s.redb")).unwrap());
        (dir, store)
    }

    #[tokio::test]
    async fn iteration_history_formats_logs() {
        let (_dir, store) = store();
        store
            .insert_iteration_log(&IterationLog {
                id: Uuid::new_v4(),
                iteration_id: "it-7".to_string(),
                entries: vec![LogEntry {
                    timestamp: Utc::now(),
                    level: LogLevel::Info,
                    message: "PR #3 merged successfully.".to_string(),
                    context: None,
                }],
                token_usage: None,
                created_at: Utc::now(),
            })
            .unwrap();

        let tool = QueryIterationHistoryTool { store };
        let out = tool.run(&json!({})).await.unwrap();
        assert!(out.success);
        assert!(out.output.contains("it-7"));
        assert!(out.output.contains("last: PR #3 merged successfully."));
    }

    #[tokio::test]
    async fn performance_metrics_rejects_unknown_metric() {
        let (_dir, store) = store();
        let tool = QueryPerformanceMetricsTool { store };
        let err = tool.run(&json!({"metric": "vibes"})).await.unwrap_err();
        assert!(err.to_string().contains("unknown metric"));
    }

    #[tokio::test]
    async fn performance_metrics_formats_cost() {
        let (_dir, store) = store();
        store
            .insert_generated(&GeneratedRecord {
                id: Uuid::new_v4(),
                phase: Phase::Builder,
                model_id: "m".to_string(),
                iteration_id: Some("it-1".to_string()),
                system: json!([]),
                messages: json!([]),
                response: json!([]),
                input_tokens: 10,
                output_tokens: 5,
                cache_write_5m_tokens: 0,
                cache_write_1h_tokens: 0,
                cache_read_tokens: 0,
                cost: 0.1234,
                batch: true,
                stop_reason: None,
                created_at: Utc::now(),
            })
            .unwrap();

        let tool = QueryPerformanceMetricsTool { store };
        let out = tool.run(&json!({"metric": "cost"})).await.unwrap();
        assert!(out.output.contains("it-1: $0.1234"));
    }

    #[test]
    fn heuristic_linter_flags_long_lines_and_todos() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messy.rs");
        let long_line = "x".repeat(150);
        std::fs::write(&path, format!("// TODO: tidy\n{long_line}\n")).unwrap();

        let report = HeuristicLinter.analyze(&path).unwrap();
        assert!(report.contains("1 lines exceed 100 characters"));
        assert!(report.contains("1 TODO/FIXME markers"));
    }

    #[tokio::test]
    async fn submit_plan_validates_arguments() {
        let tool = SubmitPlanTool;
        let ok = tool
            .run(&json!({"title": "Add greet", "description": "Adds a greet module."}))
            .await
            .unwrap();
        assert!(ok.success);

        let err = tool.run(&json!({"title": "Add greet"})).await.unwrap_err();
        assert!(err.to_string().contains("description"));
    }
}

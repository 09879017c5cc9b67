//! Batch-mode gateway to the LLM vendor.
//!
//! Every request goes through the vendor's **batch** endpoint as a
//! single-element batch — half the price of interactive submission — and is
//! polled to completion with exponential backoff.  Each successful exchange
//! is recorded to the store (with thinking signatures stripped) before its
//! result is handed to the caller.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use seedling_config::{LlmConfig, ModelSpec};
use seedling_store::{GeneratedRecord, Phase, RecordStore, StoreError};

use crate::pricing;
use crate::types::{ContentBlock, LlmReply, Message, SystemBlock, TokenUsage, ToolDefinition};

// ── errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The batch reached a terminal state other than `succeeded`.
    #[error("llm batch failed: {0}")]
    BatchFailed(String),
    #[error("llm request timed out")]
    Timeout,
    #[error("llm request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("llm response malformed: {0}")]
    Malformed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, LlmError>;

/// Sleep that unwinds early as [`LlmError::Cancelled`] when the token fires.
pub async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(LlmError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

// ── client trait ──────────────────────────────────────────────────────────────

/// The seam every LLM consumer talks through; scripted implementations drive
/// the end-to-end tests.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Submit one exchange and return the assistant's reply.
    async fn complete(
        &self,
        phase: Phase,
        system: Vec<SystemBlock>,
        messages: &[Message],
        extra_tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmReply>;

    /// Tag subsequent exchanges with an iteration id.
    fn begin_iteration(&self, _id: &str) {}

    /// Clear the iteration tag.
    fn end_iteration(&self) {}
}

// ── pure helpers ──────────────────────────────────────────────────────────────

/// Remove vendor thinking signatures from response blocks before persistence.
/// They are vendor-specific and unverifiable after the fact.
pub fn strip_thinking_signatures(blocks: &[ContentBlock]) -> Vec<ContentBlock> {
    blocks
        .iter()
        .map(|block| match block {
            ContentBlock::Thinking { thinking, .. } => ContentBlock::Thinking {
                thinking: thinking.clone(),
                signature: None,
            },
            other => other.clone(),
        })
        .collect()
}

/// Thinking budget for a phase: planner/builder/fixer/reflect think,
/// the memory summarizer does not.  The budget is clamped so at least
/// 2048 tokens of the ceiling remain for the visible response.
pub fn thinking_budget(phase: Phase, configured: u32, max_tokens: u32) -> Option<u32> {
    match phase {
        Phase::Memory => None,
        Phase::Planner | Phase::Builder | Phase::Fixer | Phase::Reflect => {
            let budget = configured.min(max_tokens.saturating_sub(2048));
            (budget > 0).then_some(budget)
        }
    }
}

/// Parse the `message` object of a succeeded batch result.
pub fn parse_result_message(value: &serde_json::Value) -> Result<LlmReply> {
    let content = value
        .get("content")
        .ok_or_else(|| LlmError::Malformed("result message has no content".to_string()))?;
    let blocks: Vec<ContentBlock> = serde_json::from_value(content.clone())
        .map_err(|e| LlmError::Malformed(format!("unparseable content blocks: {e}")))?;
    let usage: TokenUsage = value
        .get("usage")
        .map(|u| serde_json::from_value(u.clone()))
        .transpose()
        .map_err(|e| LlmError::Malformed(format!("unparseable usage: {e}")))?
        .unwrap_or_default();
    let stop_reason = value
        .get("stop_reason")
        .and_then(|v| v.as_str())
        .map(String::from);
    let model = value
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    Ok(LlmReply {
        message: Message {
            role: crate::types::Role::Assistant,
            content: blocks,
        },
        stop_reason,
        usage,
        model,
    })
}

// ── gateway ───────────────────────────────────────────────────────────────────

pub struct LlmGateway {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: String,
    store: Arc<RecordStore>,
    cancel: CancellationToken,
    /// Iteration id stamped onto every record between `begin_iteration` and
    /// `end_iteration`.
    iteration: Mutex<Option<String>>,
}

impl LlmGateway {
    pub fn new(
        config: LlmConfig,
        api_key: String,
        store: Arc<RecordStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            api_key,
            store,
            cancel,
            iteration: Mutex::new(None),
        }
    }

    fn phase_spec(&self, phase: Phase) -> &ModelSpec {
        match phase {
            Phase::Planner => &self.config.planner,
            Phase::Builder => &self.config.builder,
            Phase::Fixer => &self.config.fixer,
            Phase::Reflect => &self.config.reflect,
            Phase::Memory => &self.config.memory,
        }
    }

    /// Build the vendor request params for one call.
    fn build_params(
        &self,
        phase: Phase,
        system: &[SystemBlock],
        messages: &[Message],
        extra_tools: Option<&[ToolDefinition]>,
    ) -> serde_json::Value {
        let spec = self.phase_spec(phase);
        let budget = thinking_budget(phase, self.config.thinking_budget_tokens, spec.max_tokens);
        let max_tokens = spec.max_tokens + budget.unwrap_or(0);

        let system_wire: Vec<serde_json::Value> = system
            .iter()
            .map(|block| {
                let mut value = json!({"type": "text", "text": block.text});
                if let Some(cache) = &block.cache_control {
                    value["cache_control"] = serde_json::to_value(cache).unwrap_or_default();
                }
                value
            })
            .collect();

        let wire_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                // Tool-result turns carry role `user` on the wire.
                let role = match m.role {
                    crate::types::Role::Assistant => "assistant",
                    _ => "user",
                };
                json!({"role": role, "content": m.content})
            })
            .collect();

        let mut params = json!({
            "model": spec.model,
            "max_tokens": max_tokens,
            "system": system_wire,
            "messages": wire_messages,
        });
        if let Some(tools) = extra_tools {
            if !tools.is_empty() {
                params["tools"] = serde_json::to_value(tools).unwrap_or_default();
            }
        }
        if let Some(budget) = budget {
            params["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
        }
        params
    }

    async fn submit_batch(&self, params: serde_json::Value) -> Result<(String, String)> {
        let custom_id = Uuid::new_v4().to_string();
        let body = json!({
            "requests": [{"custom_id": custom_id, "params": params}]
        });
        let response = self
            .client
            .post(format!("{}/v1/messages/batches", self.config.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.config.api_version)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            return Err(LlmError::BatchFailed(format!(
                "batch submission rejected ({status}): {body}"
            )));
        }
        let batch_id = body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LlmError::Malformed("batch response missing id".to_string()))?
            .to_string();
        Ok((batch_id, custom_id))
    }

    /// Poll the batch until it ends.  No wall-clock cap: the vendor is
    /// trusted to terminate the batch, and cancellation unwinds the sleep.
    async fn poll_batch(&self, batch_id: &str) -> Result<serde_json::Value> {
        let mut interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_interval = Duration::from_millis(self.config.max_poll_interval_ms);

        loop {
            sleep_cancellable(interval, &self.cancel).await?;

            let response = self
                .client
                .get(format!(
                    "{}/v1/messages/batches/{batch_id}",
                    self.config.base_url
                ))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", &self.config.api_version)
                .send()
                .await?;
            let body: serde_json::Value = response.json().await?;
            let status = body
                .get("processing_status")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            debug!(batch_id, status, "batch poll");
            if status == "ended" {
                return Ok(body);
            }

            let scaled = interval.as_millis() as f64 * self.config.poll_backoff;
            interval = Duration::from_millis(scaled as u64).min(max_interval);
        }
    }

    async fn fetch_result(&self, batch_id: &str, custom_id: &str) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(format!(
                "{}/v1/messages/batches/{batch_id}/results",
                self.config.base_url
            ))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.config.api_version)
            .send()
            .await?;
        let raw = response.text().await?;

        // Results arrive as JSONL, one line per request.
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            let entry: serde_json::Value = serde_json::from_str(line)
                .map_err(|e| LlmError::Malformed(format!("bad results line: {e}")))?;
            if entry.get("custom_id").and_then(|v| v.as_str()) == Some(custom_id) {
                return Ok(entry);
            }
        }
        Err(LlmError::Malformed(format!(
            "batch {batch_id} results did not include request {custom_id}"
        )))
    }

    fn record_exchange(
        &self,
        phase: Phase,
        system: &[SystemBlock],
        messages: &[Message],
        reply: &LlmReply,
    ) -> std::result::Result<(), StoreError> {
        let stripped = strip_thinking_signatures(&reply.message.content);
        let (write_5m, write_1h) = reply.usage.cache_write_split();
        let iteration_id = self.iteration.lock().expect("iteration lock").clone();
        let record = GeneratedRecord {
            id: Uuid::new_v4(),
            phase,
            model_id: reply.model.clone(),
            iteration_id,
            system: serde_json::to_value(system).map_err(StoreError::from)?,
            messages: serde_json::to_value(messages).map_err(StoreError::from)?,
            response: serde_json::to_value(&stripped).map_err(StoreError::from)?,
            input_tokens: reply.usage.input_tokens,
            output_tokens: reply.usage.output_tokens,
            cache_write_5m_tokens: write_5m,
            cache_write_1h_tokens: write_1h,
            cache_read_tokens: reply.usage.cache_read_input_tokens,
            cost: pricing::compute_cost(&reply.model, &reply.usage, true),
            batch: true,
            stop_reason: reply.stop_reason.clone(),
            created_at: chrono::Utc::now(),
        };
        self.store.insert_generated(&record)
    }
}

#[async_trait]
impl LlmClient for LlmGateway {
    async fn complete(
        &self,
        phase: Phase,
        system: Vec<SystemBlock>,
        messages: &[Message],
        extra_tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmReply> {
        let params = self.build_params(phase, &system, messages, extra_tools);
        let (batch_id, custom_id) = self.submit_batch(params).await?;
        let _ = self.poll_batch(&batch_id).await?;
        let entry = self.fetch_result(&batch_id, &custom_id).await?;

        let result = entry
            .get("result")
            .ok_or_else(|| LlmError::Malformed("results entry missing result".to_string()))?;
        let kind = result.get("type").and_then(|v| v.as_str()).unwrap_or("");
        if kind != "succeeded" {
            let detail = result
                .get("error")
                .map(|e| e.to_string())
                .unwrap_or_else(|| kind.to_string());
            warn!(batch_id, kind, "batch request did not succeed");
            return Err(LlmError::BatchFailed(detail));
        }

        let message = result
            .get("message")
            .ok_or_else(|| LlmError::Malformed("succeeded result missing message".to_string()))?;
        let reply = parse_result_message(message)?;

        // The exchange is recorded before the reply is consumed downstream.
        self.record_exchange(phase, &system, messages, &reply)?;
        Ok(reply)
    }

    fn begin_iteration(&self, id: &str) {
        *self.iteration.lock().expect("iteration lock") = Some(id.to_string());
    }

    fn end_iteration(&self) {
        *self.iteration.lock().expect("iteration lock") = None;
    }
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn strip_removes_signatures_and_keeps_text() {
        let blocks = vec![
            ContentBlock::Thinking {
                thinking: "private reasoning".to_string(),
                signature: Some("sig-abc".to_string()),
            },
            ContentBlock::text("visible answer"),
        ];
        let stripped = strip_thinking_signatures(&blocks);
        match &stripped[0] {
            ContentBlock::Thinking { thinking, signature } => {
                assert_eq!(thinking, "private reasoning");
                assert!(signature.is_none());
            }
            other => panic!("unexpected block: {other:?}"),
        }
        assert_eq!(stripped[1], blocks[1]);

        // No `signature` key survives serialization.
        let json = serde_json::to_string(&stripped).unwrap();
        assert!(!json.contains("signature"));
    }

    #[test]
    fn thinking_budget_clamps_to_headroom() {
        assert_eq!(thinking_budget(Phase::Builder, 4_096, 8_192), Some(4_096));
        assert_eq!(thinking_budget(Phase::Builder, 10_000, 8_192), Some(6_144));
        assert_eq!(thinking_budget(Phase::Builder, 10_000, 2_048), None);
        assert_eq!(thinking_budget(Phase::Memory, 4_096, 8_192), None);
    }

    #[test]
    fn parse_result_message_extracts_blocks_and_usage() {
        let message = serde_json::json!({
            "model": "claude-sonnet-4-5",
            "stop_reason": "tool_use",
            "content": [
                {"type": "text", "text": "let me look"},
                {"type": "tool_use", "id": "tu_1", "name": "read_file",
                 "input": {"filePath": "src/main.rs"}}
            ],
            "usage": {
                "input_tokens": 12, "output_tokens": 34,
                "cache_read_input_tokens": 56, "cache_creation_input_tokens": 7
            }
        });
        let reply = parse_result_message(&message).unwrap();
        assert_eq!(reply.message.role, Role::Assistant);
        assert_eq!(reply.message.content.len(), 2);
        assert_eq!(reply.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(reply.usage.input_tokens, 12);
        assert_eq!(reply.usage.cache_read_input_tokens, 56);
        assert_eq!(reply.model, "claude-sonnet-4-5");
    }

    #[test]
    fn parse_result_message_rejects_missing_content() {
        let message = serde_json::json!({"model": "m"});
        assert!(matches!(
            parse_result_message(&message),
            Err(LlmError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn sleep_cancellable_unwinds_on_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = sleep_cancellable(Duration::from_secs(60), &cancel).await;
        assert!(matches!(result, Err(LlmError::Cancelled)));
    }
}

//! Conversation message and request/response types, mirroring the vendor's
//! wire format so transcripts persist exactly as they were sent.

use serde::{Deserialize, Serialize};

/// Role of a message author.
///
/// Tool results travel inside `user` turns on the wire; the `Tool` variant
/// exists so transcripts imported from other runtimes still deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A content block within a message — a closed sum, matched exhaustively at
/// every consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Opaque chain-of-thought.  The vendor signs it; the signature is
    /// unverifiable after the fact and is stripped before persistence.
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// A user turn answering the previous assistant turn's tool calls.
    pub fn tool_results(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: blocks,
        }
    }

    /// Concatenated text of all text blocks.
    pub fn plain_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// All tool invocations requested in this message, in order.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }
}

/// Cache TTL buckets offered by the vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheTtl {
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "1h")]
    OneHour,
}

/// Prompt-cache hint.  Attaching this to a block tells the vendor to reuse
/// everything up to and including that block across calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheControl {
    Ephemeral {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ttl: Option<CacheTtl>,
    },
}

/// One block of the layered system prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemBlock {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

impl SystemBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cache_control: None,
        }
    }
}

/// A tool made available to the model for one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Breakdown of cache-creation tokens by TTL bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheCreation {
    #[serde(default)]
    pub ephemeral_5m_input_tokens: u64,
    #[serde(default)]
    pub ephemeral_1h_input_tokens: u64,
}

/// Per-request token accounting as reported by the vendor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation: Option<CacheCreation>,
}

impl TokenUsage {
    /// Cache-write tokens split into (5-minute, 1-hour) buckets.  Without an
    /// explicit breakdown, all creation tokens count as the default 5-minute
    /// bucket.
    pub fn cache_write_split(&self) -> (u64, u64) {
        match &self.cache_creation {
            Some(split) => (split.ephemeral_5m_input_tokens, split.ephemeral_1h_input_tokens),
            None => (self.cache_creation_input_tokens, 0),
        }
    }
}

/// The gateway's answer to one `complete` call.
#[derive(Debug, Clone)]
pub struct LlmReply {
    pub message: Message,
    pub stop_reason: Option<String>,
    pub usage: TokenUsage,
    pub model: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_block_wire_tags() {
        let block = ContentBlock::ToolUse {
            id: "tu_1".to_string(),
            name: "read_file".to_string(),
            input: serde_json::json!({"filePath": "src/lib.rs"}),
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_use");
        assert_eq!(json["name"], "read_file");

        let back: ContentBlock = serde_json::from_value(json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn thinking_signature_is_omitted_when_none() {
        let block = ContentBlock::Thinking {
            thinking: "hmm".to_string(),
            signature: None,
        };
        let json = serde_json::to_value(&block).unwrap();
        assert!(json.get("signature").is_none());
    }

    #[test]
    fn tool_result_defaults_is_error_false() {
        let json = serde_json::json!({
            "type": "tool_result",
            "tool_use_id": "tu_9",
            "content": "ok"
        });
        let block: ContentBlock = serde_json::from_value(json).unwrap();
        match block {
            ContentBlock::ToolResult { is_error, .. } => assert!(!is_error),
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn message_helpers() {
        let msg = Message {
            role: Role::Assistant,
            content: vec![
                ContentBlock::text("working on it"),
                ContentBlock::ToolUse {
                    id: "a".to_string(),
                    name: "git_diff".to_string(),
                    input: serde_json::json!({}),
                },
            ],
        };
        assert_eq!(msg.plain_text(), "working on it");
        let uses = msg.tool_uses();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].1, "git_diff");
    }

    #[test]
    fn cache_control_wire_shape() {
        let block = SystemBlock {
            text: "stable prefix".to_string(),
            cache_control: Some(CacheControl::Ephemeral {
                ttl: Some(CacheTtl::OneHour),
            }),
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["cache_control"]["type"], "ephemeral");
        assert_eq!(json["cache_control"]["ttl"], "1h");
    }

    #[test]
    fn cache_write_split_defaults_to_5m_bucket() {
        let usage = TokenUsage {
            cache_creation_input_tokens: 120,
            ..Default::default()
        };
        assert_eq!(usage.cache_write_split(), (120, 0));

        let split = TokenUsage {
            cache_creation_input_tokens: 120,
            cache_creation: Some(CacheCreation {
                ephemeral_5m_input_tokens: 100,
                ephemeral_1h_input_tokens: 20,
            }),
            ..Default::default()
        };
        assert_eq!(split.cache_write_split(), (100, 20));
    }
}

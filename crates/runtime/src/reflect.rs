//! Post-iteration reflection: one LLM call over the outcome and a digest of
//! the planner + builder conversation.

use std::sync::Arc;

use seedling_llm::{
    ContentBlock, LlmClient, LlmError, Message, PromptLayers, Role, layer_system_prompt,
};
use seedling_store::Phase;

use crate::prompts;

/// Character cap per transcript line in the digest.
const DIGEST_LINE_CAP: usize = 200;
/// Character cap on the whole digest.
const DIGEST_CHAR_CAP: usize = 12_000;

/// Compress a transcript into one line per message so the reflector sees the
/// shape of the dialog without its full bulk.
pub fn transcript_digest(messages: &[Message]) -> String {
    let mut lines: Vec<String> = Vec::new();
    for message in messages {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        for block in &message.content {
            let line = match block {
                ContentBlock::Text { text } => format!("{role}: {}", clip(text)),
                ContentBlock::Thinking { .. } => continue,
                ContentBlock::ToolUse { name, .. } => format!("{role} → {name}"),
                ContentBlock::ToolResult {
                    content, is_error, ..
                } => {
                    let tag = if *is_error { "tool error" } else { "tool" };
                    format!("{tag}: {}", clip(content))
                }
            };
            lines.push(line);
        }
    }
    let digest = lines.join("\n");
    if digest.chars().count() > DIGEST_CHAR_CAP {
        let tail: String = digest
            .chars()
            .skip(digest.chars().count() - DIGEST_CHAR_CAP)
            .collect();
        format!("…\n{tail}")
    } else {
        digest
    }
}

fn clip(text: &str) -> String {
    let flattened = text.replace('\n', " ");
    if flattened.chars().count() <= DIGEST_LINE_CAP {
        return flattened;
    }
    let cut: String = flattened.chars().take(DIGEST_LINE_CAP).collect();
    format!("{cut}…")
}

/// Ask the reflect phase for a self-assessment of the finished iteration.
pub async fn run_reflection(
    llm: &Arc<dyn LlmClient>,
    outcome: &str,
    transcript: &[Message],
) -> Result<String, LlmError> {
    let layers = PromptLayers {
        prefix: prompts::REFLECT_PREFIX.to_string(),
        ..Default::default()
    };
    let digest = transcript_digest(transcript);
    let reply = llm
        .complete(
            Phase::Reflect,
            layer_system_prompt(&layers),
            &[Message::user(prompts::reflect_kickoff(outcome, &digest))],
            None,
        )
        .await?;
    Ok(reply.message.plain_text().trim().to_string())
}

//! The memory service: store and recall past outcomes, pinned notes, and
//! improvement ideas, and assemble the budgeted context string.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use seedling_llm::{LlmClient, LlmError, Message, PromptLayers, layer_system_prompt};
use seedling_store::{IdeaStatus, MemoryItem, Phase, RecordStore, StoreError};

use crate::context;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("no memory item with id \"{0}\"")]
    NotFound(String),
    #[error("memory item {0} is not pinned")]
    NotPinned(String),
    #[error("memory item {0} is not an idea")]
    NotIdea(String),
    #[error("invalid idea status \"{0}\" (expected attempted or completed)")]
    InvalidStatus(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;

/// Summaries longer than this are clipped; the summarizer phase is asked for
/// one sentence, this is the backstop.
const SUMMARY_CHAR_CAP: usize = 200;

const SUMMARIZE_PREFIX: &str = "You compress notes for a software agent's memory. Reply with a \
single factual sentence capturing what matters for future planning. No preamble.";

pub struct MemoryService {
    store: Arc<RecordStore>,
    llm: Arc<dyn LlmClient>,
    budget_tokens: usize,
}

impl MemoryService {
    pub fn new(store: Arc<RecordStore>, llm: Arc<dyn LlmClient>, budget_tokens: usize) -> Self {
        Self {
            store,
            llm,
            budget_tokens,
        }
    }

    /// Summarize `content` via the memory phase.  Falls back to a clipped
    /// head of the content when the model returns nothing useful.
    async fn summarize(&self, content: &str) -> Result<String> {
        let layers = PromptLayers {
            prefix: SUMMARIZE_PREFIX.to_string(),
            ..Default::default()
        };
        let reply = self
            .llm
            .complete(
                Phase::Memory,
                layer_system_prompt(&layers),
                &[Message::user(content)],
                None,
            )
            .await?;
        let summary = reply.message.plain_text().trim().to_string();
        if summary.is_empty() {
            debug!("memory summarizer returned nothing; clipping content");
            return Ok(clip(content, SUMMARY_CHAR_CAP));
        }
        Ok(clip(&summary, SUMMARY_CHAR_CAP))
    }

    /// Persist an unpinned past outcome.
    pub async fn store_past(&self, content: &str) -> Result<MemoryItem> {
        let summary = self.summarize(content).await?;
        let item = MemoryItem::new(content, summary, false);
        self.store.insert_memory(&item)?;
        Ok(item)
    }

    /// Persist a pinned note-to-self.
    pub async fn store_pinned(&self, content: &str) -> Result<String> {
        let summary = self.summarize(content).await?;
        let item = MemoryItem::new(content, summary, true);
        self.store.insert_memory(&item)?;
        Ok(format!("Note saved ({}): {}", item.id, item.summary))
    }

    /// Persist a pinned improvement idea with status `pending`.
    pub async fn store_idea(&self, description: &str, idea_context: &str) -> Result<String> {
        let summary = self.summarize(description).await?;
        let mut item = MemoryItem::new(description, summary, true);
        item.idea_status = Some(IdeaStatus::Pending);
        if !idea_context.trim().is_empty() {
            item.idea_context = Some(idea_context.trim().to_string());
        }
        self.store.insert_memory(&item)?;
        Ok(format!("Idea saved ({}): {}", item.id, item.summary))
    }

    fn fetch(&self, id: &str) -> Result<MemoryItem> {
        let parsed = Uuid::parse_str(id).map_err(|_| MemoryError::NotFound(id.to_string()))?;
        self.store
            .memory_by_id(parsed)?
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))
    }

    /// Clear the pinned flag on a note.
    pub async fn unpin(&self, id: &str) -> Result<()> {
        let mut item = self.fetch(id)?;
        if !item.pinned {
            return Err(MemoryError::NotPinned(id.to_string()));
        }
        item.pinned = false;
        item.updated_at = chrono::Utc::now();
        self.store.update_memory(&item)?;
        Ok(())
    }

    /// Move an idea to `attempted` or `completed`.  Completing an idea also
    /// clears its pin, which retires it from the active context.
    pub async fn update_idea_status(&self, id: &str, status: &str) -> Result<()> {
        let next = match status {
            "attempted" => IdeaStatus::Attempted,
            "completed" => IdeaStatus::Completed,
            other => return Err(MemoryError::InvalidStatus(other.to_string())),
        };
        let mut item = self.fetch(id)?;
        if item.idea_status.is_none() {
            return Err(MemoryError::NotIdea(id.to_string()));
        }
        item.idea_status = Some(next);
        if next == IdeaStatus::Completed {
            item.pinned = false;
        }
        item.updated_at = chrono::Utc::now();
        self.store.update_memory(&item)?;
        Ok(())
    }

    /// Assemble the budgeted memory context for prompt injection.
    pub async fn get_context(&self) -> Result<String> {
        let items = self.store.memory_newest_first(None, usize::MAX)?;
        Ok(context::assemble(&items, self.budget_tokens))
    }

    /// Text search, with a case-insensitive regex fallback when the token
    /// index yields nothing (substring and punctuation queries).
    pub async fn recall(&self, query: &str) -> Result<String> {
        let hits = self.store.search_memory(query, 5)?;
        let items: Vec<MemoryItem> = if hits.is_empty() {
            self.store
                .regex_search_memory(&regex::escape(query), 5)?
        } else {
            hits.into_iter().map(|h| h.item).collect()
        };
        if items.is_empty() {
            return Ok(format!("No memories matched \"{query}\"."));
        }
        Ok(format_items(&items))
    }

    pub async fn recall_by_id(&self, id: &str) -> Result<String> {
        match self.fetch(id) {
            Ok(item) => Ok(format_items(&[item])),
            Err(MemoryError::NotFound(_)) => Ok(format!("No memory with id \"{id}\".")),
            Err(other) => Err(other),
        }
    }
}

fn format_items(items: &[MemoryItem]) -> String {
    items
        .iter()
        .map(|item| {
            format!(
                "**{}** [{}]\n{}",
                item.id,
                item.created_at.format("%Y-%m-%d %H:%M:%S"),
                item.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

fn clip(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    let clipped: String = text.chars().take(cap).collect();
    warn!(cap, "summary clipped");
    format!("{clipped}…")
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use seedling_llm::{LlmReply, SystemBlock, TokenUsage, ToolDefinition};

    use super::*;

    /// Summarizer stub: echoes a fixed summary for every call.
    struct EchoSummarizer;

    #[async_trait]
    impl LlmClient for EchoSummarizer {
        async fn complete(
            &self,
            phase: Phase,
            _system: Vec<SystemBlock>,
            messages: &[Message],
            _extra_tools: Option<&[ToolDefinition]>,
        ) -> seedling_llm::Result<LlmReply> {
            assert_eq!(phase, Phase::Memory);
            let input = messages.last().map(|m| m.plain_text()).unwrap_or_default();
            Ok(LlmReply {
                message: Message::assistant(format!("summary of: {}", clip(&input, 40))),
                stop_reason: Some("end_turn".to_string()),
                usage: TokenUsage::default(),
                model: "test-model".to_string(),
            })
        }
    }

    fn service() -> (tempfile::TempDir, MemoryService) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::open(dir.path().join("mem.redb")).unwrap());
        let service = MemoryService::new(store, Arc::new(EchoSummarizer), 2_000);
        (dir, service)
    }

    #[tokio::test]
    async fn store_past_is_unpinned_and_summarized() {
        let (_dir, service) = service();
        let item = service.store_past("CI failed because of a missing import").await.unwrap();
        assert!(!item.pinned);
        assert!(item.summary.starts_with("summary of:"));
        assert!(item.idea_status.is_none());
    }

    #[tokio::test]
    async fn store_pinned_reports_id_and_summary() {
        let (_dir, service) = service();
        let note = service.store_pinned("always run clippy before pushing").await.unwrap();
        assert!(note.starts_with("Note saved ("));
        assert!(note.contains("): summary of:"));
    }

    #[tokio::test]
    async fn idea_lifecycle_pending_to_completed() {
        let (_dir, service) = service();
        let saved = service
            .store_idea("cache dependencies", "builds take 9 minutes")
            .await
            .unwrap();
        let id = saved
            .strip_prefix("Idea saved (")
            .and_then(|s| s.split(')').next())
            .unwrap()
            .to_string();

        // pending ideas are pinned and show up under ## Ideas
        let context = service.get_context().await.unwrap();
        assert!(context.contains("## Ideas"));
        assert!(context.contains("[PENDING]"));
        assert!(context.contains(" — builds take 9 minutes"));

        service.update_idea_status(&id, "attempted").await.unwrap();
        let context = service.get_context().await.unwrap();
        assert!(context.contains("[ATTEMPTED]"));

        // completing clears the pin and retires the idea to ## Past
        service.update_idea_status(&id, "completed").await.unwrap();
        let item = service.fetch(&id).unwrap();
        assert!(!item.pinned);
        assert_eq!(item.idea_status, Some(IdeaStatus::Completed));
        let context = service.get_context().await.unwrap();
        assert!(!context.contains("## Ideas"));
        assert!(context.contains("## Past"));
    }

    #[tokio::test]
    async fn update_idea_status_rejects_non_ideas_and_bad_status() {
        let (_dir, service) = service();
        let item = service.store_past("just an outcome").await.unwrap();
        let err = service
            .update_idea_status(&item.id.to_string(), "completed")
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::NotIdea(_)));

        let err = service
            .update_idea_status(&item.id.to_string(), "abandoned")
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidStatus(_)));
    }

    #[tokio::test]
    async fn unpin_errors() {
        let (_dir, service) = service();
        let err = service.unpin(&Uuid::new_v4().to_string()).await.unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));

        let item = service.store_past("unpinned already").await.unwrap();
        let err = service.unpin(&item.id.to_string()).await.unwrap_err();
        assert!(matches!(err, MemoryError::NotPinned(_)));
    }

    #[tokio::test]
    async fn unpinned_note_leaves_active_context_but_stays_recallable() {
        let (_dir, service) = service();
        let note = service.store_pinned("prefer rebase over merge").await.unwrap();
        let id = note
            .strip_prefix("Note saved (")
            .and_then(|s| s.split(')').next())
            .unwrap()
            .to_string();

        service.unpin(&id).await.unwrap();
        let context = service.get_context().await.unwrap();
        assert!(!context.contains("## Notes to self"));

        let recalled = service.recall("rebase").await.unwrap();
        assert!(recalled.contains("prefer rebase over merge"));
    }

    #[tokio::test]
    async fn recall_falls_back_to_regex() {
        let (_dir, service) = service();
        service.store_past("deploy pipeline exploded at step #7").await.unwrap();

        // "#7" yields no indexable tokens; the regex fallback finds it.
        let recalled = service.recall("#7").await.unwrap();
        assert!(recalled.contains("deploy pipeline exploded"));
        assert!(recalled.starts_with("**"));
    }

    #[tokio::test]
    async fn recall_by_id_miss_is_a_message_not_an_error() {
        let (_dir, service) = service();
        let missing = Uuid::new_v4().to_string();
        let text = service.recall_by_id(&missing).await.unwrap();
        assert_eq!(text, format!("No memory with id \"{missing}\"."));

        let bogus = service.recall_by_id("not-a-uuid").await.unwrap();
        assert!(bogus.starts_with("No memory with id"));
    }
}

//! Per-iteration log collection.
//!
//! Entries mirror to `tracing` as they happen and accumulate for the
//! persisted [`IterationLog`] written at iteration end.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use seedling_store::{IterationLog, LogEntry, LogLevel, PhaseUsage};

pub struct IterationLogger {
    iteration_id: String,
    entries: Mutex<Vec<LogEntry>>,
}

impl IterationLogger {
    pub fn new(iteration_id: impl Into<String>) -> Self {
        Self {
            iteration_id: iteration_id.into(),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn iteration_id(&self) -> &str {
        &self.iteration_id
    }

    fn push(&self, level: LogLevel, message: String, context: Option<serde_json::Value>) {
        self.entries.lock().expect("logbook lock").push(LogEntry {
            timestamp: Utc::now(),
            level,
            message,
            context,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(iteration = %self.iteration_id, "{message}");
        self.push(LogLevel::Info, message, None);
    }

    pub fn info_with(&self, message: impl Into<String>, context: serde_json::Value) {
        let message = message.into();
        tracing::info!(iteration = %self.iteration_id, %context, "{message}");
        self.push(LogLevel::Info, message, Some(context));
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(iteration = %self.iteration_id, "{message}");
        self.push(LogLevel::Warn, message, None);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(iteration = %self.iteration_id, "{message}");
        self.push(LogLevel::Error, message, None);
    }

    pub fn debug(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(iteration = %self.iteration_id, "{message}");
        self.push(LogLevel::Debug, message, None);
    }

    /// Freeze the collected entries into the persistable log.
    pub fn into_log(self, token_usage: Option<BTreeMap<String, PhaseUsage>>) -> IterationLog {
        IterationLog {
            id: Uuid::new_v4(),
            iteration_id: self.iteration_id,
            entries: self.entries.into_inner().expect("logbook lock"),
            token_usage: token_usage.filter(|usage| !usage.is_empty()),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_accumulate_in_order() {
        let logger = IterationLogger::new("it-1");
        logger.info("first");
        logger.warn("second");
        logger.info_with("third", serde_json::json!({"pr": 4}));

        let log = logger.into_log(None);
        assert_eq!(log.iteration_id, "it-1");
        assert_eq!(log.entries.len(), 3);
        assert_eq!(log.entries[0].message, "first");
        assert!(matches!(log.entries[1].level, LogLevel::Warn));
        assert_eq!(log.entries[2].context.as_ref().unwrap()["pr"], 4);
    }

    #[test]
    fn empty_usage_map_collapses_to_none() {
        let logger = IterationLogger::new("it-2");
        let log = logger.into_log(Some(BTreeMap::new()));
        assert!(log.token_usage.is_none());
    }
}

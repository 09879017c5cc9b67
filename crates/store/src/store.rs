//! redb-backed record store with explicit secondary indexes.
//!
//! One database file, three collections:
//!
//! | Collection     | Primary table     | Secondary indexes                       |
//! |----------------|-------------------|-----------------------------------------|
//! | generated      | `generated`       | created_at desc, iteration_id           |
//! | memory         | `memory`          | (pinned, created_at desc), token index  |
//! | iteration_logs | `iteration_logs`  | created_at desc                         |
//!
//! Documents are serialized with `serde_json`.  Every write commits before
//! the call returns, so a record that was reported stored survives a crash
//! immediately afterwards.  Reads within one process observe prior writes
//! (read-your-writes), which the controller relies on across iterations.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use regex::RegexBuilder;
use uuid::Uuid;

use crate::schema::{GeneratedRecord, IterationLog, MemoryItem, PhaseUsage};
use crate::text;

// ── table definitions ─────────────────────────────────────────────────────────

/// `record id (uuid str) → json document`.
const GENERATED: TableDefinition<&str, &[u8]> = TableDefinition::new("generated");
/// `reverse-time key → record id`.  Ascending key order = newest first.
const GENERATED_BY_TIME: TableDefinition<&str, &str> = TableDefinition::new("generated_by_time");
/// `iteration id → newline-joined record id list`.
const GENERATED_BY_ITER: TableDefinition<&str, &str> =
    TableDefinition::new("generated_by_iteration");

/// `item id (uuid str) → json document`.
const MEMORY: TableDefinition<&str, &[u8]> = TableDefinition::new("memory");
/// `"pinned"|"unpinned" / reverse-time key → item id`.
const MEMORY_BY_FLAG: TableDefinition<&str, &str> = TableDefinition::new("memory_by_flag");
/// Inverted text index over content+summary: `token → newline-joined id list`.
const MEMORY_TOKENS: TableDefinition<&str, &str> = TableDefinition::new("memory_tokens");

/// `log id (uuid str) → json document`.
const ITERATION_LOGS: TableDefinition<&str, &[u8]> = TableDefinition::new("iteration_logs");
/// `reverse-time key → log id`.
const LOGS_BY_TIME: TableDefinition<&str, &str> = TableDefinition::new("iteration_logs_by_time");

// ── errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing database could not be reached or mutated.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// A stored document failed to deserialize.
    #[error("malformed record: {0}")]
    Corrupt(String),
    /// A caller-supplied search pattern did not compile.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

macro_rules! unavailable_from {
    ($($err:ty),+) => {
        $(impl From<$err> for StoreError {
            fn from(e: $err) -> Self {
                StoreError::Unavailable(e.to_string())
            }
        })+
    };
}

unavailable_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError
);

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

// ── key helpers ───────────────────────────────────────────────────────────────

/// Composite key that sorts newest-first under ascending lexicographic order:
/// zero-padded `(i64::MAX - created_at µs)` followed by the record id for
/// uniqueness.
fn time_key(created_at: DateTime<Utc>, id: Uuid) -> String {
    let micros = created_at.timestamp_micros();
    format!("{:019}/{id}", i64::MAX - micros)
}

fn flag_slug(pinned: bool) -> &'static str {
    if pinned { "pinned" } else { "unpinned" }
}

fn flag_time_key(pinned: bool, created_at: DateTime<Utc>, id: Uuid) -> String {
    format!("{}/{}", flag_slug(pinned), time_key(created_at, id))
}

/// End bound for a prefix range scan over `{flag}/…` keys.  `'0'` is the
/// first character after `'/'` in ASCII, so `"pinned/" .. "pinned0"` covers
/// exactly the keys carrying the prefix.
fn flag_range_end(pinned: bool) -> String {
    format!("{}0", flag_slug(pinned))
}

/// Append `id` to a newline-joined posting list.
fn append_posting(existing: Option<String>, id: &str) -> String {
    match existing {
        None => id.to_string(),
        Some(list) if list.is_empty() => id.to_string(),
        Some(list) => format!("{list}\n{id}"),
    }
}

// ── metrics ───────────────────────────────────────────────────────────────────

/// Numeric metric extractable from a [`GeneratedRecord`] for per-iteration
/// aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Cost,
    InputTokens,
    OutputTokens,
    CacheReadTokens,
}

impl Metric {
    /// Parse from the tool-facing metric name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "cost" => Some(Metric::Cost),
            "input_tokens" => Some(Metric::InputTokens),
            "output_tokens" => Some(Metric::OutputTokens),
            "cache_read_tokens" => Some(Metric::CacheReadTokens),
            _ => None,
        }
    }

    fn extract(&self, record: &GeneratedRecord) -> f64 {
        match self {
            Metric::Cost => record.cost,
            Metric::InputTokens => record.input_tokens as f64,
            Metric::OutputTokens => record.output_tokens as f64,
            Metric::CacheReadTokens => record.cache_read_tokens as f64,
        }
    }
}

/// A memory item paired with its lexical relevance score.
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub item: MemoryItem,
    pub score: f32,
}

// ── RecordStore ───────────────────────────────────────────────────────────────

pub struct RecordStore {
    db: Database,
    path: PathBuf,
}

impl RecordStore {
    /// Open or create the database file at `path`, ensuring all tables exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }
        let db = Database::create(&path)?;
        {
            let tx = db.begin_write()?;
            tx.open_table(GENERATED)?;
            tx.open_table(GENERATED_BY_TIME)?;
            tx.open_table(GENERATED_BY_ITER)?;
            tx.open_table(MEMORY)?;
            tx.open_table(MEMORY_BY_FLAG)?;
            tx.open_table(MEMORY_TOKENS)?;
            tx.open_table(ITERATION_LOGS)?;
            tx.open_table(LOGS_BY_TIME)?;
            tx.commit()?;
        }
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ── generated ─────────────────────────────────────────────────────────────

    pub fn insert_generated(&self, record: &GeneratedRecord) -> Result<()> {
        let id_str = record.id.to_string();
        let bytes = serde_json::to_vec(record)?;
        let tkey = time_key(record.created_at, record.id);

        let tx = self.db.begin_write()?;
        {
            let mut primary = tx.open_table(GENERATED)?;
            primary.insert(id_str.as_str(), bytes.as_slice())?;

            let mut by_time = tx.open_table(GENERATED_BY_TIME)?;
            by_time.insert(tkey.as_str(), id_str.as_str())?;

            if let Some(iteration) = &record.iteration_id {
                let mut by_iter = tx.open_table(GENERATED_BY_ITER)?;
                let existing = by_iter.get(iteration.as_str())?.map(|v| v.value().to_string());
                let updated = append_posting(existing, &id_str);
                by_iter.insert(iteration.as_str(), updated.as_str())?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn generated_by_id(&self, id: Uuid) -> Result<Option<GeneratedRecord>> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(GENERATED)?;
        let id_str = id.to_string();
        match tbl.get(id_str.as_str())? {
            None => Ok(None),
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
        }
    }

    /// Most recent exchanges, newest first.
    pub fn recent_generated(&self, limit: usize) -> Result<Vec<GeneratedRecord>> {
        let tx = self.db.begin_read()?;
        let by_time = tx.open_table(GENERATED_BY_TIME)?;
        let primary = tx.open_table(GENERATED)?;

        let mut out = Vec::new();
        for row in by_time.iter()? {
            if out.len() >= limit {
                break;
            }
            let (_, id) = row?;
            if let Some(doc) = primary.get(id.value())? {
                out.push(serde_json::from_slice(doc.value())?);
            }
        }
        Ok(out)
    }

    /// All exchanges recorded under one iteration id, in insertion order.
    pub fn generated_for_iteration(&self, iteration_id: &str) -> Result<Vec<GeneratedRecord>> {
        let tx = self.db.begin_read()?;
        let by_iter = tx.open_table(GENERATED_BY_ITER)?;
        let primary = tx.open_table(GENERATED)?;

        let ids = by_iter
            .get(iteration_id)?
            .map(|v| v.value().to_string())
            .unwrap_or_default();
        let mut out = Vec::new();
        for id in ids.lines().filter(|s| !s.is_empty()) {
            if let Some(doc) = primary.get(id)? {
                out.push(serde_json::from_slice(doc.value())?);
            }
        }
        Ok(out)
    }

    /// Aggregate token usage and cost per phase for one iteration.
    pub fn usage_by_phase(&self, iteration_id: &str) -> Result<BTreeMap<String, PhaseUsage>> {
        let mut out: BTreeMap<String, PhaseUsage> = BTreeMap::new();
        for record in self.generated_for_iteration(iteration_id)? {
            let usage = out.entry(record.phase.to_string()).or_default();
            usage.calls += 1;
            usage.input_tokens += record.input_tokens;
            usage.output_tokens += record.output_tokens;
            usage.cache_read_tokens += record.cache_read_tokens;
            usage.cache_write_tokens +=
                record.cache_write_5m_tokens + record.cache_write_1h_tokens;
            usage.cost += record.cost;
        }
        Ok(out)
    }

    /// Sum `metric` per iteration over the most recent `limit` iterations,
    /// newest iteration first.
    pub fn iteration_metric(&self, metric: Metric, limit: usize) -> Result<Vec<(String, f64)>> {
        let tx = self.db.begin_read()?;
        let by_time = tx.open_table(GENERATED_BY_TIME)?;
        let primary = tx.open_table(GENERATED)?;

        // Walk newest-first; the first sighting of an iteration id fixes its
        // position.  Once `limit` iterations are known, records from older
        // iterations are skipped.
        let mut order: Vec<String> = Vec::new();
        let mut sums: BTreeMap<String, f64> = BTreeMap::new();
        for row in by_time.iter()? {
            let (_, id) = row?;
            let Some(doc) = primary.get(id.value())? else {
                continue;
            };
            let record: GeneratedRecord = serde_json::from_slice(doc.value())?;
            let Some(iteration) = record.iteration_id.clone() else {
                continue;
            };
            if !sums.contains_key(&iteration) {
                if order.len() >= limit {
                    continue;
                }
                order.push(iteration.clone());
            }
            *sums.entry(iteration).or_insert(0.0) += metric.extract(&record);
        }
        Ok(order
            .into_iter()
            .map(|iteration| {
                let total = sums.get(&iteration).copied().unwrap_or(0.0);
                (iteration, total)
            })
            .collect())
    }

    /// Distinct model ids seen across all recorded exchanges.
    pub fn distinct_models(&self) -> Result<Vec<String>> {
        let tx = self.db.begin_read()?;
        let primary = tx.open_table(GENERATED)?;
        let mut models = BTreeSet::new();
        for row in primary.iter()? {
            let (_, doc) = row?;
            let record: GeneratedRecord = serde_json::from_slice(doc.value())?;
            models.insert(record.model_id);
        }
        Ok(models.into_iter().collect())
    }

    /// Delete exchanges older than `cutoff`.  Returns the number removed.
    pub fn delete_generated_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        // Collect victims under a read transaction first.
        let victims: Vec<GeneratedRecord> = {
            let tx = self.db.begin_read()?;
            let primary = tx.open_table(GENERATED)?;
            let mut found = Vec::new();
            for row in primary.iter()? {
                let (_, doc) = row?;
                let record: GeneratedRecord = serde_json::from_slice(doc.value())?;
                if record.created_at < cutoff {
                    found.push(record);
                }
            }
            found
        };
        if victims.is_empty() {
            return Ok(0);
        }

        let tx = self.db.begin_write()?;
        {
            let mut primary = tx.open_table(GENERATED)?;
            let mut by_time = tx.open_table(GENERATED_BY_TIME)?;
            let mut by_iter = tx.open_table(GENERATED_BY_ITER)?;
            for record in &victims {
                let id_str = record.id.to_string();
                primary.remove(id_str.as_str())?;
                by_time.remove(time_key(record.created_at, record.id).as_str())?;
                if let Some(iteration) = &record.iteration_id {
                    let remaining = by_iter
                        .get(iteration.as_str())?
                        .map(|v| v.value().to_string())
                        .unwrap_or_default()
                        .lines()
                        .filter(|line| *line != id_str && !line.is_empty())
                        .collect::<Vec<_>>()
                        .join("\n");
                    if remaining.is_empty() {
                        by_iter.remove(iteration.as_str())?;
                    } else {
                        by_iter.insert(iteration.as_str(), remaining.as_str())?;
                    }
                }
            }
        }
        tx.commit()?;
        Ok(victims.len())
    }

    // ── memory ────────────────────────────────────────────────────────────────

    pub fn insert_memory(&self, item: &MemoryItem) -> Result<()> {
        let id_str = item.id.to_string();
        let bytes = serde_json::to_vec(item)?;
        let fkey = flag_time_key(item.pinned, item.created_at, item.id);

        let tx = self.db.begin_write()?;
        {
            let mut primary = tx.open_table(MEMORY)?;
            primary.insert(id_str.as_str(), bytes.as_slice())?;

            let mut by_flag = tx.open_table(MEMORY_BY_FLAG)?;
            by_flag.insert(fkey.as_str(), id_str.as_str())?;

            // Content and summary are immutable after creation, so the token
            // index is only ever written here.
            let mut tokens = tx.open_table(MEMORY_TOKENS)?;
            let indexed = format!("{} {}", item.content, item.summary);
            for token in text::tokenize(&indexed) {
                let existing = tokens.get(token.as_str())?.map(|v| v.value().to_string());
                let updated = append_posting(existing, &id_str);
                tokens.insert(token.as_str(), updated.as_str())?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn memory_by_id(&self, id: Uuid) -> Result<Option<MemoryItem>> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(MEMORY)?;
        let id_str = id.to_string();
        match tbl.get(id_str.as_str())? {
            None => Ok(None),
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
        }
    }

    /// Rewrite a memory item in place.  Only `pinned`, `idea_status`,
    /// `idea_context`, and `updated_at` may change; when the pin flag flips,
    /// the item moves between the flag-index partitions.
    pub fn update_memory(&self, item: &MemoryItem) -> Result<()> {
        let id_str = item.id.to_string();
        let previous = self
            .memory_by_id(item.id)?
            .ok_or_else(|| StoreError::Corrupt(format!("update of unknown memory {id_str}")))?;
        let bytes = serde_json::to_vec(item)?;

        let tx = self.db.begin_write()?;
        {
            let mut primary = tx.open_table(MEMORY)?;
            primary.insert(id_str.as_str(), bytes.as_slice())?;

            if previous.pinned != item.pinned {
                let mut by_flag = tx.open_table(MEMORY_BY_FLAG)?;
                by_flag
                    .remove(flag_time_key(previous.pinned, previous.created_at, item.id).as_str())?;
                by_flag.insert(
                    flag_time_key(item.pinned, item.created_at, item.id).as_str(),
                    id_str.as_str(),
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Memory items newest first, optionally restricted to one pin state.
    pub fn memory_newest_first(
        &self,
        pinned: Option<bool>,
        limit: usize,
    ) -> Result<Vec<MemoryItem>> {
        match pinned {
            Some(flag) => self.memory_by_flag(flag, limit),
            None => {
                // Merge both partitions, then re-sort by recency.
                let mut all = self.memory_by_flag(true, limit)?;
                all.extend(self.memory_by_flag(false, limit)?);
                all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                all.truncate(limit);
                Ok(all)
            }
        }
    }

    fn memory_by_flag(&self, pinned: bool, limit: usize) -> Result<Vec<MemoryItem>> {
        let tx = self.db.begin_read()?;
        let by_flag = tx.open_table(MEMORY_BY_FLAG)?;
        let primary = tx.open_table(MEMORY)?;

        let start = format!("{}/", flag_slug(pinned));
        let end = flag_range_end(pinned);
        let mut out = Vec::new();
        for row in by_flag.range(start.as_str()..end.as_str())? {
            if out.len() >= limit {
                break;
            }
            let (_, id) = row?;
            if let Some(doc) = primary.get(id.value())? {
                out.push(serde_json::from_slice(doc.value())?);
            }
        }
        Ok(out)
    }

    /// Full-text search over memory content+summary, ordered by descending
    /// lexical score, then recency.
    pub fn search_memory(&self, query: &str, limit: usize) -> Result<Vec<ScoredMemory>> {
        let query_terms = text::tokenize(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let tx = self.db.begin_read()?;
        let tokens = tx.open_table(MEMORY_TOKENS)?;
        let primary = tx.open_table(MEMORY)?;

        let mut candidates: HashSet<String> = HashSet::new();
        for term in &query_terms {
            if let Some(list) = tokens.get(term.as_str())? {
                for id in list.value().lines().filter(|s| !s.is_empty()) {
                    candidates.insert(id.to_string());
                }
            }
        }

        let mut scored = Vec::new();
        for id in candidates {
            let Some(doc) = primary.get(id.as_str())? else {
                continue;
            };
            let item: MemoryItem = serde_json::from_slice(doc.value())?;
            let haystack = format!("{} {}", item.content, item.summary);
            let score = text::text_score(&haystack, &query_terms);
            if score > 0.0 {
                scored.push(ScoredMemory { item, score });
            }
        }
        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.item.created_at.cmp(&a.item.created_at))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    /// Case-insensitive regex scan over summary+content.  Fallback for when
    /// the token index has no hits (e.g. substring or punctuation queries).
    pub fn regex_search_memory(&self, pattern: &str, limit: usize) -> Result<Vec<MemoryItem>> {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| StoreError::InvalidQuery(e.to_string()))?;

        let mut matches: Vec<MemoryItem> = Vec::new();
        for item in self.memory_newest_first(None, usize::MAX)? {
            if re.is_match(&item.summary) || re.is_match(&item.content) {
                matches.push(item);
                if matches.len() >= limit {
                    break;
                }
            }
        }
        Ok(matches)
    }

    // ── iteration logs ────────────────────────────────────────────────────────

    pub fn insert_iteration_log(&self, log: &IterationLog) -> Result<()> {
        let id_str = log.id.to_string();
        let bytes = serde_json::to_vec(log)?;
        let tkey = time_key(log.created_at, log.id);

        let tx = self.db.begin_write()?;
        {
            let mut primary = tx.open_table(ITERATION_LOGS)?;
            primary.insert(id_str.as_str(), bytes.as_slice())?;
            let mut by_time = tx.open_table(LOGS_BY_TIME)?;
            by_time.insert(tkey.as_str(), id_str.as_str())?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn recent_iteration_logs(&self, limit: usize) -> Result<Vec<IterationLog>> {
        let tx = self.db.begin_read()?;
        let by_time = tx.open_table(LOGS_BY_TIME)?;
        let primary = tx.open_table(ITERATION_LOGS)?;

        let mut out = Vec::new();
        for row in by_time.iter()? {
            if out.len() >= limit {
                break;
            }
            let (_, id) = row?;
            if let Some(doc) = primary.get(id.value())? {
                out.push(serde_json::from_slice(doc.value())?);
            }
        }
        Ok(out)
    }
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::schema::{LogEntry, LogLevel, Phase};

    fn open_store() -> (tempfile::TempDir, RecordStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path().join("test.redb")).unwrap();
        (dir, store)
    }

    fn sample_generated(phase: Phase, iteration: Option<&str>, cost: f64) -> GeneratedRecord {
        GeneratedRecord {
            id: Uuid::new_v4(),
            phase,
            model_id: "claude-sonnet-4-5".to_string(),
            iteration_id: iteration.map(String::from),
            system: serde_json::json!([]),
            messages: serde_json::json!([]),
            response: serde_json::json!([]),
            input_tokens: 100,
            output_tokens: 50,
            cache_write_5m_tokens: 10,
            cache_write_1h_tokens: 0,
            cache_read_tokens: 40,
            cost,
            batch: true,
            stop_reason: Some("end_turn".to_string()),
            created_at: Utc::now(),
        }
    }

    // ── generated ─────────────────────────────────────────────────────────────

    #[test]
    fn insert_and_fetch_generated() {
        let (_dir, store) = open_store();
        let record = sample_generated(Phase::Planner, Some("it-1"), 0.5);
        store.insert_generated(&record).unwrap();

        let back = store.generated_by_id(record.id).unwrap().unwrap();
        assert_eq!(back.phase, Phase::Planner);
        assert_eq!(back.iteration_id.as_deref(), Some("it-1"));
        assert_eq!(back.input_tokens, 100);
    }

    #[test]
    fn recent_generated_is_newest_first() {
        let (_dir, store) = open_store();
        let mut older = sample_generated(Phase::Builder, None, 0.1);
        older.created_at = Utc::now() - Duration::minutes(5);
        let newer = sample_generated(Phase::Fixer, None, 0.2);
        store.insert_generated(&older).unwrap();
        store.insert_generated(&newer).unwrap();

        let recent = store.recent_generated(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, newer.id);
        assert_eq!(recent[1].id, older.id);
    }

    #[test]
    fn usage_by_phase_sums_tokens_and_cost() {
        let (_dir, store) = open_store();
        store
            .insert_generated(&sample_generated(Phase::Builder, Some("it-2"), 0.25))
            .unwrap();
        store
            .insert_generated(&sample_generated(Phase::Builder, Some("it-2"), 0.25))
            .unwrap();
        store
            .insert_generated(&sample_generated(Phase::Planner, Some("it-2"), 0.1))
            .unwrap();
        // A record from a different iteration must not leak in.
        store
            .insert_generated(&sample_generated(Phase::Builder, Some("other"), 9.0))
            .unwrap();

        let usage = store.usage_by_phase("it-2").unwrap();
        let builder = &usage["builder"];
        assert_eq!(builder.calls, 2);
        assert_eq!(builder.input_tokens, 200);
        assert_eq!(builder.cache_write_tokens, 20);
        assert!((builder.cost - 0.5).abs() < 1e-9);
        assert_eq!(usage["planner"].calls, 1);
        assert!(!usage.contains_key("fixer"));
    }

    #[test]
    fn iteration_metric_groups_and_limits() {
        let (_dir, store) = open_store();
        let mut old = sample_generated(Phase::Builder, Some("old-iter"), 1.0);
        old.created_at = Utc::now() - Duration::hours(2);
        store.insert_generated(&old).unwrap();
        let mut mid = sample_generated(Phase::Builder, Some("mid-iter"), 2.0);
        mid.created_at = Utc::now() - Duration::hours(1);
        store.insert_generated(&mid).unwrap();
        store
            .insert_generated(&sample_generated(Phase::Builder, Some("new-iter"), 3.0))
            .unwrap();

        let metrics = store.iteration_metric(Metric::Cost, 2).unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].0, "new-iter");
        assert!((metrics[0].1 - 3.0).abs() < 1e-9);
        assert_eq!(metrics[1].0, "mid-iter");
    }

    #[test]
    fn delete_older_than_removes_from_all_indexes() {
        let (_dir, store) = open_store();
        let mut ancient = sample_generated(Phase::Builder, Some("gone"), 1.0);
        ancient.created_at = Utc::now() - Duration::days(30);
        store.insert_generated(&ancient).unwrap();
        store
            .insert_generated(&sample_generated(Phase::Builder, Some("kept"), 1.0))
            .unwrap();

        let removed = store
            .delete_generated_older_than(Utc::now() - Duration::days(1))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.generated_by_id(ancient.id).unwrap().is_none());
        assert!(store.generated_for_iteration("gone").unwrap().is_empty());
        assert_eq!(store.recent_generated(10).unwrap().len(), 1);
    }

    #[test]
    fn distinct_models_deduplicates() {
        let (_dir, store) = open_store();
        store
            .insert_generated(&sample_generated(Phase::Planner, None, 0.1))
            .unwrap();
        let mut other = sample_generated(Phase::Memory, None, 0.1);
        other.model_id = "claude-haiku-4-5".to_string();
        store.insert_generated(&other).unwrap();
        store
            .insert_generated(&sample_generated(Phase::Builder, None, 0.1))
            .unwrap();

        let models = store.distinct_models().unwrap();
        assert_eq!(models.len(), 2);
        assert!(models.contains(&"claude-haiku-4-5".to_string()));
    }

    // ── memory ────────────────────────────────────────────────────────────────

    #[test]
    fn memory_flag_index_partitions_by_pin_state() {
        let (_dir, store) = open_store();
        let pinned = MemoryItem::new("remember the build flags", "build flags", true);
        let unpinned = MemoryItem::new("one-off CI failure", "flaky run", false);
        store.insert_memory(&pinned).unwrap();
        store.insert_memory(&unpinned).unwrap();

        let pins = store.memory_newest_first(Some(true), 10).unwrap();
        assert_eq!(pins.len(), 1);
        assert_eq!(pins[0].id, pinned.id);
        let rest = store.memory_newest_first(Some(false), 10).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, unpinned.id);
    }

    #[test]
    fn update_moves_item_between_flag_partitions() {
        let (_dir, store) = open_store();
        let mut item = MemoryItem::new("pinned note", "note", true);
        store.insert_memory(&item).unwrap();

        item.pinned = false;
        item.updated_at = Utc::now();
        store.update_memory(&item).unwrap();

        assert!(store.memory_newest_first(Some(true), 10).unwrap().is_empty());
        let unpinned = store.memory_newest_first(Some(false), 10).unwrap();
        assert_eq!(unpinned.len(), 1);
        assert!(!unpinned[0].pinned);
    }

    #[test]
    fn text_search_ranks_by_match_ratio() {
        let (_dir, store) = open_store();
        let strong = MemoryItem::new(
            "the integration timeout keeps breaking deploys",
            "integration timeout",
            false,
        );
        let weak = MemoryItem::new("raised the timeout in the deploy script", "timeout bump", false);
        let unrelated = MemoryItem::new("renamed a module", "rename", false);
        for item in [&strong, &weak, &unrelated] {
            store.insert_memory(item).unwrap();
        }

        let hits = store.search_memory("integration timeout deploys", 5).unwrap();
        assert!(hits.len() >= 2);
        assert_eq!(hits[0].item.id, strong.id);
        assert!(hits[0].score > hits[1].score);
        assert!(hits.iter().all(|h| h.item.id != unrelated.id));
    }

    #[test]
    fn regex_search_is_case_insensitive() {
        let (_dir, store) = open_store();
        let item = MemoryItem::new("Merged PR #42 successfully", "merged pr", false);
        store.insert_memory(&item).unwrap();

        let hits = store.regex_search_memory("MERGED pr", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, item.id);

        assert!(store.regex_search_memory("[", 5).is_err());
    }

    // ── iteration logs ────────────────────────────────────────────────────────

    #[test]
    fn iteration_log_roundtrip_and_ordering() {
        let (_dir, store) = open_store();
        let first = IterationLog {
            id: Uuid::new_v4(),
            iteration_id: "it-a".to_string(),
            entries: vec![LogEntry {
                timestamp: Utc::now(),
                level: LogLevel::Info,
                message: "planning".to_string(),
                context: None,
            }],
            token_usage: None,
            created_at: Utc::now() - Duration::minutes(1),
        };
        let second = IterationLog {
            id: Uuid::new_v4(),
            iteration_id: "it-b".to_string(),
            entries: Vec::new(),
            token_usage: None,
            created_at: Utc::now(),
        };
        store.insert_iteration_log(&first).unwrap();
        store.insert_iteration_log(&second).unwrap();

        let logs = store.recent_iteration_logs(10).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].iteration_id, "it-b");
        assert_eq!(logs[1].iteration_id, "it-a");
        assert_eq!(logs[1].entries.len(), 1);
    }
}

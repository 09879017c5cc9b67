//! Tokenizer and lexical scoring for the memory text index.

use std::collections::BTreeSet;

/// Common English stop words excluded from the indexed term set.
/// Filtering these keeps high-frequency words from producing false-positive
/// matches that drown out genuinely relevant items.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "was", "has", "are", "not", "this", "that",
    "with", "from", "have", "you", "can", "its", "will", "but", "they",
    "all", "been", "also", "into", "more", "than", "when", "who", "what",
    "how", "out", "our", "new", "now",
];

pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(|t| t.to_lowercase())
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Fraction of query terms present in `text`, in `[0.0, 1.0]`.
/// Zero when the query has no indexable terms.
pub fn text_score(text: &str, query_terms: &BTreeSet<String>) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let terms = tokenize(text);
    let overlap = query_terms.intersection(&terms).count() as f32;
    overlap / query_terms.len() as f32
}

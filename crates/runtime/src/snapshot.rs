//! Codebase snapshot assembly and the possibly-dead-function scan.
//!
//! The snapshot is the large stable block of the system prompt: one pass over
//! the working copy (respecting .gitignore), concatenated with per-file
//! headers, capped by size.  Because it sits under the cache marker, its
//! byte-stability between calls is what makes prompt caching pay off.

use std::collections::HashMap;
use std::path::Path;

use ignore::WalkBuilder;

/// Snapshot ceiling.  Beyond this the snapshot notes the truncation so the
/// model knows its view is partial.
pub const SNAPSHOT_BYTE_CAP: usize = 200_000;

/// Files larger than this are listed but not inlined.
const FILE_BYTE_CAP: u64 = 50_000;

/// Walk the workspace and render a deterministic snapshot of its text files.
pub fn snapshot(root: &Path, byte_cap: usize) -> String {
    let mut files: Vec<(String, Option<String>)> = Vec::new();
    for entry in WalkBuilder::new(root).hidden(true).build().flatten() {
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .display()
            .to_string();
        let too_big = entry
            .metadata()
            .map(|m| m.len() > FILE_BYTE_CAP)
            .unwrap_or(true);
        if too_big {
            files.push((rel, None));
            continue;
        }
        match std::fs::read_to_string(entry.path()) {
            Ok(content) => files.push((rel, Some(content))),
            // Binary or unreadable: list the path only.
            Err(_) => files.push((rel, None)),
        }
    }
    // Deterministic order keeps the cached prefix byte-stable across calls.
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = String::new();
    let mut truncated = false;
    for (path, content) in files {
        let block = match content {
            Some(content) => format!("=== {path} ===\n{content}\n"),
            None => format!("=== {path} (omitted) ===\n"),
        };
        if out.len() + block.len() > byte_cap {
            truncated = true;
            break;
        }
        out.push_str(&block);
    }
    if truncated {
        out.push_str("(snapshot truncated)\n");
    }
    out
}

/// Heuristic scan for functions that are defined but never referenced
/// elsewhere.  Matches Rust, JavaScript/TypeScript, and Python definition
/// forms; a name whose only occurrence is its definition is reported.
pub fn possibly_dead_functions(root: &Path) -> Vec<String> {
    let def_re = regex::Regex::new(r"(?m)^\s*(?:pub\s+)?(?:async\s+)?(?:fn|function|def)\s+([A-Za-z_][A-Za-z0-9_]*)")
        .expect("static regex");

    // Two passes over the same file set: collect definitions first, then
    // count every occurrence, so references in files walked before the
    // definition still count.
    let mut files: Vec<(String, String)> = Vec::new();
    for entry in WalkBuilder::new(root).hidden(true).build().flatten() {
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .display()
            .to_string();
        files.push((rel, content));
    }

    let mut definitions: HashMap<String, String> = HashMap::new();
    for (rel, content) in &files {
        for captures in def_re.captures_iter(content) {
            definitions
                .entry(captures[1].to_string())
                .or_insert_with(|| rel.clone());
        }
    }
    // Count whole-identifier occurrences, so `caller` is not credited with
    // the references to `caller2`.
    let mut occurrences: HashMap<&str, usize> = definitions
        .keys()
        .map(|name| (name.as_str(), 0usize))
        .collect();
    for (_, content) in &files {
        for token in content.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
            if let Some(count) = occurrences.get_mut(token) {
                *count += 1;
            }
        }
    }
    let occurrences: HashMap<String, usize> = occurrences
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect();

    let mut dead: Vec<String> = definitions
        .into_iter()
        .filter(|(name, _)| !matches!(name.as_str(), "main" | "new" | "default"))
        .filter(|(name, _)| occurrences.get(name).copied().unwrap_or(0) <= 1)
        .map(|(name, site)| format!("{name} ({site})"))
        .collect();
    dead.sort();
    dead
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_sorted_and_capped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.rs"), "fn b() {}\n").unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();

        let snap = snapshot(dir.path(), 100_000);
        let a_at = snap.find("=== a.rs ===").unwrap();
        let b_at = snap.find("=== b.rs ===").unwrap();
        assert!(a_at < b_at);
        assert!(snap.contains("fn b() {}"));

        let tiny = snapshot(dir.path(), 10);
        assert!(tiny.contains("(snapshot truncated)"));
    }

    #[test]
    fn dead_scan_reports_unreferenced_functions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("lib.rs"),
            "fn used() {}\nfn unused_helper() {}\nfn main() { used(); }\n",
        )
        .unwrap();

        let dead = possibly_dead_functions(dir.path());
        assert_eq!(dead.len(), 1);
        assert!(dead[0].starts_with("unused_helper"));
    }

    #[test]
    fn dead_scan_sees_cross_file_references() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "pub fn shared_util() {}\n").unwrap();
        std::fs::write(dir.path().join("b.rs"), "fn caller() { shared_util(); caller2(); }\nfn caller2() {}\n").unwrap();

        let dead = possibly_dead_functions(dir.path());
        assert!(!dead.iter().any(|d| d.starts_with("shared_util")));
        assert!(dead.iter().any(|d| d.starts_with("caller ")));
    }
}

//! Read-only filesystem tools: file reads, content grep, fuzzy file search,
//! and directory listings.  All paths are workspace-relative and boundary
//! checked.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use globset::Glob;
use ignore::WalkBuilder;
use serde_json::json;

use seedling_llm::ToolDefinition;

use crate::{Tool, ToolError, ToolOutput, optional_str, optional_u64, require_str};

/// Byte cap on a single file read.
const READ_BYTE_CAP: usize = 65_536;
/// Result cap for grep and file search.
const SEARCH_RESULT_CAP: usize = 100;

/// Find the largest byte offset ≤ `max` that falls on a UTF-8 character
/// boundary.  Safe to use as `&s[..truncate_byte_boundary(s, max)]`.
fn truncate_byte_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// Resolve `rel` under `root`, rejecting escapes.
fn resolve(root: &Path, rel: &str) -> Result<PathBuf, ToolError> {
    let full = root.join(rel);
    let canonical = full
        .canonicalize()
        .map_err(|e| ToolError::Usage(format!("cannot resolve path '{rel}': {e}")))?;
    let root_canonical = root
        .canonicalize()
        .map_err(|e| ToolError::Usage(format!("workspace root unavailable: {e}")))?;
    if !canonical.starts_with(&root_canonical) {
        return Err(ToolError::Usage(format!(
            "path escapes workspace boundary: {rel}"
        )));
    }
    Ok(canonical)
}

// ── read_file ─────────────────────────────────────────────────────────────────

pub struct ReadFileTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Read a file from the workspace, optionally a line range.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "filePath": {"type": "string", "description": "Path relative to the workspace root"},
                    "startLine": {"type": "integer", "description": "First line to read (1-based)"},
                    "endLine": {"type": "integer", "description": "Last line to read (inclusive)"}
                },
                "required": ["filePath"]
            }),
        }
    }

    async fn run(&self, input: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        let rel = require_str(input, "filePath")?;
        let path = match resolve(&self.root, rel) {
            Ok(path) => path,
            Err(err) => return Ok(ToolOutput::err(err.to_string())),
        };
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => return Ok(ToolOutput::err(format!("cannot read {rel}: {e}"))),
        };

        let start = optional_u64(input, "startLine").map(|n| n.max(1) as usize);
        let end = optional_u64(input, "endLine").map(|n| n as usize);
        let sliced = match (start, end) {
            (None, None) => content,
            (start, end) => {
                let start = start.unwrap_or(1);
                let lines: Vec<&str> = content.lines().collect();
                let end = end.unwrap_or(lines.len()).min(lines.len());
                if start > end {
                    return Ok(ToolOutput::err(format!(
                        "startLine {start} is past endLine {end}"
                    )));
                }
                lines[start - 1..end].join("\n")
            }
        };

        let truncated = if sliced.len() > READ_BYTE_CAP {
            let cut = truncate_byte_boundary(&sliced, READ_BYTE_CAP);
            format!("{}…[truncated at {} bytes]", &sliced[..cut], READ_BYTE_CAP)
        } else {
            sliced
        };
        Ok(ToolOutput::ok(truncated))
    }
}

// ── grep_search ───────────────────────────────────────────────────────────────

pub struct GrepSearchTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for GrepSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "grep_search".to_string(),
            description: "Search file contents with a regex; respects .gitignore.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Regex to match against lines"},
                    "includePattern": {"type": "string", "description": "Glob restricting searched files, e.g. src/**/*.rs"}
                },
                "required": ["query"]
            }),
        }
    }

    async fn run(&self, input: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        let query = require_str(input, "query")?;
        let re = match regex::Regex::new(query) {
            Ok(re) => re,
            Err(e) => return Ok(ToolOutput::err(format!("invalid regex: {e}"))),
        };
        let glob = match optional_str(input, "includePattern") {
            Some(pattern) => match Glob::new(pattern) {
                Ok(glob) => Some(glob.compile_matcher()),
                Err(e) => return Ok(ToolOutput::err(format!("invalid glob: {e}"))),
            },
            None => None,
        };

        let mut hits: Vec<String> = Vec::new();
        for entry in WalkBuilder::new(&self.root).hidden(true).build().flatten() {
            if hits.len() >= SEARCH_RESULT_CAP {
                break;
            }
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path());
            if let Some(glob) = &glob {
                if !glob.is_match(rel) {
                    continue;
                }
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            for (lineno, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    hits.push(format!("{}:{}: {}", rel.display(), lineno + 1, line.trim_end()));
                    if hits.len() >= SEARCH_RESULT_CAP {
                        break;
                    }
                }
            }
        }

        if hits.is_empty() {
            Ok(ToolOutput::ok(format!("No matches for /{query}/.")))
        } else {
            Ok(ToolOutput::ok(hits.join("\n")))
        }
    }
}

// ── file_search ───────────────────────────────────────────────────────────────

pub struct FileSearchTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for FileSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file_search".to_string(),
            description: "Find files whose path contains the query (case-insensitive)."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"}
                },
                "required": ["query"]
            }),
        }
    }

    async fn run(&self, input: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        let query = require_str(input, "query")?.to_lowercase();
        let mut matches: Vec<String> = Vec::new();
        for entry in WalkBuilder::new(&self.root).hidden(true).build().flatten() {
            if matches.len() >= SEARCH_RESULT_CAP {
                break;
            }
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            if rel.to_lowercase().contains(&query) {
                matches.push(rel);
            }
        }
        if matches.is_empty() {
            Ok(ToolOutput::ok(format!("No files matched \"{query}\".")))
        } else {
            matches.sort();
            Ok(ToolOutput::ok(matches.join("\n")))
        }
    }
}

// ── list_directory ────────────────────────────────────────────────────────────

pub struct ListDirectoryTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_directory".to_string(),
            description: "List the entries of a workspace directory.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Directory path relative to the workspace root; \".\" for the root"}
                },
                "required": ["path"]
            }),
        }
    }

    async fn run(&self, input: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        let rel = require_str(input, "path")?;
        let path = match resolve(&self.root, rel) {
            Ok(path) => path,
            Err(err) => return Ok(ToolOutput::err(err.to_string())),
        };
        let entries = match std::fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) => return Ok(ToolOutput::err(format!("cannot list {rel}: {e}"))),
        };
        let mut names: Vec<String> = entries
            .flatten()
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                if entry.file_type().is_ok_and(|t| t.is_dir()) {
                    format!("{name}/")
                } else {
                    name
                }
            })
            .collect();
        names.sort();
        Ok(ToolOutput::ok(names.join("\n")))
    }
}

// ── tests ─────────────────────────────────────────────────────────────────────

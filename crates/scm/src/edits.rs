//! Structured edit operations and their apply semantics.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One structured change to the working copy — a closed sum, matched
/// exhaustively wherever edits are consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EditOperation {
    Replace {
        path: String,
        old_string: String,
        new_string: String,
    },
    Create {
        path: String,
        content: String,
    },
    Delete {
        path: String,
    },
}

impl EditOperation {
    pub fn path(&self) -> &str {
        match self {
            EditOperation::Replace { path, .. }
            | EditOperation::Create { path, .. }
            | EditOperation::Delete { path } => path,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EditError {
    #[error("oldString not found in {path}")]
    NotFound { path: String },
    /// The single-match invariant prevents silent wrong-site edits when the
    /// model under-contextualizes its target.
    #[error("oldString matches multiple locations in {path}")]
    Ambiguous { path: String },
    #[error("invalid edit: {0}")]
    Invalid(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Resolve a workspace-relative path, rejecting escapes.
fn resolve(root: &Path, path: &str) -> Result<PathBuf, EditError> {
    if path.is_empty() {
        return Err(EditError::Invalid("empty path".to_string()));
    }
    let rel = Path::new(path);
    if rel.is_absolute()
        || rel
            .components()
            .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(EditError::Invalid(format!(
            "path escapes workspace boundary: {path}"
        )));
    }
    Ok(root.join(rel))
}

/// Apply a single operation to the working copy rooted at `root`.
///
/// Replace enforces single-match semantics: `old_string` must occur exactly
/// once in the target file, otherwise the file is left unchanged and the
/// operation fails.
pub fn apply_edit(root: &Path, op: &EditOperation) -> Result<(), EditError> {
    match op {
        EditOperation::Replace {
            path,
            old_string,
            new_string,
        } => {
            if old_string.is_empty() {
                return Err(EditError::Invalid(format!(
                    "empty oldString for {path}"
                )));
            }
            let full = resolve(root, path)?;
            let content = std::fs::read_to_string(&full).map_err(|source| EditError::Io {
                path: path.clone(),
                source,
            })?;
            match content.match_indices(old_string.as_str()).count() {
                0 => Err(EditError::NotFound { path: path.clone() }),
                1 => {
                    let updated = content.replacen(old_string.as_str(), new_string, 1);
                    std::fs::write(&full, updated).map_err(|source| EditError::Io {
                        path: path.clone(),
                        source,
                    })
                }
                _ => Err(EditError::Ambiguous { path: path.clone() }),
            }
        }
        EditOperation::Create { path, content } => {
            let full = resolve(root, path)?;
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).map_err(|source| EditError::Io {
                    path: path.clone(),
                    source,
                })?;
            }
            std::fs::write(&full, content).map_err(|source| EditError::Io {
                path: path.clone(),
                source,
            })
        }
        EditOperation::Delete { path } => {
            let full = resolve(root, path)?;
            std::fs::remove_file(&full).map_err(|source| EditError::Io {
                path: path.clone(),
                source,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replace(path: &str, old: &str, new: &str) -> EditOperation {
        EditOperation::Replace {
            path: path.to_string(),
            old_string: old.to_string(),
            new_string: new.to_string(),
        }
    }

    #[test]
    fn replace_splices_single_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn one() -> u8 { 1 }").unwrap();

        apply_edit(dir.path(), &replace("a.rs", "{ 1 }", "{ 2 }")).unwrap();
        let content = std::fs::read_to_string(dir.path().join("a.rs")).unwrap();
        assert_eq!(content, "fn one() -> u8 { 2 }");
    }

    #[test]
    fn replace_fails_when_absent_and_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "original").unwrap();

        let err = apply_edit(dir.path(), &replace("a.rs", "missing", "x")).unwrap_err();
        assert!(matches!(err, EditError::NotFound { .. }));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.rs")).unwrap(),
            "original"
        );
    }

    #[test]
    fn replace_fails_on_multiple_matches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "foo bar foo").unwrap();

        let err = apply_edit(dir.path(), &replace("a.rs", "foo", "baz")).unwrap_err();
        assert!(err.to_string().contains("matches multiple locations"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.rs")).unwrap(),
            "foo bar foo"
        );
    }

    #[test]
    fn create_then_delete_restores_prior_state() {
        let dir = tempfile::tempdir().unwrap();
        let create = EditOperation::Create {
            path: "src/new.rs".to_string(),
            content: "pub fn fresh() {}".to_string(),
        };
        apply_edit(dir.path(), &create).unwrap();
        assert!(dir.path().join("src/new.rs").exists());

        let delete = EditOperation::Delete {
            path: "src/new.rs".to_string(),
        };
        apply_edit(dir.path(), &delete).unwrap();
        assert!(!dir.path().join("src/new.rs").exists());
    }

    #[test]
    fn paths_cannot_escape_the_workspace() {
        let dir = tempfile::tempdir().unwrap();
        for path in ["../outside.rs", "/etc/passwd", ""] {
            let op = EditOperation::Create {
                path: path.to_string(),
                content: String::new(),
            };
            assert!(matches!(
                apply_edit(dir.path(), &op),
                Err(EditError::Invalid(_))
            ));
        }
    }

    #[test]
    fn empty_old_string_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "x").unwrap();
        assert!(matches!(
            apply_edit(dir.path(), &replace("a.rs", "", "y")),
            Err(EditError::Invalid(_))
        ));
    }
}

//! Source-control adapter: an explicit working-copy handle plus structured
//! edit operations with single-match replace semantics.

pub mod edits;
pub mod workspace;

pub use edits::{EditError, EditOperation, apply_edit};
pub use workspace::{Result, ScmError, Workspace, abbreviate_diff};

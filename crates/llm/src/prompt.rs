//! Layered system-prompt assembly.
//!
//! The vendor's ephemeral cache is invalidated by any byte change *before*
//! the marked block, so ordering is contractual: a rarely-changing phase
//! prefix, then the large stable codebase snapshot, then per-iteration
//! dynamic blocks, then the working context.  Exactly one cache marker is
//! attached — to the snapshot, or to the prefix when no snapshot is present.
//! Blocks are never concatenated before marking.

use crate::types::{CacheControl, SystemBlock};

/// Ordered inputs for one call's system prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptLayers {
    /// Phase-specific instructions; stable across iterations.
    pub prefix: String,
    /// Large stable codebase snapshot, when the phase includes one.
    pub snapshot: Option<String>,
    /// Per-iteration blocks, in presentation order (for the planner:
    /// coverage summary, recent commits, memory context, dead functions).
    pub dynamic: Vec<String>,
    /// Immediate working context for this call.
    pub working: Option<String>,
}

/// Assemble the ordered block list with the single cache marker placed.
pub fn layer_system_prompt(layers: &PromptLayers) -> Vec<SystemBlock> {
    let mut blocks = Vec::new();

    let mut prefix = SystemBlock::new(layers.prefix.clone());
    if layers.snapshot.is_none() {
        prefix.cache_control = Some(CacheControl::Ephemeral { ttl: None });
    }
    blocks.push(prefix);

    if let Some(snapshot) = &layers.snapshot {
        let mut block = SystemBlock::new(snapshot.clone());
        block.cache_control = Some(CacheControl::Ephemeral { ttl: None });
        blocks.push(block);
    }

    for dynamic in &layers.dynamic {
        if !dynamic.is_empty() {
            blocks.push(SystemBlock::new(dynamic.clone()));
        }
    }

    if let Some(working) = &layers.working {
        if !working.is_empty() {
            blocks.push(SystemBlock::new(working.clone()));
        }
    }

    blocks
}

//! Budgeted memory-context assembly.
//!
//! All candidates sit in one flat, newest-first buffer; sections are built
//! from index subsets with a running token sum, so the budget check never
//! reallocates.  Ordering rationale: pinned notes encode active priorities
//! and are strictly preserved; ideas are a soft-optional second class; past
//! is lossy-tail.

use seedling_store::{IdeaStatus, MemoryItem};

/// Fallback context when the store holds nothing at all.
pub const EMPTY_CONTEXT: &str = "No memories yet. This is your first run.";

/// Deliberately cheap token estimate: `ceil(chars / 4)`.  Exact tokenization
/// is not a goal; the budget is a soft bound.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

fn is_note(item: &MemoryItem) -> bool {
    item.pinned && item.idea_status.is_none()
}

fn is_open_idea(item: &MemoryItem) -> bool {
    item.pinned
        && matches!(
            item.idea_status,
            Some(IdeaStatus::Pending) | Some(IdeaStatus::Attempted)
        )
}

fn is_past(item: &MemoryItem) -> bool {
    !item.pinned
        && !matches!(
            item.idea_status,
            Some(IdeaStatus::Pending) | Some(IdeaStatus::Attempted)
        )
}

fn idea_line(item: &MemoryItem) -> String {
    let tag = match item.idea_status {
        Some(IdeaStatus::Attempted) => "[ATTEMPTED]",
        _ => "[PENDING]",
    };
    let context = item
        .idea_context
        .as_deref()
        .filter(|c| !c.is_empty())
        .map(|c| format!(" — {c}"))
        .unwrap_or_default();
    format!("- {tag} ({}) {}{}", item.id, item.summary, context)
}

/// Assemble the context string from a newest-first candidate buffer under a
/// soft token budget.
///
/// `## Notes to self` is always included in full; `## Ideas` only when the
/// whole section fits what remains; `## Past` grows line by line until the
/// next line would overflow.
pub fn assemble(items: &[MemoryItem], budget: usize) -> String {
    let mut sections: Vec<String> = Vec::new();
    let mut used = 0usize;

    let note_lines: Vec<String> = items
        .iter()
        .filter(|i| is_note(i))
        .map(|i| format!("- ({}) {}", i.id, i.summary))
        .collect();
    if !note_lines.is_empty() {
        let section = format!("## Notes to self\n{}", note_lines.join("\n"));
        used += estimate_tokens(&section);
        sections.push(section);
    }

    let idea_lines: Vec<String> = items.iter().filter(|i| is_open_idea(i)).map(idea_line).collect();
    if !idea_lines.is_empty() {
        let section = format!("## Ideas\n{}", idea_lines.join("\n"));
        let cost = estimate_tokens(&section);
        if used + cost <= budget {
            used += cost;
            sections.push(section);
        }
    }

    let mut past_section = String::from("## Past");
    let mut past_count = 0usize;
    for item in items.iter().filter(|i| is_past(i)) {
        let line = format!(
            "\n- ({}) [{}] {}",
            item.id,
            item.created_at.format("%Y-%m-%d"),
            item.summary
        );
        let candidate_cost = estimate_tokens(&past_section) + estimate_tokens(&line);
        if used + candidate_cost > budget {
            break;
        }
        past_section.push_str(&line);
        past_count += 1;
    }
    if past_count > 0 {
        sections.push(past_section);
    }

    if sections.is_empty() {
        EMPTY_CONTEXT.to_string()
    } else {
        sections.join("\n\n")
    }
}

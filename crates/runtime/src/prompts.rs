//! Phase prompt prefixes and kickoff messages.
//!
//! Wording here is functional, not contractual; the layering and ordering of
//! blocks is what matters for caching (see `seedling_llm::prompt`).

pub const PLANNER_PREFIX: &str = "You are an autonomous maintenance engineer for the repository \
shown below. Inspect it with the available tools, weigh your memory of past iterations, and \
choose ONE concrete, small, mergeable improvement. When the plan is final, call submit_plan \
exactly once with a short title and a full description. Do not write code yet.";

pub const BUILDER_PREFIX: &str = "You are implementing an approved change in the repository \
shown below. Use the read tools to orient, then make the change with edit_file, create_file, \
and delete_file. Keep the diff minimal and self-contained. When the change is complete, reply \
without tool calls.";

pub const FIXER_PREFIX: &str = "Continuous integration failed for the change you just pushed. \
Diagnose the failure from the report, inspect the workspace, and repair it with the edit \
tools. When the repair is complete, reply without tool calls.";

pub const REFLECT_PREFIX: &str = "You review one finished iteration of an autonomous change \
agent. Given the outcome and the conversation, write a short honest reflection: what worked, \
what failed, and what to do differently next time. Reply with the reflection only.";

/// Kickoff user message for the builder dialog.
pub fn builder_kickoff(title: &str, description: &str, memory_context: &str) -> String {
    format!(
        "Implement this change.\n\nTitle: {title}\n\nDescription:\n{description}\n\n\
         Your memory context:\n{memory_context}"
    )
}

/// Kickoff user message for one fixer round.
pub fn fixer_kickoff(ci_error: &str, diff: &str) -> String {
    format!(
        "CI failed with the following report:\n\n{ci_error}\n\n\
         Current diff of your branch against main:\n\n{diff}"
    )
}

/// Kickoff user message for the planner dialog.
pub const PLANNER_KICKOFF: &str =
    "Plan the next change. Investigate first if you need to, then submit the plan.";

/// Reminder sent when the planner stops without calling submit_plan.
pub const PLANNER_NUDGE: &str =
    "You have not submitted a plan. Call submit_plan with your chosen title and description.";

/// Kickoff user message for reflection.
pub fn reflect_kickoff(outcome: &str, transcript_digest: &str) -> String {
    format!("Outcome: {outcome}\n\nConversation digest:\n{transcript_digest}")
}

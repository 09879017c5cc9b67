//! Check-run evaluation: the polling state machine's pure half, plus the
//! compact failure report handed to the fixer.

use std::time::Duration;

/// Poll cadence while waiting on check runs.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);
/// Grace period during which zero check runs means "not started yet".
pub const NO_CHECKS_TIMEOUT: Duration = Duration::from_secs(2 * 60);
/// Overall ceiling on one `await_checks` call.
pub const TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Conclusions that do not fail a run.
const PASSING_CONCLUSIONS: &[&str] = &["success", "neutral", "skipped"];

/// One check run as reported by the forge.
#[derive(Debug, Clone)]
pub struct CheckRun {
    pub id: u64,
    pub name: String,
    pub completed: bool,
    pub conclusion: Option<String>,
    pub output_summary: Option<String>,
    pub output_text: Option<String>,
}

/// Result of one `await_checks` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksOutcome {
    pub passed: bool,
    pub error: Option<String>,
}

impl ChecksOutcome {
    pub fn passed() -> Self {
        Self {
            passed: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            passed: false,
            error: Some(error.into()),
        }
    }
}

/// What the poll loop should do after one observation of the check runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Something is still running (or nothing appeared yet) — poll again.
    Continue,
    /// No runs ever appeared; the repository simply has no checks.
    PassNoChecks,
    /// Every run completed — evaluate conclusions.
    Evaluate,
    /// The overall ceiling elapsed with runs still outstanding.
    TimedOut,
}

pub fn poll_decision(runs: &[CheckRun], elapsed: Duration) -> PollDecision {
    if runs.is_empty() {
        if elapsed < NO_CHECKS_TIMEOUT {
            return PollDecision::Continue;
        }
        return PollDecision::PassNoChecks;
    }
    if runs.iter().all(|r| r.completed) {
        return PollDecision::Evaluate;
    }
    if elapsed >= TIMEOUT {
        return PollDecision::TimedOut;
    }
    PollDecision::Continue
}

/// True when every completed run concluded success, neutral, or skipped.
pub fn conclusions_pass(runs: &[CheckRun]) -> bool {
    runs.iter().all(|run| {
        run.conclusion
            .as_deref()
            .is_some_and(|c| PASSING_CONCLUSIONS.contains(&c))
    })
}

pub fn failing_runs(runs: &[CheckRun]) -> Vec<&CheckRun> {
    runs.iter()
        .filter(|run| {
            !run.conclusion
                .as_deref()
                .is_some_and(|c| PASSING_CONCLUSIONS.contains(&c))
        })
        .collect()
}

// ── failure report ────────────────────────────────────────────────────────────

/// A source annotation attached to a failing check.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub path: String,
    pub line: u64,
    pub message: String,
}

/// A failing check enriched with its annotations.
#[derive(Debug, Clone)]
pub struct FailedCheck {
    pub run: CheckRun,
    pub annotations: Vec<Annotation>,
}

/// Extra detail for a failing workflow job: its downloaded log, or just the
/// failing step names when log download is forbidden.
#[derive(Debug, Clone)]
pub enum JobDetail {
    Log(String),
    Steps(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct FailedJob {
    pub name: String,
    pub detail: JobDetail,
}

/// Cap applied to each downloaded job log before it enters the report.
const JOB_LOG_CHAR_CAP: usize = 6_000;

/// Render the compact failure report the fixer sees.
pub fn format_failure_report(checks: &[FailedCheck], jobs: &[FailedJob]) -> String {
    let mut out = String::new();
    for failed in checks {
        let conclusion = failed.run.conclusion.as_deref().unwrap_or("unknown");
        out.push_str(&format!(
            "Check \"{}\" concluded: {conclusion}\n",
            failed.run.name
        ));
        if let Some(summary) = &failed.run.output_summary {
            if !summary.is_empty() {
                out.push_str(&format!("  {summary}\n"));
            }
        }
        if let Some(text) = &failed.run.output_text {
            if !text.is_empty() {
                out.push_str(&format!("  {text}\n"));
            }
        }
        for annotation in &failed.annotations {
            out.push_str(&format!(
                "  {}:{} {}\n",
                annotation.path, annotation.line, annotation.message
            ));
        }
    }
    for job in jobs {
        out.push_str(&format!("Job \"{}\" failed:\n", job.name));
        match &job.detail {
            JobDetail::Log(log) => {
                out.push_str(&format!("{}\n", truncate_chars(log, JOB_LOG_CHAR_CAP)));
            }
            JobDetail::Steps(steps) => {
                out.push_str(&format!("  failing steps: {}\n", steps.join(", ")));
            }
        }
    }
    out.trim_end().to_string()
}

/// Truncate to at most `cap` characters, keeping the tail — the end of a CI
/// log is where the error usually is.
pub fn truncate_chars(text: &str, cap: usize) -> String {
    let count = text.chars().count();
    if count <= cap {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - cap).collect();
    format!("… [{} chars omitted]\n{tail}", count - cap)
}

/// Parse the forge's `check-runs` listing payload.
pub fn parse_check_runs(body: &serde_json::Value) -> Vec<CheckRun> {
    body.get("check_runs")
        .and_then(|v| v.as_array())
        .map(|runs| {
            runs.iter()
                .filter_map(|run| {
                    Some(CheckRun {
                        id: run.get("id")?.as_u64()?,
                        name: run.get("name")?.as_str()?.to_string(),
                        completed: run.get("status").and_then(|v| v.as_str())
                            == Some("completed"),
                        conclusion: run
                            .get("conclusion")
                            .and_then(|v| v.as_str())
                            .map(String::from),
                        output_summary: run
                            .pointer("/output/summary")
                            .and_then(|v| v.as_str())
                            .map(String::from),
                        output_text: run
                            .pointer("/output/text")
                            .and_then(|v| v.as_str())
                            .map(String::from),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn run(name: &str, completed: bool, conclusion: Option<&str>) -> CheckRun {
        CheckRun {
            id: 1,
            name: name.to_string(),
            completed,
            conclusion: conclusion.map(String::from),
            output_summary: None,
            output_text: None,
        }
    }

    // ── poll decisions ────────────────────────────────────────────────────────

    #[test]
    fn no_runs_waits_through_grace_then_passes() {
        assert_eq!(
            poll_decision(&[], Duration::from_secs(30)),
            PollDecision::Continue
        );
        assert_eq!(
            poll_decision(&[], NO_CHECKS_TIMEOUT),
            PollDecision::PassNoChecks
        );
    }

    #[test]
    fn in_progress_runs_keep_polling_until_timeout() {
        let runs = vec![run("build", false, None)];
        assert_eq!(
            poll_decision(&runs, Duration::from_secs(60)),
            PollDecision::Continue
        );
        assert_eq!(poll_decision(&runs, TIMEOUT), PollDecision::TimedOut);
    }

    #[test]
    fn all_completed_triggers_evaluation() {
        let runs = vec![
            run("build", true, Some("success")),
            run("test", true, Some("failure")),
        ];
        assert_eq!(
            poll_decision(&runs, Duration::from_secs(10)),
            PollDecision::Evaluate
        );
    }

    #[test]
    fn mixed_completion_keeps_polling() {
        let runs = vec![run("build", true, Some("success")), run("test", false, None)];
        assert_eq!(
            poll_decision(&runs, Duration::from_secs(10)),
            PollDecision::Continue
        );
    }

    // ── conclusions ───────────────────────────────────────────────────────────

    #[test]
    fn neutral_and_skipped_count_as_passing() {
        let runs = vec![
            run("build", true, Some("success")),
            run("lint", true, Some("neutral")),
            run("optional", true, Some("skipped")),
        ];
        assert!(conclusions_pass(&runs));
        assert!(failing_runs(&runs).is_empty());
    }

    #[test]
    fn failure_and_missing_conclusion_fail() {
        let runs = vec![
            run("build", true, Some("success")),
            run("test", true, Some("failure")),
            run("odd", true, None),
        ];
        assert!(!conclusions_pass(&runs));
        let failing = failing_runs(&runs);
        assert_eq!(failing.len(), 2);
        assert_eq!(failing[0].name, "test");
    }

    // ── report formatting ─────────────────────────────────────────────────────

    #[test]
    fn report_includes_summary_annotations_and_job_detail() {
        let mut failed = run("test-suite", true, Some("failure"));
        failed.output_summary = Some("3 tests failed".to_string());
        let checks = vec![FailedCheck {
            run: failed,
            annotations: vec![Annotation {
                path: "src/lib.rs".to_string(),
                line: 42,
                message: "assertion failed".to_string(),
            }],
        }];
        let jobs = vec![
            FailedJob {
                name: "unit".to_string(),
                detail: JobDetail::Log("error: oh no".to_string()),
            },
            FailedJob {
                name: "lint".to_string(),
                detail: JobDetail::Steps(vec!["clippy".to_string(), "fmt".to_string()]),
            },
        ];

        let report = format_failure_report(&checks, &jobs);
        assert!(report.contains("Check \"test-suite\" concluded: failure"));
        assert!(report.contains("3 tests failed"));
        assert!(report.contains("src/lib.rs:42 assertion failed"));
        assert!(report.contains("Job \"unit\" failed:"));
        assert!(report.contains("error: oh no"));
        assert!(report.contains("failing steps: clippy, fmt"));
    }

    #[test]
    fn truncate_keeps_the_tail() {
        let long: String = (0..100).map(|i| format!("line {i}\n")).collect();
        let cut = truncate_chars(&long, 50);
        assert!(cut.contains("chars omitted"));
        assert!(cut.ends_with("line 99\n"));
    }

    // ── payload parsing ───────────────────────────────────────────────────────

    #[test]
    fn parse_check_runs_payload() {
        let body = serde_json::json!({
            "total_count": 2,
            "check_runs": [
                {"id": 11, "name": "build", "status": "completed",
                 "conclusion": "success", "output": {"summary": "ok", "text": null}},
                {"id": 12, "name": "test", "status": "in_progress",
                 "conclusion": null, "output": {}}
            ]
        });
        let runs = parse_check_runs(&body);
        assert_eq!(runs.len(), 2);
        assert!(runs[0].completed);
        assert_eq!(runs[0].output_summary.as_deref(), Some("ok"));
        assert!(!runs[1].completed);
        assert!(runs[1].conclusion.is_none());
    }

    #[test]
    fn parse_tolerates_missing_list() {
        assert!(parse_check_runs(&serde_json::json!({})).is_empty());
    }
}

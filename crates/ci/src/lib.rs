//! CI bridge: pull-request lifecycle on the forge and the staged-timeout
//! check polling loop.

pub mod checks;
pub mod forge;

pub use checks::{
    Annotation, CheckRun, ChecksOutcome, FailedCheck, FailedJob, JobDetail, NO_CHECKS_TIMEOUT,
    POLL_INTERVAL, PollDecision, TIMEOUT, format_failure_report, poll_decision, truncate_chars,
};
pub use forge::{CiError, CoverageSource, ForgeApi, GithubForge, NoCoverage, PrRef, Result};

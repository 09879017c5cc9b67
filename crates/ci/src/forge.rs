//! Forge (GitHub) REST client: PR lifecycle, branch cleanup, and the
//! check-run polling loop.
//!
//! Everything network-bound sits behind [`ForgeApi`] so iteration tests can
//! script CI verdicts; [`GithubForge`] is the production implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checks::{
    self, Annotation, ChecksOutcome, FailedCheck, FailedJob, JobDetail, PollDecision,
};

#[derive(Debug, thiserror::Error)]
pub enum CiError {
    #[error("forge request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("forge rejected request ({status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("remote rate limited")]
    RateLimited,
    #[error("ci checks timed out")]
    TimedOut,
    #[error("forge response malformed: {0}")]
    Malformed(String),
    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, CiError>;

/// An open pull request owned by this agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrRef {
    pub number: u64,
    pub head_ref: String,
}

/// Best-effort source of the latest main-branch coverage summary.
#[async_trait]
pub trait CoverageSource: Send + Sync {
    async fn latest_main_summary(&self) -> Option<String>;
}

/// Default coverage source: nothing available.
pub struct NoCoverage;

#[async_trait]
impl CoverageSource for NoCoverage {
    async fn latest_main_summary(&self) -> Option<String> {
        None
    }
}

/// The CI bridge contract the controller drives.
#[async_trait]
pub trait ForgeApi: Send + Sync {
    async fn open_pr(&self, branch: &str, title: &str, body: &str) -> Result<u64>;
    async fn merge_pr(&self, number: u64) -> Result<()>;
    async fn close_pr(&self, number: u64) -> Result<()>;
    async fn delete_remote_branch(&self, branch: &str) -> Result<()>;
    /// Open PRs whose head ref starts with the agent branch prefix.
    async fn find_open_agent_prs(&self) -> Result<Vec<PrRef>>;
    /// Poll check runs for `sha` until a verdict or timeout.
    async fn await_checks(&self, sha: &str) -> Result<ChecksOutcome>;
    async fn latest_main_coverage(&self) -> Option<String>;
}

// ── GithubForge ───────────────────────────────────────────────────────────────

pub struct GithubForge {
    client: reqwest::Client,
    base_url: String,
    token: String,
    owner: String,
    repo: String,
    branch_prefix: String,
    coverage: Arc<dyn CoverageSource>,
    cancel: CancellationToken,
}

impl GithubForge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        base_url: String,
        token: String,
        owner: String,
        repo: String,
        branch_prefix: String,
        coverage: Arc<dyn CoverageSource>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            token,
            owner,
            repo,
            branch_prefix,
            coverage,
            cancel,
        }
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}{path}", self.base_url, self.owner, self.repo)
    }

    async fn request(
        &self,
        method: reqwest::Method,
        url: String,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let mut builder = self
            .client
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "seedling-agent");
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let response = builder.send().await?;
        let status = response.status();

        if status.as_u16() == 429
            || (status.as_u16() == 403 && rate_limit_exhausted(response.headers()))
        {
            return Err(CiError::RateLimited);
        }

        let text = response.text().await?;
        let value: serde_json::Value = if text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text.clone()))
        };
        if !status.is_success() {
            return Err(CiError::Rejected {
                status: status.as_u16(),
                detail: value.to_string(),
            });
        }
        Ok(value)
    }

    async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(CiError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn fetch_check_runs(&self, sha: &str) -> Result<Vec<checks::CheckRun>> {
        let body = self
            .request(
                reqwest::Method::GET,
                self.repo_url(&format!("/commits/{sha}/check-runs")),
                None,
            )
            .await?;
        Ok(checks::parse_check_runs(&body))
    }

    async fn fetch_annotations(&self, run_id: u64) -> Vec<Annotation> {
        let result = self
            .request(
                reqwest::Method::GET,
                self.repo_url(&format!("/check-runs/{run_id}/annotations")),
                None,
            )
            .await;
        let Ok(body) = result else {
            return Vec::new();
        };
        body.as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|a| {
                        Some(Annotation {
                            path: a.get("path")?.as_str()?.to_string(),
                            line: a.get("start_line").and_then(|v| v.as_u64()).unwrap_or(0),
                            message: a.get("message")?.as_str()?.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Failing workflow jobs for `sha`, each with downloaded logs, or the
    /// failing step names when log download is forbidden.
    async fn fetch_failed_jobs(&self, sha: &str) -> Vec<FailedJob> {
        let runs = match self
            .request(
                reqwest::Method::GET,
                self.repo_url(&format!("/actions/runs?head_sha={sha}")),
                None,
            )
            .await
        {
            Ok(body) => body,
            Err(err) => {
                debug!(%err, "workflow runs not resolvable");
                return Vec::new();
            }
        };

        let failing_run_ids: Vec<u64> = runs
            .get("workflow_runs")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter(|run| {
                        run.get("conclusion").and_then(|v| v.as_str()) == Some("failure")
                    })
                    .filter_map(|run| run.get("id").and_then(|v| v.as_u64()))
                    .collect()
            })
            .unwrap_or_default();

        let mut failed = Vec::new();
        for run_id in failing_run_ids {
            let Ok(jobs) = self
                .request(
                    reqwest::Method::GET,
                    self.repo_url(&format!("/actions/runs/{run_id}/jobs")),
                    None,
                )
                .await
            else {
                continue;
            };
            let Some(items) = jobs.get("jobs").and_then(|v| v.as_array()) else {
                continue;
            };
            for job in items {
                if job.get("conclusion").and_then(|v| v.as_str()) != Some("failure") {
                    continue;
                }
                let name = job
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unnamed")
                    .to_string();
                let job_id = job.get("id").and_then(|v| v.as_u64()).unwrap_or(0);

                let detail = match self.download_job_log(job_id).await {
                    Some(log) => JobDetail::Log(log),
                    None => JobDetail::Steps(failing_step_names(job)),
                };
                failed.push(FailedJob { name, detail });
            }
        }
        failed
    }

    async fn download_job_log(&self, job_id: u64) -> Option<String> {
        let response = self
            .client
            .get(self.repo_url(&format!("/actions/jobs/{job_id}/logs")))
            .bearer_auth(&self.token)
            .header("User-Agent", "seedling-agent")
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            debug!(job_id, status = %response.status(), "job log download refused");
            return None;
        }
        response.text().await.ok()
    }

    async fn build_failure_report(&self, sha: &str, runs: &[checks::CheckRun]) -> String {
        let mut failed_checks = Vec::new();
        for run in checks::failing_runs(runs) {
            let annotations = self.fetch_annotations(run.id).await;
            failed_checks.push(FailedCheck {
                run: run.clone(),
                annotations,
            });
        }
        let failed_jobs = self.fetch_failed_jobs(sha).await;
        checks::format_failure_report(&failed_checks, &failed_jobs)
    }
}

fn rate_limit_exhausted(headers: &reqwest::header::HeaderMap) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "0")
}

/// Names of failed steps within a job payload.
fn failing_step_names(job: &serde_json::Value) -> Vec<String> {
    job.get("steps")
        .and_then(|v| v.as_array())
        .map(|steps| {
            steps
                .iter()
                .filter(|s| s.get("conclusion").and_then(|v| v.as_str()) == Some("failure"))
                .filter_map(|s| s.get("name").and_then(|v| v.as_str()))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ForgeApi for GithubForge {
    async fn open_pr(&self, branch: &str, title: &str, body: &str) -> Result<u64> {
        let payload = json!({
            "title": title,
            "head": branch,
            "base": "main",
            "body": body,
        });
        let response = self
            .request(reqwest::Method::POST, self.repo_url("/pulls"), Some(payload))
            .await?;
        let number = response
            .get("number")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| CiError::Malformed("pull request response missing number".to_string()))?;
        info!(number, branch, "opened pull request");
        Ok(number)
    }

    async fn merge_pr(&self, number: u64) -> Result<()> {
        self.request(
            reqwest::Method::PUT,
            self.repo_url(&format!("/pulls/{number}/merge")),
            Some(json!({"merge_method": "squash"})),
        )
        .await?;
        info!(number, "merged pull request");
        Ok(())
    }

    async fn close_pr(&self, number: u64) -> Result<()> {
        self.request(
            reqwest::Method::PATCH,
            self.repo_url(&format!("/pulls/{number}")),
            Some(json!({"state": "closed"})),
        )
        .await?;
        info!(number, "closed pull request");
        Ok(())
    }

    async fn delete_remote_branch(&self, branch: &str) -> Result<()> {
        self.request(
            reqwest::Method::DELETE,
            self.repo_url(&format!("/git/refs/heads/{branch}")),
            None,
        )
        .await?;
        Ok(())
    }

    async fn find_open_agent_prs(&self) -> Result<Vec<PrRef>> {
        let response = self
            .request(
                reqwest::Method::GET,
                self.repo_url("/pulls?state=open&per_page=100"),
                None,
            )
            .await?;
        let prs = response
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|pr| {
                        let head_ref = pr.pointer("/head/ref")?.as_str()?.to_string();
                        let number = pr.get("number")?.as_u64()?;
                        head_ref
                            .starts_with(&self.branch_prefix)
                            .then_some(PrRef { number, head_ref })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(prs)
    }

    async fn await_checks(&self, sha: &str) -> Result<ChecksOutcome> {
        let started = Instant::now();
        loop {
            let runs = self.fetch_check_runs(sha).await?;
            match checks::poll_decision(&runs, started.elapsed()) {
                PollDecision::PassNoChecks => {
                    info!(sha, "no check runs appeared; treating as pass");
                    return Ok(ChecksOutcome::passed());
                }
                PollDecision::Evaluate => {
                    if checks::conclusions_pass(&runs) {
                        info!(sha, "all checks passed");
                        return Ok(ChecksOutcome::passed());
                    }
                    let report = self.build_failure_report(sha, &runs).await;
                    warn!(sha, "checks failed");
                    return Ok(ChecksOutcome::failed(report));
                }
                PollDecision::TimedOut => {
                    warn!(sha, "checks still outstanding at timeout");
                    return Err(CiError::TimedOut);
                }
                PollDecision::Continue => {}
            }
            self.sleep(checks::POLL_INTERVAL).await?;
        }
    }

    async fn latest_main_coverage(&self) -> Option<String> {
        self.coverage.latest_main_summary().await
    }
}

//! The iteration controller: one plan→build→push→checks→merge-or-abandon
//! cycle per call, repeated by the outer driver until a merge lands.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use seedling_ci::{ForgeApi, truncate_chars};
use seedling_config::AppConfig;
use seedling_llm::{LlmClient, Message};
use seedling_memory::MemoryService;
use seedling_scm::Workspace;
use seedling_store::RecordStore;
use seedling_tools::{QualityLinter, ToolRegistry};

use crate::logbook::IterationLogger;
use crate::planner::{self, PlannerInputs};
use crate::session::{PatchSession, Plan};
use crate::snapshot;
use crate::{IterationError, reflect};

/// Character cap on the CI error embedded in outcome strings and memories.
const OUTCOME_ERROR_CHAR_CAP: usize = 500;

struct BodyEnd {
    merged: bool,
    outcome: String,
}

pub struct Controller {
    config: AppConfig,
    store: Arc<RecordStore>,
    llm: Arc<dyn LlmClient>,
    memory: Arc<MemoryService>,
    workspace: Arc<Workspace>,
    forge: Arc<dyn ForgeApi>,
    planner_tools: Arc<ToolRegistry>,
    builder_tools: Arc<ToolRegistry>,
}

impl Controller {
    /// Wire up the controller.  Both tool registries are built once here.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        store: Arc<RecordStore>,
        llm: Arc<dyn LlmClient>,
        memory: Arc<MemoryService>,
        workspace: Arc<Workspace>,
        forge: Arc<dyn ForgeApi>,
        linter: Arc<dyn QualityLinter>,
    ) -> Self {
        let root = workspace.root().to_path_buf();
        let planner_tools = Arc::new(seedling_tools::planner_registry(
            root.clone(),
            memory.clone(),
            store.clone(),
            linter,
        ));
        let builder_tools = Arc::new(seedling_tools::builder_registry(
            root,
            workspace.clone(),
            memory.clone(),
        ));
        Self {
            config,
            store,
            llm,
            memory,
            workspace,
            forge,
            planner_tools,
            builder_tools,
        }
    }

    /// Close and clean up agent PRs left over from earlier runs.
    pub async fn startup_cleanup(&self) {
        match self.forge.find_open_agent_prs().await {
            Ok(stale) => {
                for pr in stale {
                    info!(number = pr.number, head = %pr.head_ref, "closing stale agent PR");
                    if let Err(err) = self.forge.close_pr(pr.number).await {
                        warn!(number = pr.number, %err, "could not close stale PR");
                    }
                    if let Err(err) = self.forge.delete_remote_branch(&pr.head_ref).await {
                        warn!(head = %pr.head_ref, %err, "could not delete stale branch");
                    }
                }
            }
            Err(err) => warn!(%err, "could not enumerate stale agent PRs"),
        }
    }

    /// Run iterations until one merges.
    pub async fn run_until_merged(&self) -> Result<(), IterationError> {
        self.startup_cleanup().await;
        loop {
            if self.run_iteration().await? {
                return Ok(());
            }
            info!("iteration did not merge; planning a fresh change");
        }
    }

    /// One complete iteration.  Returns whether a PR merged.
    pub async fn run_iteration(&self) -> Result<bool, IterationError> {
        let iteration_id = format!("iter-{}", Uuid::new_v4().simple());
        let logger = IterationLogger::new(&iteration_id);
        logger.info("iteration started");
        self.llm.begin_iteration(&iteration_id);

        let mut transcripts: Vec<Message> = Vec::new();
        let body = self.iteration_body(&logger, &mut transcripts).await;

        // The workspace returns to a clean main on every exit path.
        if let Err(err) = self.workspace.reset_workspace().await {
            logger.warn(format!("workspace reset failed: {err}"));
        }

        let (merged, outcome) = match body {
            Ok(end) => (end.merged, end.outcome),
            Err(err) if err.is_cancelled() => {
                logger.warn("iteration cancelled");
                self.persist_log(logger).await;
                self.llm.end_iteration();
                return Err(err);
            }
            Err(err) if err.is_fatal() => {
                logger.error(format!("fatal error: {err}"));
                self.persist_log(logger).await;
                self.llm.end_iteration();
                return Err(err);
            }
            Err(err) => {
                let outcome = format!("Iteration aborted: {err}");
                logger.error(&outcome);
                // Crash-reporting path: a storage outage here must not mask
                // the original failure.
                if let Err(store_err) = self.memory.store_past(&outcome).await {
                    logger.warn(format!("could not store abort outcome: {store_err}"));
                }
                (false, outcome)
            }
        };

        match reflect::run_reflection(&self.llm, &outcome, &transcripts).await {
            Ok(reflection) if !reflection.is_empty() => {
                logger.info("reflection recorded");
                if let Err(err) = self.memory.store_past(&reflection).await {
                    logger.warn(format!("could not store reflection: {err}"));
                }
            }
            Ok(_) => logger.debug("reflection was empty"),
            Err(err) => logger.warn(format!("reflection failed: {err}")),
        }

        self.persist_log(logger).await;
        self.llm.end_iteration();
        Ok(merged)
    }

    async fn iteration_body(
        &self,
        logger: &IterationLogger,
        transcripts: &mut Vec<Message>,
    ) -> Result<BodyEnd, IterationError> {
        let snap = snapshot::snapshot(self.workspace.root(), snapshot::SNAPSHOT_BYTE_CAP);
        let memory_context = self.memory.get_context().await?;
        let git_log = self.workspace.recent_log(10).await?;
        let coverage = self.forge.latest_main_coverage().await;
        let dead_functions = snapshot::possibly_dead_functions(self.workspace.root());

        let planned = planner::run_planner(
            &self.llm,
            &self.planner_tools,
            &PlannerInputs {
                snapshot: snap.clone(),
                coverage,
                git_log,
                memory_context: memory_context.clone(),
                dead_functions,
            },
            self.config.agent.max_tool_rounds,
        )
        .await?;
        transcripts.extend(planned.transcript.iter().cloned());
        let plan = planned.plan;
        logger.info_with("plan selected", json!({"title": plan.title}));

        self.memory
            .store_past(&format!(
                "Planned change \"{}\": {}",
                plan.title, plan.description
            ))
            .await?;

        let mut session = PatchSession::new(
            self.llm.clone(),
            self.builder_tools.clone(),
            self.workspace.clone(),
            plan.clone(),
            memory_context,
            snap,
            self.config.agent.max_fix_attempts,
            self.config.agent.max_tool_rounds,
        );
        let branch = self.workspace.create_branch(&plan.title).await?;
        logger.info_with("branch created", json!({"branch": branch}));

        let end = self.build_and_merge(logger, &mut session, &plan, &branch).await;
        transcripts.extend(session.conversation());
        end
    }

    async fn build_and_merge(
        &self,
        logger: &IterationLogger,
        session: &mut PatchSession,
        plan: &Plan,
        branch: &str,
    ) -> Result<BodyEnd, IterationError> {
        let edits = session.create_patch().await?;
        if edits.is_empty() {
            let outcome = "Builder produced no edits.".to_string();
            logger.warn(&outcome);
            self.memory
                .store_past(&format!("Gave up without opening a PR — {outcome}"))
                .await?;
            return Ok(BodyEnd {
                merged: false,
                outcome,
            });
        }
        logger.info(format!("builder applied {} edit(s)", edits.len()));

        self.workspace.commit_and_push(&plan.title, false).await?;
        let mut sha = self.workspace.head_sha().await?;
        let pr = self
            .forge
            .open_pr(branch, &plan.title, &plan.description)
            .await?;
        logger.info_with("pull request opened", json!({"pr": pr}));

        let (merged, outcome) = loop {
            let checks = self.forge.await_checks(&sha).await?;
            if checks.passed {
                break (true, format!("PR #{pr} merged successfully."));
            }
            let error = checks.error.unwrap_or_else(|| "checks failed".to_string());
            let short_error = truncate_chars(&error, OUTCOME_ERROR_CHAR_CAP);

            if session.exhausted() {
                break (false, format!("CI failed: {short_error}"));
            }
            logger.warn(format!("CI failed (attempt {}); invoking fixer", session.attempts() + 1));
            self.memory
                .store_past(&format!("CI failure on PR #{pr}: {short_error}"))
                .await?;

            match session.fix_patch(&error).await {
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => break (false, format!("Builder failed to fix: {err}")),
                Ok(fix_edits) if fix_edits.is_empty() => {
                    break (false, "Builder produced no fix edits.".to_string());
                }
                Ok(fix_edits) => {
                    logger.info(format!("fixer applied {} edit(s)", fix_edits.len()));
                    self.workspace
                        .commit_and_push(&format!("Fix CI for {}", plan.title), false)
                        .await?;
                    sha = self.workspace.head_sha().await?;
                }
            }
        };

        if merged {
            self.forge.merge_pr(pr).await?;
            if let Err(err) = self.forge.delete_remote_branch(branch).await {
                logger.warn(format!("could not delete merged branch: {err}"));
            }
            self.memory
                .store_past(&format!("Merged PR #{pr}: {}", plan.title))
                .await?;
            if let Some(coverage) = self.forge.latest_main_coverage().await {
                self.memory
                    .store_past(&format!("Post-merge coverage: {coverage}"))
                    .await?;
            }
        } else {
            if let Err(err) = self.forge.close_pr(pr).await {
                logger.warn(format!("could not close PR #{pr}: {err}"));
            }
            if let Err(err) = self.forge.delete_remote_branch(branch).await {
                logger.warn(format!("could not delete branch: {err}"));
            }
            self.memory
                .store_past(&format!("Closed PR #{pr} — {outcome}"))
                .await?;
        }

        logger.info(&outcome);
        Ok(BodyEnd { merged, outcome })
    }

    /// Persist the iteration log with its per-phase usage rollup.
    /// Best-effort: a dead store at this point must not flip the outcome.
    async fn persist_log(&self, logger: IterationLogger) {
        let usage = self
            .store
            .usage_by_phase(logger.iteration_id())
            .ok()
            .filter(|usage| !usage.is_empty());
        let log = logger.into_log(usage);
        if let Err(err) = self.store.insert_iteration_log(&log) {
            warn!(%err, "could not persist iteration log");
        }
    }
}

// ── tests ─────────────────────────────────────────────────────────────────────

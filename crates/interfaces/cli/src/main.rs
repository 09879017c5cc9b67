//! Command-line entry point.
//!
//! `seedling run` iterates until one PR merges (exit 0); `seedling once`
//! performs a single iteration.  Any unrecovered fatal error exits nonzero.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use seedling_ci::{GithubForge, NoCoverage};
use seedling_config::AppConfig;
use seedling_llm::{LlmClient, LlmGateway};
use seedling_memory::MemoryService;
use seedling_runtime::Controller;
use seedling_scm::Workspace;
use seedling_store::RecordStore;
use seedling_tools::HeuristicLinter;

#[derive(Debug, Parser)]
#[command(name = "seedling", version, about = "An autonomous software-change agent")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "seedling.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Iterate until one pull request merges (default).
    Run,
    /// Perform a single iteration, merged or not.
    Once,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A .env file is optional; environment variables win either way.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.telemetry.log_level.clone())),
        )
        .init();

    if config.agent.repo_owner.is_empty() || config.agent.repo_name.is_empty() {
        anyhow::bail!("config must set agent.repo_owner and agent.repo_name");
    }
    let api_key = config.api_key()?;
    let forge_token = config.forge_token()?;

    // Ctrl-C unwinds the current sleep and surfaces as a cancelled iteration.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; cancelling");
                cancel.cancel();
            }
        });
    }

    let store = Arc::new(RecordStore::open(&config.store.path)?);
    let llm: Arc<dyn LlmClient> = Arc::new(LlmGateway::new(
        config.llm.clone(),
        api_key,
        store.clone(),
        cancel.clone(),
    ));
    let memory = Arc::new(MemoryService::new(
        store.clone(),
        llm.clone(),
        config.agent.memory_context_budget_tokens,
    ));

    let workspace = Arc::new(Workspace::new(
        config.agent.workspace_path.clone(),
        config.agent.branch_prefix.clone(),
    ));
    workspace
        .clone_repo(
            &forge_token,
            &config.agent.repo_owner,
            &config.agent.repo_name,
        )
        .await?;

    let forge = Arc::new(GithubForge::new(
        config.forge.base_url.clone(),
        forge_token,
        config.agent.repo_owner.clone(),
        config.agent.repo_name.clone(),
        config.agent.branch_prefix.clone(),
        Arc::new(NoCoverage),
        cancel.clone(),
    ));

    let controller = Controller::new(
        config,
        store,
        llm,
        memory,
        workspace,
        forge,
        Arc::new(HeuristicLinter),
    );

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            controller.run_until_merged().await?;
            info!("a pull request merged; done");
        }
        Commands::Once => {
            let merged = controller.run_iteration().await?;
            info!(merged, "iteration finished");
        }
    }
    Ok(())
}

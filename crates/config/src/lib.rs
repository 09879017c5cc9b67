use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Environment variable holding the LLM vendor API key.
pub const API_KEY_ENV: &str = "SEEDLING_API_KEY";
/// Environment variable holding the forge (GitHub) token.
pub const FORGE_TOKEN_ENV: &str = "SEEDLING_FORGE_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Prefix prepended to every branch this agent creates.  Also used to
    /// enumerate and clean up stale agent PRs at startup.
    pub branch_prefix: String,
    /// Directory that holds the working copy of the target repository.
    pub workspace_path: String,
    /// Owner of the target repository on the forge.
    pub repo_owner: String,
    /// Name of the target repository on the forge.
    pub repo_name: String,
    /// How many times the fixer may attempt to repair a failing patch
    /// before the iteration gives up and closes the PR.
    pub max_fix_attempts: u32,
    /// Upper bound on tool-call rounds within one builder/fixer dialog.
    pub max_tool_rounds: u32,
    /// Soft token budget for the assembled memory context.
    pub memory_context_budget_tokens: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            branch_prefix: "seedling/".to_string(),
            workspace_path: "workspace".to_string(),
            repo_owner: String::new(),
            repo_name: String::new(),
            max_fix_attempts: 3,
            max_tool_rounds: 32,
            memory_context_budget_tokens: 2_000,
        }
    }
}

/// Model id and response token ceiling for one LLM phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSpec {
    pub model: String,
    pub max_tokens: u32,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 8_192,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the vendor API.
    pub base_url: String,
    /// Vendor API version header value.
    pub api_version: String,
    pub planner: ModelSpec,
    pub builder: ModelSpec,
    pub fixer: ModelSpec,
    pub reflect: ModelSpec,
    pub memory: ModelSpec,
    /// Configured thinking budget; the gateway clamps it to
    /// `max_tokens - 2048` per request.
    pub thinking_budget_tokens: u32,
    /// First batch poll delay, in milliseconds.
    pub poll_interval_ms: u64,
    /// Multiplier applied to the poll delay after each unfinished poll.
    pub poll_backoff: f64,
    /// Ceiling on the poll delay, in milliseconds.
    pub max_poll_interval_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            api_version: "2023-06-01".to_string(),
            planner: ModelSpec::default(),
            builder: ModelSpec::default(),
            fixer: ModelSpec::default(),
            reflect: ModelSpec {
                model: "claude-haiku-4-5".to_string(),
                max_tokens: 4_096,
            },
            memory: ModelSpec {
                model: "claude-haiku-4-5".to_string(),
                max_tokens: 1_024,
            },
            thinking_budget_tokens: 4_096,
            poll_interval_ms: 2_000,
            poll_backoff: 1.5,
            max_poll_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    /// Base URL of the forge REST API.
    pub base_url: String,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the embedded database file.
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "seedling.redb".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    pub forge: ForgeConfig,
    pub store: StoreConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.  Missing fields fall back to
    /// their serde defaults; a missing file yields the full default config.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        let config = toml::from_str(&raw)?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// LLM API key from the environment.  Secrets never live in the TOML file.
    pub fn api_key(&self) -> Result<String> {
        read_secret(API_KEY_ENV)
    }

    /// Forge token from the environment.
    pub fn forge_token(&self) -> Result<String> {
        read_secret(FORGE_TOKEN_ENV)
    }
}

fn read_secret(var: &str) -> Result<String> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => anyhow::bail!("missing required environment variable: {var}"),
    }
}

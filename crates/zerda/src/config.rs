use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use reconciler::ReconcilerConfig;
use serde::Deserialize;

/// Default platform REST endpoint
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Top-level bot configuration.
///
/// Defaults come from the environment; a TOML file passed with `--config`
/// overrides any field it sets.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Bot token (`ZERDA_TOKEN`)
    pub token: Option<String>,
    /// REST API base URL (`ZERDA_API_BASE`)
    pub api_base: String,
    /// RocksDB directory for tracked apps (`ZERDA_DATABASE`)
    pub database_path: PathBuf,
    /// Extra plain-text log file (`ZERDA_LOG_FILE`)
    pub log_file: Option<PathBuf>,
    /// Seconds between full sweeps after startup (`ZERDA_SWEEP_INTERVAL_SECS`)
    pub sweep_interval_secs: Option<u64>,
    /// Engine tunables
    pub reconciler: ReconcilerConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: std::env::var("ZERDA_TOKEN")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            api_base: std::env::var("ZERDA_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            database_path: std::env::var("ZERDA_DATABASE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("zerda-state")),
            log_file: std::env::var("ZERDA_LOG_FILE").ok().map(PathBuf::from),
            sweep_interval_secs: std::env::var("ZERDA_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0),
            reconciler: ReconcilerConfig::from_env(),
        }
    }
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("database_path", &self.database_path)
            .field("log_file", &self.log_file)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("reconciler", &self.reconciler)
            .finish()
    }
}

impl BotConfig {
    /// Environment defaults, overlaid by `path` when given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::from_toml(&raw)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))
            }
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// The bot token, required for anything that talks to the platform
    pub fn require_token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .context("No bot token configured. Set ZERDA_TOKEN or `token` in the config file")
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs.map(Duration::from_secs)
    }
}

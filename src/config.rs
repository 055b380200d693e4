//! TOML configuration for the logpulse daemon.
//!
//! Every section has defaults, so an empty or partial file is valid.
//! A handful of environment variables override file values for container
//! deployments where secrets arrive through the environment.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "LOGPULSE_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG: &str = "logpulse.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the daemon and CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogpulseConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl LogpulseConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded logpulse configuration");
        Ok(config)
    }

    /// Same lookup as [`load_with`](Self::load_with) against the process
    /// environment, but a file that cannot be loaded falls back to
    /// compiled-in defaults with a warning.
    pub fn load_or_default() -> Self {
        let env = |key: &str| std::env::var(key).ok();
        match Self::load_with(None, env) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    error = %format!("{:#}", e),
                    "config file could not be loaded, using defaults"
                );
                let mut config = Self::default();
                config.apply_env(env);
                config
            }
        }
    }

    /// Strict lookup for the CLI: an explicit path, then the path named by
    /// `LOGPULSE_CONFIG`, then `./logpulse.toml`, then defaults. Unlike
    /// [`load_or_default`](Self::load_or_default), a named file that cannot
    /// be loaded is an error. Environment overrides come from `lookup`.
    pub fn load_with<F>(explicit: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let named = explicit.map(Path::to_path_buf).or_else(|| {
            lookup(CONFIG_ENV)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
        });

        let mut config = match named {
            Some(path) => Self::load(&path)?,
            None => {
                let local = Path::new(LOCAL_CONFIG);
                if local.exists() {
                    Self::load(local)?
                } else {
                    debug!("no config file found, using compiled-in defaults");
                    Self::default()
                }
            }
        };
        config.apply_env(&lookup);
        Ok(config)
    }

    /// Apply `OPENAI_API_KEY`, `ALERT_WEBHOOK_URL`, `LOGPULSE_DB` and `PORT`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|v| !v.is_empty()) {
            self.summarizer.api_key = Some(key);
        }
        if let Some(url) = lookup("ALERT_WEBHOOK_URL").filter(|v| !v.is_empty()) {
            self.alerts.webhook_url = Some(url);
        }
        if let Some(db) = lookup("LOGPULSE_DB").filter(|v| !v.is_empty()) {
            self.storage.db_path = db;
        }
        if let Some(port) = lookup("PORT").and_then(|p| p.parse::<u16>().ok()) {
            let host = self
                .server
                .bind
                .rsplit_once(':')
                .map(|(h, _)| h.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.server.bind = format!("{}:{}", host, port);
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API binds to.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/logpulse.db".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// How scans pick the batch they hand to the detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Only logs newer than this many minutes are scanned.
    pub window_minutes: i64,
    /// Upper bound on logs per scan.
    pub batch_limit: usize,
    /// Scans over fewer logs than this are skipped.
    pub min_logs: usize,
    /// Seconds between background scans; 0 disables them.
    pub scan_interval_secs: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window_minutes: 60,
            batch_limit: 1000,
            min_logs: 10,
            scan_interval_secs: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Summarizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    /// API key; usually supplied through `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    pub model: String,
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    pub timeout_secs: u64,
    /// Minutes of history handed to the model.
    pub context_window_minutes: i64,
    /// Most logs fetched for context before filtering.
    pub context_limit: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 60,
            context_window_minutes: 60,
            context_limit: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Slack-compatible incoming webhook. Alerts are disabled when unset.
    pub webhook_url: Option<String>,
    /// Link target for "View in Dashboard".
    pub dashboard_url: String,
    /// Public base URL of this API, used for summary links.
    pub api_base_url: String,
    pub timeout_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            dashboard_url: "http://localhost:5173".to_string(),
            api_base_url: "http://localhost:8080".to_string(),
            timeout_secs: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

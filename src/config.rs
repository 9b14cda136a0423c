//! Configuration for steptrace.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (STEPTRACE_SERVER, STEPTRACE_POLL_INTERVAL_MS)
//! 2. Config file (.steptrace/config.yaml)
//! 3. Defaults (agent server on localhost:8000)
//!
//! Config file discovery:
//! - Searches current directory and parents for .steptrace/config.yaml
//! - Falls back to ~/.steptrace/config.yaml

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::AgentRunOptions;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const ENV_SERVER: &str = "STEPTRACE_SERVER";
pub const ENV_POLL_INTERVAL: &str = "STEPTRACE_POLL_INTERVAL_MS";

const CONFIG_DIR: &str = ".steptrace";
const CONFIG_NAME: &str = "config.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    pub base_url: Option<String>,
    pub stream_path: Option<String>,
    pub progress_path: Option<String>,
    pub validate_path: Option<String>,
    pub run_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollingConfig {
    pub interval_ms: Option<u64>,
    pub queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentConfig {
    pub timeout_seconds: Option<u64>,
    pub headless: Option<bool>,
    pub max_steps: Option<u32>,
}

/// Resolved configuration
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub server: ServerSettings,
    pub polling: PollingSettings,
    /// Default options for automation runs
    pub agent: AgentRunOptions,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerSettings {
    pub base_url: String,
    pub stream_path: String,
    pub progress_path: String,
    pub validate_path: String,
    pub run_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            stream_path: "/stream-progress".to_string(),
            progress_path: "/progress".to_string(),
            validate_path: "/validate".to_string(),
            run_path: "/gemini".to_string(),
        }
    }
}

impl ServerSettings {
    /// Join an endpoint path onto the base URL
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn stream_url(&self) -> String {
        self.url(&self.stream_path)
    }

    pub fn progress_url(&self) -> String {
        self.url(&self.progress_path)
    }

    pub fn validate_url(&self) -> String {
        self.url(&self.validate_path)
    }

    pub fn run_url(&self) -> String {
        self.url(&self.run_path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollingSettings {
    pub interval_ms: u64,
    pub queue_capacity: usize,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            queue_capacity: 256,
        }
    }
}

impl PollingSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Overrides read from the environment
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub server: Option<String>,
    pub poll_interval_ms: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            server: std::env::var(ENV_SERVER).ok(),
            poll_interval_ms: std::env::var(ENV_POLL_INTERVAL).ok(),
        }
    }
}

/// Find config file by searching `start` and its parents, then the home directory
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_NAME);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    let home_config = dirs::home_dir()?.join(CONFIG_DIR).join(CONFIG_NAME);
    home_config.exists().then_some(home_config)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Layer environment overrides over the file over defaults
fn resolve(file: ConfigFile, env: EnvOverrides, config_file: Option<PathBuf>) -> Result<ResolvedConfig> {
    let defaults = ServerSettings::default();
    let server = ServerSettings {
        base_url: env
            .server
            .filter(|s| !s.trim().is_empty())
            .or(file.server.base_url)
            .unwrap_or(defaults.base_url),
        stream_path: file.server.stream_path.unwrap_or(defaults.stream_path),
        progress_path: file.server.progress_path.unwrap_or(defaults.progress_path),
        validate_path: file.server.validate_path.unwrap_or(defaults.validate_path),
        run_path: file.server.run_path.unwrap_or(defaults.run_path),
    };

    let defaults = PollingSettings::default();
    let interval_ms = match env.poll_interval_ms {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{} must be a number of milliseconds, got '{}'", ENV_POLL_INTERVAL, raw))?,
        None => file.polling.interval_ms.unwrap_or(defaults.interval_ms),
    };
    if interval_ms == 0 {
        anyhow::bail!("Poll interval must be greater than zero");
    }
    let polling = PollingSettings {
        interval_ms,
        queue_capacity: file
            .polling
            .queue_capacity
            .unwrap_or(defaults.queue_capacity)
            .max(1),
    };

    let defaults = AgentRunOptions::default();
    let agent = AgentRunOptions {
        timeout_seconds: file.agent.timeout_seconds.unwrap_or(defaults.timeout_seconds),
        headless: file.agent.headless.unwrap_or(defaults.headless),
        max_steps: file.agent.max_steps.unwrap_or(defaults.max_steps),
    };

    Ok(ResolvedConfig {
        server,
        polling,
        agent,
        config_file,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let config_file = find_config_file(&cwd);

    let file = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    resolve(file, EnvOverrides::from_env(), config_file)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

//! Bootstrap configuration loading
//!
//! Config file resolution order:
//! 1. Command-line argument (highest priority)
//! 2. `ONAIR_CONFIG` environment variable
//! 3. `~/.config/onair/config.toml` (platform config dir)
//! 4. Built-in defaults
//!
//! An explicitly named file that cannot be read is an error. A missing
//! default file silently falls back to the built-in defaults.

use crate::auth::Role;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "ONAIR_CONFIG";

/// Full bootstrap configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OnAirConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub priority: PriorityConfig,
    pub live: LiveConfig,
    pub executor: ExecutorConfig,
    pub events: EventsConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5790,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_data_dir().join("onair.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter directive used when RUST_LOG is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "onair_ctl=debug,tower_http=debug".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    /// Deadline for handover and pipeline calls
    pub handover_timeout_ms: u64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            handover_timeout_ms: 15_000,
        }
    }
}

impl PriorityConfig {
    pub fn handover_timeout(&self) -> Duration {
        Duration::from_millis(self.handover_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// TTL applied when a token is requested with ttl = 0
    pub default_token_ttl_secs: u64,
    /// Default fade for handovers that do not name one
    pub default_fade_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            default_token_ttl_secs: 3600,
            default_fade_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Heartbeat age at which a station is considered unhealthy
    pub stale_after_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 10_000,
        }
    }
}

impl ExecutorConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub api_keys: Vec<ApiKeyConfig>,
}

/// One accepted API key, stored as its SHA-256 digest
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyConfig {
    pub key_sha256: String,
    pub role: Role,
    /// Identity reported for the key; DJ handovers must match it
    #[serde(default)]
    pub user_id: Option<String>,
}

impl OnAirConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: OnAirConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Resolve and load the config file per the priority order above
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::from_file(Path::new(&path));
        }

        if let Some(path) = default_config_path() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Ok(Self::default())
    }

    fn validate(&self) -> Result<()> {
        if self.events.capacity == 0 {
            return Err(Error::Config("events.capacity must be > 0".to_string()));
        }
        if self.executor.stale_after_ms == 0 {
            return Err(Error::Config("executor.stale_after_ms must be > 0".to_string()));
        }
        for key in &self.auth.api_keys {
            if key.key_sha256.len() != 64 || !key.key_sha256.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(Error::Config(format!(
                    "auth.api_keys: key_sha256 must be 64 hex chars (role {})",
                    key.role
                )));
            }
        }
        Ok(())
    }
}

/// `~/.config/onair/config.toml` on the current platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("onair").join("config.toml"))
}

/// OS-dependent default data folder
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("onair"))
        .unwrap_or_else(|| PathBuf::from("./onair_data"))
}

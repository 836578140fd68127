//! Configuration management for the client tools.

use crate::{ConfigError, ConfigResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default API origin. The session endpoint is derived from it.
pub const DEFAULT_API_BASE_URL: &str = "https://api.rendezvous.app";

/// Default session endpoint path template.
pub const DEFAULT_SESSION_PATH: &str = "/ws/sessions/{session_id}";

/// Client configuration, stored as JSON. Missing fields take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Also write JSONL logs under the logs directory.
    pub log_to_file: bool,
    /// API origin (http, https, ws, or wss).
    pub api_base_url: String,
    /// Endpoint path template containing `{session_id}`.
    pub session_path: String,
    pub heartbeat_interval_secs: u64,
    pub reconnect_delay_secs: u64,
    /// Round count assumed until the server reports one.
    pub default_total_rounds: u32,
    pub dedup_request_window_ms: u64,
    pub dedup_message_window_ms: u64,
    pub dedup_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_to_file: true,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            session_path: DEFAULT_SESSION_PATH.to_string(),
            heartbeat_interval_secs: 30,
            reconnect_delay_secs: 3,
            default_total_rounds: 5,
            dedup_request_window_ms: 3_000,
            dedup_message_window_ms: 2_000,
            dedup_capacity: 1024,
        }
    }
}

impl Config {
    /// Load `config.json` under `paths`, falling back to defaults, then apply
    /// environment overrides.
    pub fn load(paths: &Paths) -> ConfigResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> ConfigResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override from `RENDEZVOUS_LOG_LEVEL` and `RENDEZVOUS_API_URL`.
    pub fn load_from_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(log_level) = non_empty("RENDEZVOUS_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(api_url) = non_empty("RENDEZVOUS_API_URL") {
            self.api_base_url = api_url;
        }
    }

    /// Reject values the client cannot run with.
    ///
    /// `session_path` is checked by the session client, which owns the
    /// endpoint template rules.
    pub fn validate(&self) -> ConfigResult<()> {
        self.api_base_url()?;
        let positive = [
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("reconnect_delay_secs", self.reconnect_delay_secs),
            ("default_total_rounds", u64::from(self.default_total_rounds)),
            ("dedup_request_window_ms", self.dedup_request_window_ms),
            ("dedup_message_window_ms", self.dedup_message_window_ms),
            ("dedup_capacity", self.dedup_capacity as u64),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{} must be positive", name)));
        }
        Ok(())
    }

    /// Get the API origin as a parsed URL.
    pub fn api_base_url(&self) -> ConfigResult<Url> {
        Url::parse(&self.api_base_url).map_err(ConfigError::from)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn dedup_request_window(&self) -> Duration {
        Duration::from_millis(self.dedup_request_window_ms)
    }

    pub fn dedup_message_window(&self) -> Duration {
        Duration::from_millis(self.dedup_message_window_ms)
    }
}

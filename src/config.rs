use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::ClientError;

/// Configuration for the backup console backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_daemon_url")]
    pub daemon_url: String,

    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default)]
    pub polling: PollingIntervals,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon_url: default_daemon_url(),
            api_token: None,
            polling: PollingIntervals::default(),
        }
    }
}

fn default_daemon_url() -> String {
    "http://127.0.0.1:51515".to_string()
}

/// Per-family polling cadences, in seconds. Task and source families carry
/// an active/idle pair; the relaxed value applies while the event stream
/// is connected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingIntervals {
    #[serde(default = "default_server_secs")]
    pub server_secs: u64,
    #[serde(default = "default_repository_secs")]
    pub repository_secs: u64,
    #[serde(default = "default_mounts_secs")]
    pub mounts_secs: u64,
    #[serde(default = "default_sources_active_secs")]
    pub sources_active_secs: u64,
    #[serde(default = "default_sources_idle_secs")]
    pub sources_idle_secs: u64,
    #[serde(default = "default_tasks_active_secs")]
    pub tasks_active_secs: u64,
    #[serde(default = "default_tasks_idle_secs")]
    pub tasks_idle_secs: u64,
    #[serde(default = "default_task_tracking_secs")]
    pub task_tracking_secs: u64,
    #[serde(default = "default_websocket_relaxed_secs")]
    pub websocket_relaxed_secs: u64,
}

impl Default for PollingIntervals {
    fn default() -> Self {
        Self {
            server_secs: default_server_secs(),
            repository_secs: default_repository_secs(),
            mounts_secs: default_mounts_secs(),
            sources_active_secs: default_sources_active_secs(),
            sources_idle_secs: default_sources_idle_secs(),
            tasks_active_secs: default_tasks_active_secs(),
            tasks_idle_secs: default_tasks_idle_secs(),
            task_tracking_secs: default_task_tracking_secs(),
            websocket_relaxed_secs: default_websocket_relaxed_secs(),
        }
    }
}

fn default_server_secs() -> u64 {
    5
}

fn default_repository_secs() -> u64 {
    10
}

fn default_mounts_secs() -> u64 {
    15
}

fn default_sources_active_secs() -> u64 {
    2
}

fn default_sources_idle_secs() -> u64 {
    30
}

fn default_tasks_active_secs() -> u64 {
    2
}

fn default_tasks_idle_secs() -> u64 {
    30
}

fn default_task_tracking_secs() -> u64 {
    1
}

fn default_websocket_relaxed_secs() -> u64 {
    60
}

impl PollingIntervals {
    pub fn server(&self) -> Duration {
        Duration::from_secs(self.server_secs.max(1))
    }

    pub fn repository(&self) -> Duration {
        Duration::from_secs(self.repository_secs.max(1))
    }

    pub fn mounts(&self) -> Duration {
        Duration::from_secs(self.mounts_secs.max(1))
    }

    pub fn sources_active(&self) -> Duration {
        Duration::from_secs(self.sources_active_secs.max(1))
    }

    pub fn sources_idle(&self) -> Duration {
        Duration::from_secs(self.sources_idle_secs.max(1))
    }

    pub fn tasks_active(&self) -> Duration {
        Duration::from_secs(self.tasks_active_secs.max(1))
    }

    pub fn tasks_idle(&self) -> Duration {
        Duration::from_secs(self.tasks_idle_secs.max(1))
    }

    pub fn task_tracking(&self) -> Duration {
        Duration::from_secs(self.task_tracking_secs.max(1))
    }

    pub fn websocket_relaxed(&self) -> Duration {
        Duration::from_secs(self.websocket_relaxed_secs.max(1))
    }
}

impl Config {
    /// Load configuration from config.json in the app directory
    /// Falls back to defaults if the file doesn't exist or can't be parsed
    pub async fn load() -> Self {
        let mut config = match Self::try_load().await {
            Ok(config) => {
                info!(daemon = %config.daemon_url, "Loaded configuration");
                config
            }
            Err(err) => {
                warn!(error = ?err, "Failed to load config.json, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        config
    }

    async fn try_load() -> Result<Self, ClientError> {
        let config_path = get_config_path();

        if !config_path.exists() {
            warn!(path = %config_path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path)
            .await
            .map_err(|err| ClientError::Config(format!("Failed to read config file: {err}")))?;

        serde_json::from_str(&contents)
            .map_err(|err| ClientError::Config(format!("Failed to parse config.json: {err}")))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("BACKUP_DAEMON_URL") {
            let trimmed = url.trim();
            if !trimmed.is_empty() {
                self.daemon_url = trimmed.to_string();
            }
        }
        if let Ok(token) = env::var("BACKUP_DAEMON_TOKEN") {
            let trimmed = token.trim();
            if !trimmed.is_empty() {
                self.api_token = Some(trimmed.to_string());
            }
        }
    }
}

/// Get the path to the config.json file
/// Looks for config.json in the app directory (parent of the backend folder)
fn get_config_path() -> PathBuf {
    if let Ok(exe_path) = std::env::current_exe() {
        debug!(path = %exe_path.display(), "Executable path detected");

        if let Some(backend_dir) = exe_path.parent() {
            if let Some(app_root) = backend_dir.parent() {
                let config_path = app_root.join("config.json");
                debug!(path = %config_path.display(), "Looking for config");
                return config_path;
            }
        }
    }

    // Fallback: look in current directory
    warn!("Using fallback: looking for config.json in current directory");
    PathBuf::from("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: Config = serde_json::from_str("{}").expect("parse");
        assert_eq!(config.daemon_url, "http://127.0.0.1:51515");
        assert!(config.api_token.is_none());
        assert_eq!(config.polling.server_secs, 5);
    }

    #[test]
    fn partial_polling_block_keeps_other_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "polling": { "tasks_active_secs": 1 } }"#).expect("parse");
        assert_eq!(config.polling.tasks_active_secs, 1);
        assert_eq!(config.polling.tasks_idle_secs, 30);
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let intervals = PollingIntervals {
            server_secs: 0,
            ..PollingIntervals::default()
        };
        assert_eq!(intervals.server(), Duration::from_secs(1));
    }
}

//! Update preferences persisted as a small JSON file.
//!
//! The config is an explicit value handed to the orchestrator at
//! construction and replaced wholesale; no global state.

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::release::DEFAULT_UPDATE_URL;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to serialize update config: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write update config: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfig {
    #[serde(default = "default_auto_check")]
    pub auto_check: bool,

    #[serde(default = "default_check_interval")]
    pub check_interval_hours: u64,

    #[serde(default = "default_update_url")]
    pub update_url: String,

    /// Persisted but not consulted by the check logic yet.
    #[serde(default)]
    pub skip_version: String,

    /// Unix seconds of the last completed check.
    #[serde(default)]
    pub last_check: i64,

    /// Persisted but not consulted by the check logic yet.
    #[serde(default = "default_update_channel")]
    pub update_channel: String,

    /// Debug logging toggle, applied whenever the config is (re)loaded.
    #[serde(default)]
    pub debug_logging: bool,
}

fn default_auto_check() -> bool {
    true
}

fn default_check_interval() -> u64 {
    24
}

fn default_update_url() -> String {
    DEFAULT_UPDATE_URL.to_string()
}

fn default_update_channel() -> String {
    "stable".to_string()
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            auto_check: true,
            check_interval_hours: default_check_interval(),
            update_url: default_update_url(),
            skip_version: String::new(),
            last_check: 0,
            update_channel: default_update_channel(),
            debug_logging: false,
        }
    }
}

impl UpdateConfig {
    /// Load the config from disk, falling back to defaults when the file is
    /// missing or unreadable. A broken config must never break the app.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|error| {
                warn!("malformed update config, using defaults: {error}");
                Self::default()
            }),
            Err(error) => {
                if error.kind() != std::io::ErrorKind::NotFound {
                    warn!("could not read update config, using defaults: {error}");
                }
                Self::default()
            }
        }
    }

    /// Write the config as pretty-printed JSON, creating parent directories.
    ///
    /// # Errors
    /// Returns an error when serialization or the filesystem write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Whether an automatic check is due at `now`.
    #[must_use]
    pub fn should_check(&self, now: DateTime<Utc>) -> bool {
        if !self.auto_check {
            return false;
        }
        let interval_secs = i64::try_from(self.check_interval_hours.saturating_mul(3600))
            .unwrap_or(i64::MAX);
        now.timestamp() - self.last_check > interval_secs
    }

    pub fn record_check(&mut self, now: DateTime<Utc>) {
        self.last_check = now.timestamp();
    }
}

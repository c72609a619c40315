//! Bridge configuration and the config cache.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Default location of the state file, relative to the vault root.
pub const DEFAULT_STATE_PATH: &str = ".sync-agent/sync-state.json";

/// Default comma-separated path fragments hidden from the activity list.
pub const DEFAULT_IGNORED_PATHS: &str = ".obsidian, .DS_Store, desktop.ini";

/// How to reach the daemon and which folder to follow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    pub use_https: bool,
    pub api_key: String,
    /// Daemon folder id the vault belongs to
    pub folder_id: String,
    pub folder_label: String,
    /// Comma-separated fragments; matching paths are left out of history
    pub ignored_paths: String,
    /// Vault-relative state file location
    pub state_path: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8384,
            use_https: false,
            api_key: String::new(),
            folder_id: String::new(),
            folder_label: String::new(),
            ignored_paths: DEFAULT_IGNORED_PATHS.to_string(),
            state_path: DEFAULT_STATE_PATH.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}

impl BridgeConfig {
    /// Parse settings; missing fields take their defaults.
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Base URL of the daemon's REST API.
    pub fn api_url(&self) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn ignore_patterns(&self) -> Vec<String> {
        self.ignored_paths
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn is_configured(&self) -> bool {
        self.has_credentials() && !self.folder_id.is_empty()
    }
}

/// A single cached value that expires after `ttl`.
pub struct TtlCache<T> {
    ttl: Duration,
    slot: Mutex<Option<(Instant, T)>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached value, if it has not expired.
    pub fn get(&self) -> Option<T> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some((stored, value)) if stored.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub fn put(&self, value: T) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some((Instant::now(), value));
    }

    pub fn invalidate(&self) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

//! Folder status as shown to the user.

use serde::Serialize;
use serde_json::Value;

use crate::api::FolderStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FolderStatus {
    /// The daemon is scanning or transferring data for the folder
    Converging,
    /// Local and global state agree
    Converged,
    Error,
    Paused,
    /// The daemon is unreachable
    Disconnected,
    /// No API key or folder configured
    Unconfigured,
    Unknown,
}

impl FolderStatus {
    /// From a `FolderCompletion` event payload.
    pub fn from_completion(data: &Value) -> Self {
        let completion = data.get("completion").and_then(Value::as_f64).unwrap_or(100.0);
        let need_bytes = data.get("needBytes").and_then(Value::as_u64).unwrap_or(0);
        if completion < 100.0 || need_bytes > 0 {
            Self::Converging
        } else {
            Self::Converged
        }
    }

    /// From the `to` field of a `StateChanged` event; `None` for states
    /// that say nothing about convergence.
    pub fn from_state_change(to: &str) -> Option<Self> {
        match to {
            "scanning" | "syncing" => Some(Self::Converging),
            "idle" => Some(Self::Converged),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// From a `FolderSummary` event payload.
    pub fn from_summary(data: &Value) -> Self {
        let need_bytes = data
            .pointer("/summary/needBytes")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if need_bytes > 0 {
            Self::Converging
        } else {
            Self::Converged
        }
    }

    /// From a `/rest/db/status` snapshot.
    pub fn from_stats(stats: &FolderStats) -> Self {
        match stats.state.as_str() {
            "scanning" | "syncing" => Self::Converging,
            _ if stats.need_bytes > 0 => Self::Converging,
            "idle" => Self::Converged,
            _ => Self::Error,
        }
    }

    /// Whether the daemon answered and the folder is usable.
    pub fn is_reachable(&self) -> bool {
        matches!(self, Self::Converging | Self::Converged | Self::Paused)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Converging => "syncing",
            Self::Converged => "up to date",
            Self::Error => "error",
            Self::Paused => "paused",
            Self::Disconnected => "disconnected",
            Self::Unconfigured => "not configured",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FolderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

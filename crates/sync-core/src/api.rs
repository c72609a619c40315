//! DaemonApi trait: the HTTP control API of the sync daemon.
//!
//! Implementations:
//! - `HttpDaemonClient` (in sync-agent) - reqwest against the Syncthing REST API
//! - scripted fakes in tests
//!
//! Every request is authenticated with the daemon's API key.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::version;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The daemon has no record of the requested item (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or rejected API key (HTTP 401/403)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("HTTP error {status}: {endpoint}")]
    Http { status: u16, endpoint: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// `GET /rest/system/status`
#[derive(Debug, Clone, Deserialize)]
pub struct SystemStatus {
    #[serde(rename = "myID")]
    pub my_id: String,
}

/// `GET /rest/db/status`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderStats {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub need_bytes: u64,
    #[serde(default)]
    pub need_items: u64,
}

/// One side (local or global) of a file's index entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileRecord {
    #[serde(default)]
    pub version: Vec<String>,
}

/// `GET /rest/db/file`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileInfo {
    #[serde(default)]
    pub local: Option<FileRecord>,
    #[serde(default)]
    pub global: Option<FileRecord>,
}

impl FileInfo {
    /// Whether local and global version vectors agree (missing = empty).
    pub fn is_converged(&self) -> bool {
        let local = self.local.as_ref().map(|r| r.version.as_slice()).unwrap_or(&[]);
        let global = self.global.as_ref().map(|r| r.version.as_slice()).unwrap_or(&[]);
        version::is_converged(local, global)
    }
}

/// An entry from `GET /rest/events`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonEvent {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub time: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub data: Value,
}

impl DaemonEvent {
    /// The `folder` field of the payload, if any.
    pub fn folder(&self) -> Option<&str> {
        self.data.get("folder").and_then(Value::as_str)
    }
}

/// Parameters for `GET /rest/events`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    pub since: Option<u64>,
    /// Long-poll timeout enforced by the daemon
    pub timeout_secs: Option<u64>,
    pub limit: Option<u32>,
    /// Event type filter; empty = all
    pub types: Vec<String>,
}

impl EventQuery {
    /// The single most recent event.
    pub fn latest() -> Self {
        Self {
            limit: Some(1),
            ..Self::default()
        }
    }

    /// Block until events newer than `cursor` arrive or `timeout_secs` elapses.
    pub fn since(cursor: u64, timeout_secs: u64) -> Self {
        Self {
            since: Some(cursor),
            timeout_secs: Some(timeout_secs),
            ..Self::default()
        }
    }

    /// The last `limit` events of the given types.
    pub fn recent(limit: u32, types: &[&str]) -> Self {
        Self {
            limit: Some(limit),
            types: types.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }
}

/// Folder entry of the daemon configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FolderConfig {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub path: String,
    #[serde(rename = "type", default)]
    pub folder_type: String,
    #[serde(default)]
    pub paused: bool,
}

/// Device entry of the daemon configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DeviceConfig {
    #[serde(rename = "deviceID")]
    pub device_id: String,
    #[serde(default)]
    pub name: String,
}

impl DeviceConfig {
    /// Configured name, or the first 7 characters of the device id.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.device_id.chars().take(7).collect()
        } else {
            self.name.clone()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default)]
    pub connected: bool,
}

/// `GET /rest/system/connections`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Connections {
    #[serde(default)]
    pub connections: HashMap<String, ConnectionInfo>,
}

impl Connections {
    /// Ids of the currently connected devices, sorted.
    pub fn connected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .connections
            .iter()
            .filter(|(_, info)| info.connected)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

/// One archived version from `GET /rest/folder/versions`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileVersion {
    pub version_time: DateTime<FixedOffset>,
    pub mod_time: DateTime<FixedOffset>,
    pub size: u64,
}

/// The daemon's HTTP control API.
#[async_trait]
pub trait DaemonApi: Send + Sync {
    /// Whether an API key is configured; without it nothing should be polled.
    fn has_credentials(&self) -> bool;

    async fn status(&self) -> Result<SystemStatus>;

    async fn connections(&self) -> Result<Connections>;

    async fn devices(&self) -> Result<Vec<DeviceConfig>>;

    async fn folders(&self) -> Result<Vec<FolderConfig>>;

    async fn folder_stats(&self, folder: &str) -> Result<FolderStats>;

    /// Ask the daemon to rescan, optionally limited to one sub-path.
    ///
    /// Returns once the request is accepted; the scan itself is asynchronous.
    async fn force_scan(&self, folder: &str, sub_path: Option<&str>) -> Result<()>;

    /// Index entry for one file; `ApiError::NotFound` until it is indexed.
    async fn file_info(&self, folder: &str, path: &str) -> Result<FileInfo>;

    async fn events(&self, query: &EventQuery) -> Result<Vec<DaemonEvent>>;

    async fn ignores(&self, folder: &str) -> Result<Vec<String>>;

    async fn set_ignores(&self, folder: &str, rules: &[String]) -> Result<()>;

    async fn set_folder_paused(&self, folder: &str, paused: bool) -> Result<()>;

    async fn folder_versions(&self, folder: &str) -> Result<HashMap<String, Vec<FileVersion>>>;

    /// Restore archived versions, keyed by file path.
    async fn restore_versions(
        &self,
        folder: &str,
        selections: &HashMap<String, DateTime<FixedOffset>>,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_info_convergence() {
        let info: FileInfo = serde_json::from_str(
            r#"{"local": {"version": ["B:2", "A:1"]}, "global": {"version": ["A:1", "B:2"]}}"#,
        )
        .unwrap();
        assert!(info.is_converged());

        let info: FileInfo = serde_json::from_str(
            r#"{"local": {"version": ["A:2"]}, "global": {"version": ["A:1"]}}"#,
        )
        .unwrap();
        assert!(!info.is_converged());
    }

    #[test]
    fn test_file_info_missing_sides() {
        let info: FileInfo = serde_json::from_str("{}").unwrap();
        assert!(info.is_converged());

        let info: FileInfo =
            serde_json::from_str(r#"{"global": {"version": ["A:1"]}}"#).unwrap();
        assert!(!info.is_converged());
    }

    #[test]
    fn test_event_deserialization() {
        let event: DaemonEvent = serde_json::from_str(
            r#"{
                "id": 42,
                "globalID": 100,
                "type": "LocalIndexUpdated",
                "time": "2024-01-02T03:04:05.123456789+01:00",
                "data": {"folder": "abcd-1234", "filenames": ["a.md"], "items": 1}
            }"#,
        )
        .unwrap();

        assert_eq!(event.id, 42);
        assert_eq!(event.kind, "LocalIndexUpdated");
        assert_eq!(event.folder(), Some("abcd-1234"));
        assert!(event.time.is_some());
    }

    #[test]
    fn test_connected_ids() {
        let conns: Connections = serde_json::from_str(
            r#"{"connections": {"BBB": {"connected": true}, "AAA": {"connected": true}, "CCC": {"connected": false}}}"#,
        )
        .unwrap();
        assert_eq!(conns.connected_ids(), vec!["AAA".to_string(), "BBB".to_string()]);
    }

    #[test]
    fn test_device_display_name() {
        let named = DeviceConfig {
            device_id: "ABCDEFG-HIJKLMN".into(),
            name: "laptop".into(),
        };
        let unnamed = DeviceConfig {
            device_id: "ABCDEFG-HIJKLMN".into(),
            name: String::new(),
        };
        assert_eq!(named.display_name(), "laptop");
        assert_eq!(unnamed.display_name(), "ABCDEFG");
    }
}

//! Persisted per-path sync state.
//!
//! The document is stored as JSON:
//! `{ "version": 1, "activeFiles": { "<path>": { "path", "status", "lastLocalEdit", "lastSyncCheck" } } }`.
//! Timestamps are milliseconds since the Unix epoch.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::paths;

/// Current document format version.
pub const STATE_VERSION: u32 = 1;

/// Synced entries older than this are dropped on save.
pub const SYNCED_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Maximum number of synced entries kept on save (most recent first).
pub const MAX_SYNCED_HISTORY: usize = 50;

/// Convergence status of a tracked path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSyncStatus {
    /// Local edit not yet confirmed by the daemon
    Pending,
    /// Daemon confirmed local and global versions converged
    Synced,
}

/// Tracking entry for one vault path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileState {
    /// Normalized vault-relative path (same as the map key)
    pub path: String,
    pub status: FileSyncStatus,
    /// Last local modification observed (ms)
    pub last_local_edit: u64,
    /// When convergence was last confirmed (ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_check: Option<u64>,
    /// Bumped on every local edit; not persisted
    #[serde(skip)]
    pub(crate) generation: u64,
}

impl FileState {
    pub fn is_pending(&self) -> bool {
        self.status == FileSyncStatus::Pending
    }
}

/// The whole persisted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    pub version: u32,
    #[serde(default)]
    pub active_files: HashMap<String, FileState>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            active_files: HashMap::new(),
        }
    }
}

impl StateDocument {
    /// Parse a stored document, dropping entries that point at daemon temp files.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        let mut doc: StateDocument = serde_json::from_str(contents)?;
        doc.active_files
            .retain(|key, _| !paths::is_daemon_temp_file(key));
        Ok(doc)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Record a local edit. Returns the new edit generation.
    pub fn mark_dirty(&mut self, path: &str, now_ms: u64) -> u64 {
        let path = paths::normalize(path);
        let generation = self
            .active_files
            .get(&path)
            .map(|entry| entry.generation + 1)
            .unwrap_or(1);

        self.active_files.insert(
            path.clone(),
            FileState {
                path,
                status: FileSyncStatus::Pending,
                last_local_edit: now_ms,
                last_sync_check: None,
                generation,
            },
        );
        generation
    }

    /// Resolve an incoming (daemon-side or local) path to a stored key.
    pub fn resolve(&self, incoming: &str) -> Option<String> {
        paths::match_key(self.active_files.keys().map(String::as_str), incoming)
            .map(str::to_string)
    }

    /// Mark the entry matching `incoming` as synced.
    ///
    /// Returns the matched key, or `None` if the path is not tracked.
    pub fn mark_synced(&mut self, incoming: &str, now_ms: u64) -> Option<String> {
        let key = self.resolve(incoming)?;
        let entry = self.active_files.get_mut(&key)?;
        entry.status = FileSyncStatus::Synced;
        entry.last_sync_check = Some(now_ms);
        Some(key)
    }

    pub fn get(&self, incoming: &str) -> Option<&FileState> {
        let key = self.resolve(incoming)?;
        self.active_files.get(&key)
    }

    pub fn pending(&self) -> Vec<FileState> {
        self.active_files
            .values()
            .filter(|entry| entry.is_pending())
            .cloned()
            .collect()
    }

    /// Drop stale synced entries.
    ///
    /// Pending entries are never removed. Synced entries older than
    /// [`SYNCED_TTL`] go first, then only the [`MAX_SYNCED_HISTORY`] most
    /// recent survive.
    pub fn collect_garbage(&mut self, now_ms: u64) -> usize {
        let before = self.active_files.len();
        let ttl_ms = SYNCED_TTL.as_millis() as u64;

        let (pending, synced): (Vec<FileState>, Vec<FileState>) = self
            .active_files
            .drain()
            .map(|(_, entry)| entry)
            .partition(FileState::is_pending);

        let mut synced: Vec<FileState> = synced
            .into_iter()
            .filter(|entry| {
                entry
                    .last_sync_check
                    .is_some_and(|checked| now_ms.saturating_sub(checked) < ttl_ms)
            })
            .collect();

        if synced.len() > MAX_SYNCED_HISTORY {
            synced.sort_by(|a, b| b.last_sync_check.cmp(&a.last_sync_check));
            synced.truncate(MAX_SYNCED_HISTORY);
        }

        self.active_files = pending
            .into_iter()
            .chain(synced)
            .map(|entry| (entry.path.clone(), entry))
            .collect();

        before - self.active_files.len()
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: u64 = 60 * 60 * 1000;

    fn synced_entry(path: &str, checked: u64) -> FileState {
        FileState {
            path: path.to_string(),
            status: FileSyncStatus::Synced,
            last_local_edit: checked.saturating_sub(10),
            last_sync_check: Some(checked),
            generation: 0,
        }
    }

    #[test]
    fn test_mark_dirty_is_idempotent() {
        let mut doc = StateDocument::default();

        doc.mark_dirty("Notes/a.md", 1000);
        doc.mark_dirty("Notes/a.md", 2000);

        assert_eq!(doc.active_files.len(), 1);
        let entry = &doc.active_files["Notes/a.md"];
        assert_eq!(entry.status, FileSyncStatus::Pending);
        assert_eq!(entry.last_local_edit, 2000);
        assert_eq!(entry.generation, 2);
    }

    #[test]
    fn test_mark_synced_picks_most_specific_key() {
        // Fresh documents get fresh hash seeds, so repeat to cover both orders
        for _ in 0..100 {
            let mut doc = StateDocument::default();
            doc.mark_dirty("a.md", 1000);
            doc.mark_dirty("Notes/a.md", 1000);

            assert_eq!(
                doc.mark_synced("Vault/Notes/a.md", 2000).as_deref(),
                Some("Notes/a.md")
            );
            assert_eq!(doc.active_files["a.md"].status, FileSyncStatus::Pending);
        }
    }

    #[test]
    fn test_mark_dirty_normalizes_path() {
        let mut doc = StateDocument::default();
        doc.mark_dirty(r"Notes\a.md", 1000);
        assert!(doc.active_files.contains_key("Notes/a.md"));
        assert_eq!(doc.active_files["Notes/a.md"].path, "Notes/a.md");
    }

    #[test]
    fn test_mark_dirty_clears_previous_sync_check() {
        let mut doc = StateDocument::default();
        doc.mark_dirty("a.md", 1000);
        doc.mark_synced("a.md", 1500);
        doc.mark_dirty("a.md", 2000);

        let entry = &doc.active_files["a.md"];
        assert!(entry.is_pending());
        assert_eq!(entry.last_sync_check, None);
    }

    #[test]
    fn test_mark_synced_resolves_prefixed_path() {
        let mut doc = StateDocument::default();
        doc.mark_dirty("Notes/a.md", 1000);

        let key = doc.mark_synced("Vault/Notes/a.md", 2000);

        assert_eq!(key.as_deref(), Some("Notes/a.md"));
        let entry = &doc.active_files["Notes/a.md"];
        assert_eq!(entry.status, FileSyncStatus::Synced);
        assert_eq!(entry.last_sync_check, Some(2000));
    }

    #[test]
    fn test_mark_synced_untracked_is_noop() {
        let mut doc = StateDocument::default();
        doc.mark_dirty("Notes/a.md", 1000);

        assert!(doc.mark_synced("OtherNotes/a.md", 2000).is_none());
        assert!(doc.active_files["Notes/a.md"].is_pending());
    }

    #[test]
    fn test_gc_keeps_most_recent_synced() {
        let now = 100 * HOUR_MS;
        let mut doc = StateDocument::default();
        for i in 0..60u64 {
            let path = format!("note-{i}.md");
            doc.active_files
                .insert(path.clone(), synced_entry(&path, now - 1000 + i));
        }

        let removed = doc.collect_garbage(now);

        assert_eq!(removed, 10);
        assert_eq!(doc.active_files.len(), 50);
        for i in 10..60u64 {
            assert!(doc.active_files.contains_key(&format!("note-{i}.md")));
        }
        for i in 0..10u64 {
            assert!(!doc.active_files.contains_key(&format!("note-{i}.md")));
        }
    }

    #[test]
    fn test_gc_drops_expired_synced_under_cap() {
        let now = 100 * HOUR_MS;
        let mut doc = StateDocument::default();
        doc.active_files
            .insert("old.md".into(), synced_entry("old.md", now - 25 * HOUR_MS));
        doc.active_files
            .insert("fresh.md".into(), synced_entry("fresh.md", now - HOUR_MS));

        doc.collect_garbage(now);

        assert!(!doc.active_files.contains_key("old.md"));
        assert!(doc.active_files.contains_key("fresh.md"));
    }

    #[test]
    fn test_gc_never_removes_pending() {
        let now = 100 * HOUR_MS;
        let mut doc = StateDocument::default();
        doc.mark_dirty("ancient.md", 1);
        for i in 0..60u64 {
            let path = format!("note-{i}.md");
            doc.active_files.insert(path.clone(), synced_entry(&path, now - i));
        }

        doc.collect_garbage(now);

        assert!(doc.active_files["ancient.md"].is_pending());
        assert_eq!(doc.active_files.len(), 51);
    }

    #[test]
    fn test_from_json_drops_temp_entries() {
        let json = r#"{
            "version": 1,
            "activeFiles": {
                "a.md": { "path": "a.md", "status": "pending", "lastLocalEdit": 5 },
                ".~syncthing~a.md.tmp": { "path": ".~syncthing~a.md.tmp", "status": "pending", "lastLocalEdit": 6 }
            }
        }"#;

        let doc = StateDocument::from_json(json).unwrap();

        assert_eq!(doc.active_files.len(), 1);
        assert!(doc.active_files.contains_key("a.md"));
    }

    #[test]
    fn test_json_shape() {
        let mut doc = StateDocument::default();
        doc.mark_dirty("a.md", 42);

        let json = doc.to_json().unwrap();

        assert!(json.contains("\"activeFiles\""));
        assert!(json.contains("\"lastLocalEdit\": 42"));
        assert!(json.contains("\"status\": \"pending\""));
        assert!(!json.contains("generation"));
        assert!(!json.contains("lastSyncCheck"));
    }
}

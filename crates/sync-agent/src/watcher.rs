//! File watcher with debouncing for local vault edits.
//!
//! Uses notify-debouncer-mini; every surviving event becomes a candidate for
//! `SyncEngine::on_local_edit`.

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{DebouncedEvent, new_debouncer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use sync_core::conflict::CONFLICT_MARKER;
use sync_core::paths;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Debounce window for editor saves.
pub const DEBOUNCE: Duration = Duration::from_millis(200);

/// File event from the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Path relative to vault root, forward slashes
    pub path: String,
    pub kind: FileEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// File was created or modified
    Modified,
    Deleted,
}

/// Watches the vault directory for edits made on this machine.
pub struct FileWatcher {
    vault_path: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<FileEvent>,
}

/// Last seen mtime per relative path, to drop events that changed nothing
type MtimeCache = Arc<Mutex<HashMap<String, SystemTime>>>;

/// Whether a vault-relative path should be reported at all.
///
/// Hidden paths (state file, `.trash/`, editor config), the daemon's
/// in-flight temp files and conflict copies are not local edits.
pub fn is_watched(relative: &str) -> bool {
    if relative.is_empty() {
        return false;
    }
    if relative.split('/').any(|part| part.starts_with('.')) {
        return false;
    }
    if paths::is_daemon_temp_file(relative) {
        return false;
    }
    !relative.contains(CONFLICT_MARKER)
}

impl FileWatcher {
    pub fn new(vault_path: PathBuf) -> Result<Self> {
        // FSEvents needs the resolved path (/var -> /private/var on macOS)
        let vault_path = vault_path.canonicalize().unwrap_or(vault_path);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let root = vault_path.clone();
        let mtimes: MtimeCache = Arc::new(Mutex::new(HashMap::new()));

        let mut debouncer = new_debouncer(
            DEBOUNCE,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(file_event) = Self::process_event(&event.path, &root, &mtimes) {
                            if event_tx.send(file_event).is_err() {
                                // Receiver dropped
                                return;
                            }
                        }
                    }
                }
                Err(e) => error!("File watcher error: {}", e),
            },
        )?;

        debouncer
            .watcher()
            .watch(&vault_path, RecursiveMode::Recursive)?;

        Ok(Self {
            vault_path,
            _debouncer: debouncer,
            event_rx,
        })
    }

    fn process_event(path: &Path, vault_path: &Path, mtimes: &MtimeCache) -> Option<FileEvent> {
        let relative = path.strip_prefix(vault_path).ok()?;
        let relative = paths::normalize(relative.to_str()?);
        if !is_watched(&relative) {
            return None;
        }

        let mut cache = mtimes.lock().unwrap_or_else(|e| e.into_inner());
        let kind = match std::fs::metadata(path) {
            Ok(metadata) if metadata.is_dir() => return None,
            Ok(metadata) => {
                if let Ok(mtime) = metadata.modified() {
                    if cache.get(&relative) == Some(&mtime) {
                        return None;
                    }
                    cache.insert(relative.clone(), mtime);
                }
                FileEventKind::Modified
            }
            Err(_) => {
                cache.remove(&relative);
                FileEventKind::Deleted
            }
        };

        debug!("File event: {:?} - {}", kind, relative);
        Some(FileEvent {
            path: relative,
            kind,
        })
    }

    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<FileEvent> {
        &mut self.event_rx
    }

    pub fn vault_path(&self) -> &Path {
        &self.vault_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_watched() {
        assert!(is_watched("a.md"));
        assert!(is_watched("Journal/2024/today.md"));
        assert!(is_watched("attachments/image.png"));

        assert!(!is_watched(""));
        assert!(!is_watched(".sync-agent/sync-state.json"));
        assert!(!is_watched(".trash/a.md"));
        assert!(!is_watched("notes/.obsidian/workspace.json"));
        assert!(!is_watched("notes/~syncthing~a.md.tmp"));
        assert!(!is_watched("a.sync-conflict-20240102-030405-ABCDEFG.md"));
    }

    #[test]
    fn test_process_event_drops_unchanged_mtime() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let file = root.join("a.md");
        std::fs::write(&file, "hello").unwrap();
        let mtimes: MtimeCache = Arc::new(Mutex::new(HashMap::new()));

        let first = FileWatcher::process_event(&file, &root, &mtimes);
        assert_eq!(
            first,
            Some(FileEvent {
                path: "a.md".into(),
                kind: FileEventKind::Modified
            })
        );
        assert_eq!(FileWatcher::process_event(&file, &root, &mtimes), None);

        std::fs::remove_file(&file).unwrap();
        assert_eq!(
            FileWatcher::process_event(&file, &root, &mtimes).map(|e| e.kind),
            Some(FileEventKind::Deleted)
        );
    }

    #[test]
    fn test_process_event_ignores_directories() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let sub = root.join("Journal");
        std::fs::create_dir(&sub).unwrap();
        let mtimes: MtimeCache = Arc::new(Mutex::new(HashMap::new()));

        assert_eq!(FileWatcher::process_event(&sub, &root, &mtimes), None);
    }
}

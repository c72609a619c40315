//! StateStore: source of truth for per-path convergence status.
//!
//! State lives in memory behind a mutex that is never held across an await.
//! Persistence goes through a single writer task fed by a channel: save
//! requests are collected until the channel has been quiet for
//! [`SAVE_QUIET_PERIOD`], then the latest state is written once. Only the
//! writer touches the state file, so at most one write is ever in flight.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::fs::FileSystem;
use crate::state::{self, FileState, StateDocument};

/// Quiet window for coalescing save requests.
pub const SAVE_QUIET_PERIOD: Duration = Duration::from_secs(2);

enum SaveRequest {
    /// Persist at the end of the current quiet window
    Save,
    /// Persist right away and acknowledge once written
    Flush(oneshot::Sender<()>),
}

/// Handle to the state store. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct StateStore {
    doc: Arc<Mutex<StateDocument>>,
    saver: mpsc::UnboundedSender<SaveRequest>,
}

impl StateStore {
    /// Load the state file (if any) and start the writer task.
    ///
    /// Never fails: a missing file gives an empty store, an unreadable or
    /// corrupt one is logged and replaced by an empty store.
    pub async fn load<F>(fs: Arc<F>, path: impl Into<String>) -> Self
    where
        F: FileSystem + ?Sized + 'static,
    {
        Self::load_with_quiet_period(fs, path, SAVE_QUIET_PERIOD).await
    }

    /// Like [`StateStore::load`] with a custom coalescing window.
    pub async fn load_with_quiet_period<F>(
        fs: Arc<F>,
        path: impl Into<String>,
        quiet: Duration,
    ) -> Self
    where
        F: FileSystem + ?Sized + 'static,
    {
        let path = path.into();
        let doc = read_document(fs.as_ref(), &path).await;
        debug!("State loaded: {} active file(s)", doc.active_files.len());

        let doc = Arc::new(Mutex::new(doc));
        let (saver, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(fs, path, Arc::clone(&doc), rx, quiet));

        Self { doc, saver }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StateDocument> {
        self.doc.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a local edit: the path becomes (or stays) pending.
    ///
    /// Returns the edit generation for the path.
    pub fn mark_dirty(&self, path: &str) -> u64 {
        let generation = self.lock().mark_dirty(path, state::now_ms());
        self.request_save();
        generation
    }

    /// Record daemon-confirmed convergence for an incoming path.
    ///
    /// Untracked paths are ignored. Returns the matched key.
    pub fn mark_synced(&self, incoming: &str) -> Option<String> {
        let key = self.lock().mark_synced(incoming, state::now_ms())?;
        debug!("Synced: \"{}\"", key);
        self.request_save();
        Some(key)
    }

    /// Like [`StateStore::mark_synced`], but refuses if the path was edited
    /// again after `generation` was observed.
    pub fn mark_synced_if_current(&self, incoming: &str, generation: u64) -> Option<String> {
        let key = {
            let mut doc = self.lock();
            let current = doc.get(incoming)?.generation;
            if current != generation {
                debug!(
                    "Ignoring stale confirmation for \"{}\" (generation {} < {})",
                    incoming, generation, current
                );
                return None;
            }
            doc.mark_synced(incoming, state::now_ms())?
        };
        debug!("Synced: \"{}\"", key);
        self.request_save();
        Some(key)
    }

    /// Current edit generation of a tracked path.
    pub fn generation(&self, incoming: &str) -> Option<u64> {
        self.lock().get(incoming).map(|entry| entry.generation)
    }

    /// All entries still waiting for confirmation, in no particular order.
    pub fn pending_entries(&self) -> Vec<FileState> {
        self.lock().pending()
    }

    /// Entry for a path, resolved the same way daemon paths are.
    pub fn get_state(&self, incoming: &str) -> Option<FileState> {
        self.lock().get(incoming).cloned()
    }

    /// Number of tracked paths.
    pub fn len(&self) -> usize {
        self.lock().active_files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Schedule a write at the end of the current quiet window.
    pub fn request_save(&self) {
        if self.saver.send(SaveRequest::Save).is_err() {
            warn!("State writer is gone; change will not be persisted");
        }
    }

    /// Write the current state now and wait for the write to finish.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.saver.send(SaveRequest::Flush(ack_tx)).is_err() {
            warn!("State writer is gone; flush skipped");
            return;
        }
        let _ = ack_rx.await;
    }
}

async fn read_document<F: FileSystem + ?Sized>(fs: &F, path: &str) -> StateDocument {
    match fs.exists(path).await {
        Ok(true) => {}
        Ok(false) => return StateDocument::default(),
        Err(e) => {
            error!("Failed to check state file {}: {}", path, e);
            return StateDocument::default();
        }
    }

    let contents = match fs.read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to read state file {}: {}", path, e);
            return StateDocument::default();
        }
    };

    match std::str::from_utf8(&contents)
        .map_err(|e| e.to_string())
        .and_then(|text| StateDocument::from_json(text).map_err(|e| e.to_string()))
    {
        Ok(doc) => doc,
        Err(e) => {
            error!("Failed to parse state file {}, starting empty: {}", path, e);
            StateDocument::default()
        }
    }
}

/// Collect save requests until quiet, then write once.
async fn run_writer<F: FileSystem + ?Sized>(
    fs: Arc<F>,
    path: String,
    doc: Arc<Mutex<StateDocument>>,
    mut rx: mpsc::UnboundedReceiver<SaveRequest>,
    quiet: Duration,
) {
    while let Some(first) = rx.recv().await {
        let mut acks = Vec::new();
        if let SaveRequest::Flush(ack) = first {
            acks.push(ack);
        }

        while acks.is_empty() {
            match tokio::time::timeout(quiet, rx.recv()).await {
                Ok(Some(SaveRequest::Save)) => continue,
                Ok(Some(SaveRequest::Flush(ack))) => acks.push(ack),
                // Quiet window elapsed, or every handle dropped: write what we have
                Ok(None) | Err(_) => break,
            }
        }

        write_document(fs.as_ref(), &path, &doc).await;

        for ack in acks {
            let _ = ack.send(());
        }
    }
    debug!("State writer stopped");
}

async fn write_document<F: FileSystem + ?Sized>(fs: &F, path: &str, doc: &Mutex<StateDocument>) {
    let json = {
        let mut doc = doc.lock().unwrap_or_else(|e| e.into_inner());
        let removed = doc.collect_garbage(state::now_ms());
        if removed > 0 {
            debug!("Garbage collected {} synced entr(ies)", removed);
        }
        doc.to_json()
    };

    let json = match json {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize state: {}", e);
            return;
        }
    };

    if let Err(e) = fs.write(path, json.as_bytes()).await {
        error!("Failed to save state to {}: {}", path, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use crate::state::FileSyncStatus;

    const STATE_PATH: &str = ".sync-agent/sync-state.json";

    #[tokio::test(start_paused = true)]
    async fn test_load_missing_file_is_empty() {
        let fs = Arc::new(InMemoryFs::new());
        let store = StateStore::load(fs, STATE_PATH).await;
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_corrupt_file_is_empty() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write(STATE_PATH, b"{ not json").await.unwrap();

        let store = StateStore::load(fs, STATE_PATH).await;

        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_drops_temp_entries() {
        let fs = Arc::new(InMemoryFs::new());
        let json = r#"{"version": 1, "activeFiles": {
            "a.md": {"path": "a.md", "status": "pending", "lastLocalEdit": 1},
            "Notes/.~syncthing~b.md.tmp": {"path": "Notes/.~syncthing~b.md.tmp", "status": "pending", "lastLocalEdit": 2}
        }}"#;
        fs.write(STATE_PATH, json.as_bytes()).await.unwrap();

        let store = StateStore::load(fs, STATE_PATH).await;

        assert_eq!(store.len(), 1);
        assert!(store.get_state("a.md").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_dirty_twice_stays_pending() {
        let fs = Arc::new(InMemoryFs::new());
        let store = StateStore::load(fs, STATE_PATH).await;

        store.mark_dirty("a.md");
        let first = store.get_state("a.md").unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.mark_dirty("a.md");
        let second = store.get_state("a.md").unwrap();

        assert_eq!(second.status, FileSyncStatus::Pending);
        assert!(second.last_local_edit >= first.last_local_edit);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_write() {
        let fs = Arc::new(InMemoryFs::new());
        let store = StateStore::load(Arc::clone(&fs), STATE_PATH).await;

        for i in 0..5 {
            store.mark_dirty(&format!("note-{i}.md"));
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(fs.write_count(STATE_PATH), 0);

        tokio::time::sleep(SAVE_QUIET_PERIOD + Duration::from_millis(100)).await;

        assert_eq!(fs.write_count(STATE_PATH), 1);
        let saved = fs.read(STATE_PATH).await.unwrap();
        let doc = StateDocument::from_json(std::str::from_utf8(&saved).unwrap()).unwrap();
        assert_eq!(doc.active_files.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_writes_immediately() {
        let fs = Arc::new(InMemoryFs::new());
        let store = StateStore::load(Arc::clone(&fs), STATE_PATH).await;

        store.mark_dirty("a.md");
        store.flush().await;

        assert_eq!(fs.write_count(STATE_PATH), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_preserves_pending() {
        let fs = Arc::new(InMemoryFs::new());
        {
            let store = StateStore::load(Arc::clone(&fs), STATE_PATH).await;
            store.mark_dirty("a.md");
            store.mark_dirty("Notes/b.md");
            store.mark_dirty("c.md");
            store.mark_synced("c.md");
            store.flush().await;
        }

        let reloaded = StateStore::load(fs, STATE_PATH).await;

        let mut pending: Vec<String> = reloaded
            .pending_entries()
            .into_iter()
            .map(|e| e.path)
            .collect();
        pending.sort();
        assert_eq!(pending, vec!["Notes/b.md".to_string(), "a.md".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_confirmation_is_rejected() {
        let fs = Arc::new(InMemoryFs::new());
        let store = StateStore::load(fs, STATE_PATH).await;

        let observed = store.mark_dirty("a.md");
        store.mark_dirty("a.md");

        assert!(store.mark_synced_if_current("a.md", observed).is_none());
        assert!(store.get_state("a.md").unwrap().is_pending());

        let current = store.generation("a.md").unwrap();
        assert_eq!(
            store.mark_synced_if_current("a.md", current).as_deref(),
            Some("a.md")
        );
    }
}

//! Long-poll monitor for the daemon's event stream.
//!
//! A single background task follows `/rest/events` from a cursor and turns
//! relevant events into state changes and [`EngineEvent`]s. Stopping is
//! cooperative: an in-flight poll or back-off sleep finishes, then the loop
//! exits.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::api::{DaemonApi, DaemonEvent, EventQuery};
use crate::events::{EngineEvent, EventBus};
use crate::paths::{self, SharedBinding};
use crate::status::FolderStatus;
use crate::store::StateStore;

/// Long-poll timeout requested from the daemon.
pub const LONG_POLL_TIMEOUT_SECS: u64 = 60;

/// Wait before checking again when no API key is configured.
pub const NO_CREDENTIALS_DELAY: Duration = Duration::from_secs(5);

/// Back-off after a failed poll.
pub const ERROR_DELAY: Duration = Duration::from_secs(2);

struct Shared {
    running: AtomicBool,
    /// Bumped on every start so a loop left over from a previous run exits
    epoch: AtomicU64,
    cursor: AtomicU64,
    status: RwLock<FolderStatus>,
    last_converged: RwLock<Option<DateTime<Utc>>>,
}

pub struct EventMonitor<A: DaemonApi + ?Sized> {
    api: Arc<A>,
    store: StateStore,
    binding: SharedBinding,
    bus: Arc<EventBus>,
    shared: Arc<Shared>,
}

impl<A: DaemonApi + ?Sized> Clone for EventMonitor<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            store: self.store.clone(),
            binding: Arc::clone(&self.binding),
            bus: Arc::clone(&self.bus),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A: DaemonApi + ?Sized + 'static> EventMonitor<A> {
    pub fn new(api: Arc<A>, store: StateStore, binding: SharedBinding, bus: Arc<EventBus>) -> Self {
        Self {
            api,
            store,
            binding,
            bus,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                cursor: AtomicU64::new(0),
                status: RwLock::new(FolderStatus::Unknown),
                last_converged: RwLock::new(None),
            }),
        }
    }

    /// Start following the event stream from the most recent event.
    ///
    /// No-op while already running.
    pub async fn start(&self) {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        match self.api.events(&EventQuery::latest()).await {
            Ok(events) => {
                if let Some(last) = events.last() {
                    self.shared.cursor.store(last.id, Ordering::SeqCst);
                }
            }
            Err(e) => warn!("Failed to fetch initial event id: {}", e),
        }

        info!(
            "Event monitor started at event {}",
            self.shared.cursor.load(Ordering::SeqCst)
        );
        tokio::spawn(self.clone().run(epoch));
    }

    /// Ask the loop to exit after its current iteration.
    pub fn stop(&self) {
        if self.shared.running.swap(false, Ordering::SeqCst) {
            info!("Event monitor stopping");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn should_run(&self, epoch: u64) -> bool {
        self.is_running() && self.shared.epoch.load(Ordering::SeqCst) == epoch
    }

    async fn run(self, epoch: u64) {
        while self.should_run(epoch) {
            if !self.api.has_credentials() {
                tokio::time::sleep(NO_CREDENTIALS_DELAY).await;
                continue;
            }

            let query = EventQuery::since(self.cursor(), LONG_POLL_TIMEOUT_SECS);
            match self.api.events(&query).await {
                Ok(events) => {
                    for event in &events {
                        self.shared.cursor.store(event.id, Ordering::SeqCst);
                        self.dispatch(event);
                    }
                }
                Err(e) => {
                    debug!("Event poll failed: {}", e);
                    tokio::time::sleep(ERROR_DELAY).await;
                }
            }
        }
        debug!("Event monitor loop exited");
    }
}

impl<A: DaemonApi + ?Sized> EventMonitor<A> {
    /// Id of the last event seen.
    pub fn cursor(&self) -> u64 {
        self.shared.cursor.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> FolderStatus {
        *self.shared.status.read().unwrap_or_else(|e| e.into_inner())
    }

    /// When the folder was last reported converged.
    pub fn last_converged(&self) -> Option<DateTime<Utc>> {
        *self.shared.last_converged.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a folder status; emits `StatusChanged` when it differs.
    pub fn set_status(&self, status: FolderStatus) {
        if status == FolderStatus::Converged {
            *self
                .shared
                .last_converged
                .write()
                .unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        }

        let previous = std::mem::replace(
            &mut *self.shared.status.write().unwrap_or_else(|e| e.into_inner()),
            status,
        );
        if previous != status {
            debug!("Folder status: {} -> {}", previous, status);
            self.bus.emit(EngineEvent::StatusChanged { status });
        }
    }

    /// Apply one daemon event.
    pub(crate) fn dispatch(&self, event: &DaemonEvent) {
        let binding = paths::snapshot(&self.binding);
        if !binding.is_bound() {
            return;
        }
        if event.folder().is_some_and(|folder| folder != binding.folder_id) {
            return;
        }

        match event.kind.as_str() {
            "DeviceConnected" | "DeviceDisconnected" => {
                self.bus.emit(EngineEvent::DevicesChanged);
            }
            "FolderCompletion" => self.set_status(FolderStatus::from_completion(&event.data)),
            "StateChanged" => {
                let to = event.data.get("to").and_then(Value::as_str).unwrap_or_default();
                if let Some(status) = FolderStatus::from_state_change(to) {
                    self.set_status(status);
                }
            }
            "FolderSummary" => self.set_status(FolderStatus::from_summary(&event.data)),
            "ItemFinished" => self.bus.emit(EngineEvent::HistoryChanged),
            "LocalIndexUpdated" => self.apply_local_index_update(&event.data),
            _ => {}
        }
    }

    fn apply_local_index_update(&self, data: &Value) {
        let files = updated_files(data);
        if files.is_empty() {
            return;
        }

        self.bus.emit(EngineEvent::HistoryChanged);
        for file in files {
            if let Some(path) = self.store.mark_synced(file) {
                self.bus.emit(EngineEvent::FileSynced { path });
            }
        }
    }
}

/// Paths from a `LocalIndexUpdated` payload: `filenames`, or `items` when it is a list.
pub(crate) fn updated_files(data: &Value) -> Vec<&str> {
    data.get("filenames")
        .and_then(Value::as_array)
        .or_else(|| data.get("items").and_then(Value::as_array))
        .map(|files| files.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

//! SyncEngine: wires the store, the driver, the monitor and the conflict
//! detector to one daemon folder.
//!
//! This is the surface the agent (or any other host) talks to. It owns no
//! I/O of its own beyond the `DaemonApi` and `FileSystem` it is given.

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{ApiError, DaemonApi, EventQuery, FileVersion};
use crate::config::BridgeConfig;
use crate::conflict::{ConflictArtifact, ConflictDetector, ConflictError};
use crate::events::{EngineEvent, EventBus};
use crate::fs::FileSystem;
use crate::history::{self, HistoryItem};
use crate::ignores;
use crate::monitor::EventMonitor;
use crate::paths::{self, FolderBinding, SharedBinding};
use crate::reconcile::{ReconcileError, ReconcileReport, ReconcileTimings, Reconciler, SyncOutcome};
use crate::status::FolderStatus;
use crate::store::StateStore;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No API key or folder configured")]
    NotConfigured,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Connected peers, by display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceSummary {
    pub connected: usize,
    pub names: Vec<String>,
}

pub struct SyncEngine<A: DaemonApi + ?Sized, F: FileSystem + ?Sized> {
    config: RwLock<BridgeConfig>,
    /// Absolute vault root as the daemon would see it
    vault_root: String,
    api: Arc<A>,
    store: StateStore,
    binding: SharedBinding,
    bus: Arc<EventBus>,
    reconciler: Reconciler<A>,
    monitor: EventMonitor<A>,
    conflicts: ConflictDetector<F>,
    paused: AtomicBool,
    device_names: RwLock<HashMap<String, String>>,
    devices: RwLock<DeviceSummary>,
    history: RwLock<Vec<HistoryItem>>,
}

impl<A, F> SyncEngine<A, F>
where
    A: DaemonApi + ?Sized + 'static,
    F: FileSystem + ?Sized + 'static,
{
    /// Load the state file and build an engine with default timings.
    pub async fn new(
        config: BridgeConfig,
        vault_root: impl Into<String>,
        api: Arc<A>,
        fs: Arc<F>,
    ) -> Self {
        Self::with_timings(config, vault_root, api, fs, ReconcileTimings::default()).await
    }

    pub async fn with_timings(
        config: BridgeConfig,
        vault_root: impl Into<String>,
        api: Arc<A>,
        fs: Arc<F>,
        timings: ReconcileTimings,
    ) -> Self {
        let store = StateStore::load(Arc::clone(&fs), config.state_path.clone()).await;
        let binding: SharedBinding =
            Arc::new(RwLock::new(FolderBinding::new(config.folder_id.clone(), "")));
        let bus = Arc::new(EventBus::new());

        let reconciler = Reconciler::new(
            Arc::clone(&api),
            store.clone(),
            Arc::clone(&binding),
            Arc::clone(&bus),
            timings,
        );
        let monitor = EventMonitor::new(
            Arc::clone(&api),
            store.clone(),
            Arc::clone(&binding),
            Arc::clone(&bus),
        );

        Self {
            config: RwLock::new(config),
            vault_root: paths::normalize(&vault_root.into()),
            api,
            store,
            binding,
            bus,
            reconciler,
            monitor,
            conflicts: ConflictDetector::new(fs),
            paused: AtomicBool::new(false),
            device_names: RwLock::new(HashMap::new()),
            devices: RwLock::new(DeviceSummary::default()),
            history: RwLock::new(Vec::new()),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> BridgeConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn folder_id(&self) -> String {
        self.config.read().unwrap_or_else(|e| e.into_inner()).folder_id.clone()
    }

    pub fn binding(&self) -> FolderBinding {
        paths::snapshot(&self.binding)
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn status(&self) -> FolderStatus {
        self.monitor.status()
    }

    pub fn last_converged(&self) -> Option<DateTime<Utc>> {
        self.monitor.last_converged()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn devices(&self) -> DeviceSummary {
        self.devices.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn history(&self) -> Vec<HistoryItem> {
        self.history.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_running()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connect to the daemon, reconcile what was left pending and start
    /// following the event stream.
    ///
    /// When the folder is not reachable only the device list is refreshed.
    pub async fn activate(&self) -> ReconcileReport {
        let status = self.check_connection().await;
        if !status.is_reachable() {
            info!("Daemon not ready ({}), skipping reconciliation", status);
            self.refresh_devices().await;
            return ReconcileReport::default();
        }

        if let Err(e) = self.refresh_binding().await {
            warn!("Failed to detect folder prefix: {}", e);
        }
        if let Err(e) = self.ensure_ignores().await {
            warn!("Failed to update ignore rules: {}", e);
        }
        self.refresh_devices().await;

        let report = self.reconciler.reconcile_all().await;
        self.monitor.start().await;
        report
    }

    /// Stop the monitor and persist the state.
    pub async fn deactivate(&self) {
        self.monitor.stop();
        self.store.flush().await;
        info!("Engine stopped");
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Probe the daemon and record the resulting folder status.
    ///
    /// A folder id the daemon no longer knows is cleared from the config.
    pub async fn check_connection(&self) -> FolderStatus {
        let status = match self.probe().await {
            Ok(status) => status,
            Err(ApiError::Unauthorized(e)) => {
                warn!("Daemon rejected the API key: {}", e);
                FolderStatus::Error
            }
            Err(e) => {
                debug!("Daemon unreachable: {}", e);
                FolderStatus::Disconnected
            }
        };
        self.monitor.set_status(status);
        status
    }

    async fn probe(&self) -> std::result::Result<FolderStatus, ApiError> {
        let folder_id = self.folder_id();
        if !self.api.has_credentials() || folder_id.is_empty() {
            return Ok(FolderStatus::Unconfigured);
        }

        let folders = self.api.folders().await?;
        let Some(folder) = folders.iter().find(|f| f.id == folder_id) else {
            warn!("Folder {} no longer exists on the daemon, clearing it", folder_id);
            self.clear_folder();
            return Ok(FolderStatus::Error);
        };

        self.paused.store(folder.paused, Ordering::SeqCst);
        if folder.paused {
            return Ok(FolderStatus::Paused);
        }

        let stats = self.api.folder_stats(&folder_id).await?;
        Ok(FolderStatus::from_stats(&stats))
    }

    fn clear_folder(&self) {
        {
            let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
            config.folder_id.clear();
            config.folder_label.clear();
        }
        *self.binding.write().unwrap_or_else(|e| e.into_inner()) = FolderBinding::default();
    }

    /// Look up the folder root in the daemon config and recompute the prefix.
    pub async fn refresh_binding(&self) -> std::result::Result<FolderBinding, ApiError> {
        let folder_id = self.folder_id();
        if folder_id.is_empty() {
            return Ok(self.binding());
        }

        let folders = self.api.folders().await?;
        let prefix = folders
            .iter()
            .find(|f| f.id == folder_id)
            .map(|f| paths::detect_prefix(&self.vault_root, &f.path))
            .unwrap_or_default();

        let binding = FolderBinding::new(folder_id, prefix);
        debug!("Folder prefix: \"{}\"", binding.prefix);
        *self.binding.write().unwrap_or_else(|e| e.into_inner()) = binding.clone();
        Ok(binding)
    }

    /// Make sure the daemon never syncs the state file.
    ///
    /// Returns whether the rules had to be changed.
    pub async fn ensure_ignores(&self) -> Result<bool> {
        let binding = self.require_binding()?;
        let state_path = self.config.read().unwrap_or_else(|e| e.into_inner()).state_path.clone();

        let current = self.api.ignores(&binding.folder_id).await?;
        let required = ignores::required_rules(&binding.prefix, &state_path);
        match ignores::merge_rules(&current, &required) {
            Some(rules) => {
                self.api.set_ignores(&binding.folder_id, &rules).await?;
                info!("Ignore rules updated");
                Ok(true)
            }
            None => {
                debug!("Ignore rules already up to date");
                Ok(false)
            }
        }
    }

    /// The folder's ignore rules as editable text.
    pub async fn load_ignore_rules(&self) -> Result<String> {
        let binding = self.require_binding()?;
        let rules = self.api.ignores(&binding.folder_id).await?;
        Ok(ignores::render_rules(&rules))
    }

    /// Replace the folder's ignore rules from edited text.
    pub async fn save_ignore_rules(&self, text: &str) -> Result<()> {
        let binding = self.require_binding()?;
        self.api
            .set_ignores(&binding.folder_id, &ignores::parse_rules(text))
            .await?;
        info!("Ignore rules saved");
        Ok(())
    }

    fn require_binding(&self) -> Result<FolderBinding> {
        let binding = self.binding();
        if !self.api.has_credentials() || !binding.is_bound() {
            return Err(EngineError::NotConfigured);
        }
        Ok(binding)
    }

    // ========================================================================
    // Local edits and reconciliation
    // ========================================================================

    /// Record a local modification. Returns false for paths that are not tracked.
    pub fn on_local_edit(&self, path: &str) -> bool {
        let path = paths::normalize(path);
        if paths::is_daemon_temp_file(&path) {
            return false;
        }
        let state_path = paths::normalize(&self.config.read().unwrap_or_else(|e| e.into_inner()).state_path);
        if path == state_path {
            return false;
        }

        self.store.mark_dirty(&path);
        self.bus.emit(EngineEvent::FilePending { path });
        true
    }

    /// Force a scan of one path and wait for the daemon to confirm it.
    pub async fn sync_file(&self, path: &str) -> Result<SyncOutcome> {
        self.require_binding()?;
        self.bus.emit(EngineEvent::FilePending {
            path: paths::normalize(path),
        });
        Ok(self.reconciler.sync_one_path(path).await?)
    }

    /// Reconcile every pending path.
    pub async fn reconcile_all(&self) -> ReconcileReport {
        self.reconciler.reconcile_all().await
    }

    /// Ask the daemon to rescan the whole folder.
    pub async fn force_scan_folder(&self) -> Result<()> {
        if !self.check_connection().await.is_reachable() {
            return Err(EngineError::NotConfigured);
        }
        let binding = self.require_binding()?;

        if let Err(e) = self.api.force_scan(&binding.folder_id, None).await {
            self.monitor.set_status(FolderStatus::Error);
            return Err(e.into());
        }
        self.monitor.set_status(FolderStatus::Converging);

        self.refresh_devices().await;
        self.refresh_history().await;
        Ok(())
    }

    /// Pause or resume the folder. Returns whether it is paused afterwards.
    pub async fn toggle_pause(&self) -> Result<bool> {
        let binding = self.require_binding()?;

        let folders = self.api.folders().await?;
        let paused = folders
            .iter()
            .find(|f| f.id == binding.folder_id)
            .map(|f| f.paused)
            .unwrap_or_else(|| self.is_paused());

        self.api.set_folder_paused(&binding.folder_id, !paused).await?;
        self.paused.store(!paused, Ordering::SeqCst);

        if paused {
            info!("Resuming folder {}", binding.folder_id);
            self.check_connection().await;
        } else {
            info!("Pausing folder {}", binding.folder_id);
            self.monitor.set_status(FolderStatus::Paused);
        }
        Ok(!paused)
    }

    // ========================================================================
    // Devices and history
    // ========================================================================

    /// Recount connected devices. Failures keep the previous summary.
    pub async fn refresh_devices(&self) -> DeviceSummary {
        match self.fetch_devices().await {
            Ok(summary) => {
                *self.devices.write().unwrap_or_else(|e| e.into_inner()) = summary.clone();
                summary
            }
            Err(e) => {
                debug!("Failed to refresh devices: {}", e);
                self.devices()
            }
        }
    }

    async fn fetch_devices(&self) -> std::result::Result<DeviceSummary, ApiError> {
        let needs_names = self
            .device_names
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty();
        if needs_names {
            let names: HashMap<String, String> = self
                .api
                .devices()
                .await?
                .into_iter()
                .map(|d| (d.device_id.clone(), d.display_name()))
                .collect();
            *self.device_names.write().unwrap_or_else(|e| e.into_inner()) = names;
        }

        let connected = self.api.connections().await?.connected_ids();
        let names_by_id = self.device_names.read().unwrap_or_else(|e| e.into_inner());
        let names: Vec<String> = connected
            .iter()
            .map(|id| {
                names_by_id
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| id.chars().take(7).collect())
            })
            .collect();

        Ok(DeviceSummary {
            connected: names.len(),
            names,
        })
    }

    /// Rebuild the recent-activity list. Failures keep the previous list.
    pub async fn refresh_history(&self) -> Vec<HistoryItem> {
        let (folder_id, patterns) = {
            let config = self.config.read().unwrap_or_else(|e| e.into_inner());
            (config.folder_id.clone(), config.ignore_patterns())
        };
        if folder_id.is_empty() {
            return self.history();
        }

        let query = EventQuery::recent(history::HISTORY_EVENT_LIMIT, &history::HISTORY_EVENT_TYPES);
        match self.api.events(&query).await {
            Ok(events) => {
                let items = history::build_history(&events, &folder_id, &patterns);
                *self.history.write().unwrap_or_else(|e| e.into_inner()) = items.clone();
                items
            }
            Err(e) => {
                warn!("Failed to fetch history: {}", e);
                self.history()
            }
        }
    }

    // ========================================================================
    // Conflicts and versions
    // ========================================================================

    pub async fn conflicts(&self) -> Result<Vec<ConflictArtifact>> {
        Ok(self.conflicts.scan().await?)
    }

    pub async fn resolve_keep_original(&self, artifact: &ConflictArtifact) -> Result<()> {
        Ok(self.conflicts.resolve_keep_original(artifact).await?)
    }

    pub async fn resolve_accept_conflict(&self, artifact: &ConflictArtifact) -> Result<()> {
        Ok(self.conflicts.resolve_accept_conflict(artifact).await?)
    }

    /// Archived versions of one vault path, newest first.
    pub async fn versions(&self, path: &str) -> Result<Vec<FileVersion>> {
        let binding = self.require_binding()?;
        let remote = binding.remote_path(path);
        let mut versions = self
            .api
            .folder_versions(&binding.folder_id)
            .await?
            .remove(&remote)
            .unwrap_or_default();
        versions.sort_by(|a, b| b.version_time.cmp(&a.version_time));
        Ok(versions)
    }

    /// Restore one archived version of a vault path.
    pub async fn restore_version(&self, path: &str, version_time: DateTime<FixedOffset>) -> Result<()> {
        let binding = self.require_binding()?;
        let selections = HashMap::from([(binding.remote_path(path), version_time)]);
        self.api.restore_versions(&binding.folder_id, &selections).await?;
        info!("Restored {} to version {}", path, version_time);
        Ok(())
    }
}

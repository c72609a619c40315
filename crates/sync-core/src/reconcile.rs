//! Reconciliation driver.
//!
//! Asks the daemon to rescan a path and polls its index until the local and
//! global version vectors agree. A path is only marked synced after the
//! daemon confirms convergence.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{ApiError, DaemonApi};
use crate::events::{EngineEvent, EventBus};
use crate::paths::{self, SharedBinding};
use crate::store::StateStore;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Scan request for {path} failed: {source}")]
    Scan {
        path: String,
        #[source]
        source: ApiError,
    },

    #[error("Index lookup for {path} failed: {source}")]
    Lookup {
        path: String,
        #[source]
        source: ApiError,
    },
}

/// Delays used while waiting for the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileTimings {
    /// Wait after the scan request before the first index lookup
    pub settle: Duration,
    /// Index lookups per path
    pub attempts: u32,
    /// Wait between two lookups
    pub retry_delay: Duration,
}

impl Default for ReconcileTimings {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(1500),
            attempts: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

/// Result of reconciling one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The daemon confirmed convergence; the path is synced
    Converged,
    /// No confirmation within the retry budget; the path stays pending
    Unconfirmed,
}

/// Summary of a full reconciliation pass.
#[derive(Debug, Default, Clone)]
pub struct ReconcileReport {
    /// Paths confirmed converged
    pub synced: Vec<String>,
    /// Paths still pending after their retry budget
    pub unconfirmed: Vec<String>,
    /// Paths whose reconciliation failed, with the error message
    pub failed: Vec<(String, String)>,
}

impl ReconcileReport {
    pub fn total(&self) -> usize {
        self.synced.len() + self.unconfirmed.len() + self.failed.len()
    }
}

pub struct Reconciler<A: DaemonApi + ?Sized> {
    api: Arc<A>,
    store: StateStore,
    binding: SharedBinding,
    bus: Arc<EventBus>,
    timings: ReconcileTimings,
}

impl<A: DaemonApi + ?Sized> Reconciler<A> {
    pub fn new(
        api: Arc<A>,
        store: StateStore,
        binding: SharedBinding,
        bus: Arc<EventBus>,
        timings: ReconcileTimings,
    ) -> Self {
        Self {
            api,
            store,
            binding,
            bus,
            timings,
        }
    }

    pub fn timings(&self) -> ReconcileTimings {
        self.timings
    }

    /// Force a scan of one vault path and wait for the daemon to confirm it.
    ///
    /// A re-edit of the path while this runs keeps it pending: the
    /// confirmation is only applied to the edit generation observed before
    /// the scan was requested.
    pub async fn sync_one_path(&self, local_path: &str) -> Result<SyncOutcome, ReconcileError> {
        let binding = paths::snapshot(&self.binding);
        if !binding.is_bound() {
            debug!("No folder bound, skipping {}", local_path);
            return Ok(SyncOutcome::Unconfirmed);
        }

        let local_path = paths::normalize(local_path);
        let remote = binding.remote_path(&local_path);
        let generation = self.store.generation(&local_path);

        debug!("Forcing scan of \"{}\" in folder {}", remote, binding.folder_id);
        self.api
            .force_scan(&binding.folder_id, Some(&remote))
            .await
            .map_err(|source| ReconcileError::Scan {
                path: remote.clone(),
                source,
            })?;

        tokio::time::sleep(self.timings.settle).await;

        for attempt in 1..=self.timings.attempts {
            match self.api.file_info(&binding.folder_id, &remote).await {
                Ok(info) if info.is_converged() => {
                    if self.confirm(&local_path, generation) {
                        return Ok(SyncOutcome::Converged);
                    }
                    debug!("\"{}\" changed during reconciliation, leaving pending", local_path);
                    return Ok(SyncOutcome::Unconfirmed);
                }
                Ok(_) => {
                    debug!(
                        "\"{}\" not converged yet (attempt {}/{})",
                        remote, attempt, self.timings.attempts
                    );
                }
                Err(ApiError::NotFound(_)) => {
                    debug!(
                        "\"{}\" not indexed yet (attempt {}/{})",
                        remote, attempt, self.timings.attempts
                    );
                }
                Err(source) => {
                    return Err(ReconcileError::Lookup {
                        path: remote,
                        source,
                    });
                }
            }

            if attempt < self.timings.attempts {
                tokio::time::sleep(self.timings.retry_delay).await;
            }
        }

        debug!("No confirmation for \"{}\", leaving pending", local_path);
        Ok(SyncOutcome::Unconfirmed)
    }

    /// Mark synced if the path was not edited since `generation`.
    ///
    /// A path that was not tracked when the scan started counts as
    /// converged: the daemon agrees and there is no entry to update, so no
    /// `FileSynced` is emitted.
    fn confirm(&self, local_path: &str, generation: Option<u64>) -> bool {
        let key = match generation {
            Some(generation) => self.store.mark_synced_if_current(local_path, generation),
            // Not tracked when the scan started; nothing to confirm against
            None => self.store.mark_synced(local_path),
        };
        match key {
            Some(path) => {
                self.bus.emit(EngineEvent::FileSynced { path });
                true
            }
            None => generation.is_none(),
        }
    }

    /// Reconcile every pending path, one at a time.
    ///
    /// All pending paths are announced first; failures are recorded and do
    /// not stop the pass.
    pub async fn reconcile_all(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        if !paths::snapshot(&self.binding).is_bound() {
            debug!("No folder bound, skipping reconciliation");
            return report;
        }

        let mut pending: Vec<String> = self
            .store
            .pending_entries()
            .into_iter()
            .map(|entry| entry.path)
            .collect();
        if pending.is_empty() {
            return report;
        }
        pending.sort();

        info!("Reconciling {} pending file(s)", pending.len());
        for path in &pending {
            self.bus.emit(EngineEvent::FilePending { path: path.clone() });
        }

        for path in pending {
            match self.sync_one_path(&path).await {
                Ok(SyncOutcome::Converged) => report.synced.push(path),
                Ok(SyncOutcome::Unconfirmed) => report.unconfirmed.push(path),
                Err(e) => {
                    warn!("Failed to reconcile {}: {}", path, e);
                    report.failed.push((path, e.to_string()));
                }
            }
        }

        info!(
            "Reconciliation done: {} synced, {} unconfirmed, {} failed",
            report.synced.len(),
            report.unconfirmed.len(),
            report.failed.len()
        );
        report
    }
}

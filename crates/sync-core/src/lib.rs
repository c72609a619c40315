//! sync-core: keeps a local vault's view of sync state in line with a
//! Syncthing daemon.
//!
//! This crate provides the core functionality for:
//! - Tracking per-path convergence status and persisting it (`store`)
//! - Confirming local edits against the daemon's index (`reconcile`)
//! - Following the daemon's event stream (`monitor`)
//! - Finding and resolving conflict copies (`conflict`)
//! - DaemonApi and FileSystem trait abstractions

pub mod api;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod events;
pub mod fs;
pub mod history;
pub mod ignores;
pub mod monitor;
pub mod paths;
pub mod reconcile;
pub mod state;
pub mod status;
pub mod store;
pub mod version;

pub use api::{ApiError, DaemonApi, DaemonEvent, EventQuery};
pub use config::{BridgeConfig, TtlCache};
pub use conflict::{ConflictArtifact, ConflictDetector, ConflictError};
pub use engine::{DeviceSummary, EngineError, SyncEngine};
pub use events::{EngineEvent, EventBus, Subscription};
pub use fs::{FileEntry, FileSystem, FsError, InMemoryFs};
pub use history::HistoryItem;
pub use monitor::EventMonitor;
pub use paths::FolderBinding;
pub use reconcile::{ReconcileReport, ReconcileTimings, Reconciler, SyncOutcome};
pub use state::{FileState, FileSyncStatus, StateDocument};
pub use status::FolderStatus;
pub use store::StateStore;

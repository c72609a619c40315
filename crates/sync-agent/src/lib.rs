//! sync-agent library: native adapters for sync-core.
//!
//! This is a thin library layer over the agent components,
//! allowing integration tests to access internal types.

pub mod cli;
pub mod http;
pub mod native_fs;
pub mod watcher;

// Re-export key types for convenience
pub use http::HttpDaemonClient;
pub use native_fs::NativeFs;
pub use watcher::{FileEvent, FileEventKind, FileWatcher};

//! Conflict artifacts left by the daemon.
//!
//! When two devices change the same file concurrently the daemon keeps the
//! losing copy next to the original as
//! `<base>.sync-conflict-<YYYYMMDD-HHMMSS>-<device-tag><ext>`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::fs::{FileSystem, FsError};

/// Token present in every conflict file name.
pub const CONFLICT_MARKER: &str = ".sync-conflict-";

static CONFLICT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+)\.sync-conflict-(\d{8}-\d{6})-(.+)(\.[^.]+)$")
        .unwrap_or_else(|e| panic!("invalid conflict pattern: {e}"))
});

#[derive(Debug, Error)]
pub enum ConflictError {
    #[error("Failed to scan vault for conflicts: {0}")]
    Scan(#[source] FsError),

    #[error("Failed to resolve conflict {path}: {source}")]
    Fs {
        path: String,
        #[source]
        source: FsError,
    },

    /// The conflict name did not reveal which file it was split off from
    #[error("Cannot infer the original of conflict {0}")]
    UnknownOriginal(String),
}

pub type Result<T> = std::result::Result<T, ConflictError>;

/// A conflict file found in the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictArtifact {
    /// Vault-relative path of the conflict file
    pub conflict_path: String,
    /// Name of the file the conflict was split off from
    pub inferred_original_name: String,
    /// Where the original lives (same directory as the conflict)
    pub original_path: String,
    /// `YYYYMMDD-HHMMSS`, when the name follows the full convention
    pub captured_timestamp: Option<String>,
}

impl ConflictArtifact {
    /// Build an artifact from a vault path, or `None` if it is not a conflict file.
    pub fn from_path(path: &str) -> Option<Self> {
        let (dir, file_name) = match path.rfind('/') {
            Some(pos) => (&path[..=pos], &path[pos + 1..]),
            None => ("", path),
        };
        let (original_name, timestamp) = parse_conflict_name(file_name)?;

        Some(Self {
            conflict_path: path.to_string(),
            original_path: format!("{}{}", dir, original_name),
            inferred_original_name: original_name,
            captured_timestamp: timestamp,
        })
    }

    /// Timestamp for display; "Unknown" when the name did not carry one.
    pub fn timestamp_label(&self) -> &str {
        self.captured_timestamp.as_deref().unwrap_or("Unknown")
    }
}

/// Split a conflict file name into the original name and capture timestamp.
///
/// Returns `None` for names without the conflict marker. Names carrying the
/// marker but not the full convention keep their whole name and no timestamp.
pub fn parse_conflict_name(file_name: &str) -> Option<(String, Option<String>)> {
    if !file_name.contains(CONFLICT_MARKER) {
        return None;
    }
    match CONFLICT_NAME.captures(file_name) {
        Some(caps) => Some((
            format!("{}{}", &caps[1], &caps[4]),
            Some(caps[2].to_string()),
        )),
        None => Some((file_name.to_string(), None)),
    }
}

/// Finds and resolves conflict artifacts in the vault.
pub struct ConflictDetector<F: FileSystem + ?Sized> {
    fs: Arc<F>,
}

impl<F: FileSystem + ?Sized> ConflictDetector<F> {
    pub fn new(fs: Arc<F>) -> Self {
        Self { fs }
    }

    /// All conflict artifacts currently in the vault, sorted by path.
    pub async fn scan(&self) -> Result<Vec<ConflictArtifact>> {
        let files = self.fs.walk_files().await.map_err(ConflictError::Scan)?;

        let conflicts: Vec<ConflictArtifact> = files
            .iter()
            .filter_map(|path| ConflictArtifact::from_path(path))
            .collect();

        debug!("Found {} conflict file(s)", conflicts.len());
        Ok(conflicts)
    }

    /// Keep the original: the conflict copy goes to the trash.
    pub async fn resolve_keep_original(&self, artifact: &ConflictArtifact) -> Result<()> {
        self.fs
            .trash(&artifact.conflict_path)
            .await
            .map_err(|source| ConflictError::Fs {
                path: artifact.conflict_path.clone(),
                source,
            })?;
        info!("Conflict discarded: {}", artifact.conflict_path);
        Ok(())
    }

    /// Keep the conflict copy: the original goes to the trash and the
    /// conflict file takes its place.
    ///
    /// Refused without touching the vault when the original path is unknown.
    pub async fn resolve_accept_conflict(&self, artifact: &ConflictArtifact) -> Result<()> {
        if artifact.original_path == artifact.conflict_path {
            return Err(ConflictError::UnknownOriginal(artifact.conflict_path.clone()));
        }

        let fs_err = |path: &str| {
            let path = path.to_string();
            move |source: FsError| ConflictError::Fs { path, source }
        };

        let original_exists = self
            .fs
            .exists(&artifact.original_path)
            .await
            .map_err(fs_err(&artifact.original_path))?;
        if original_exists {
            self.fs
                .trash(&artifact.original_path)
                .await
                .map_err(fs_err(&artifact.original_path))?;
        }

        self.fs
            .rename(&artifact.conflict_path, &artifact.original_path)
            .await
            .map_err(fs_err(&artifact.conflict_path))?;

        info!(
            "Conflict version restored: {} -> {}",
            artifact.conflict_path, artifact.original_path
        );
        Ok(())
    }
}

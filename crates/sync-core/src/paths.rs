//! Path correlation between the local vault and the daemon's shared folder.
//!
//! The daemon reports paths relative to the shared-folder root, which may sit
//! above the vault root (a "prefix" offset) and may use backslashes on Windows.
//! Everything that needs to match a daemon path against a tracked path goes
//! through this module.

use std::sync::{Arc, RwLock};

/// Substring the daemon uses for its in-progress temporary files.
pub const DAEMON_TEMP_MARKER: &str = "~syncthing~";

/// Replace all backslashes with forward slashes.
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

/// Whether a path refers to one of the daemon's temporary files.
pub fn is_daemon_temp_file(path: &str) -> bool {
    path.contains(DAEMON_TEMP_MARKER)
}

/// Find the stored key that an incoming daemon path refers to.
///
/// An exact match wins. Otherwise the longest stored key that the incoming
/// path ends with on a segment boundary is returned, so `Vault/Notes/a.md`
/// matches `Notes/a.md` (over a root `a.md`) but `OtherNotes/a.md` does not.
/// Equal-length candidates cannot both match, so the result never depends on
/// iteration order.
pub fn match_key<'a, I>(stored_keys: I, incoming: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let incoming = normalize(incoming);
    let mut suffix_match: Option<&'a str> = None;

    for key in stored_keys {
        if key == incoming {
            return Some(key);
        }
        let longer = suffix_match.is_none_or(|best| key.len() > best.len());
        if longer && ends_on_segment(&incoming, key) {
            suffix_match = Some(key);
        }
    }

    suffix_match
}

fn ends_on_segment(incoming: &str, key: &str) -> bool {
    let key = normalize(key);
    if key.is_empty() || !incoming.ends_with(&key) {
        return false;
    }
    let start = incoming.len() - key.len();
    start == 0 || incoming.as_bytes()[start - 1] == b'/'
}

/// Compute the offset of the vault root inside the daemon's folder root.
///
/// Returns an empty string when the roots coincide or the vault does not live
/// under the folder. A non-empty prefix always ends with `/`.
pub fn detect_prefix(local_root: &str, remote_root: &str) -> String {
    let local = normalize(local_root);
    let remote = normalize(remote_root);
    let remote = remote.strip_suffix('/').unwrap_or(&remote);

    if local == remote || !local.starts_with(remote) {
        return String::new();
    }

    let relative = local[remote.len()..].trim_start_matches('/');
    if relative.is_empty() {
        String::new()
    } else if relative.ends_with('/') {
        relative.to_string()
    } else {
        format!("{}/", relative)
    }
}

/// The shared folder this session is bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderBinding {
    /// Daemon folder id; empty when unconfigured
    pub folder_id: String,
    /// Offset of the vault root inside the folder root
    pub prefix: String,
}

impl FolderBinding {
    pub fn new(folder_id: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            folder_id: folder_id.into(),
            prefix: prefix.into(),
        }
    }

    /// Whether a folder is configured at all.
    pub fn is_bound(&self) -> bool {
        !self.folder_id.is_empty()
    }

    /// Translate a vault-relative path into the daemon's folder-relative path.
    pub fn remote_path(&self, local_path: &str) -> String {
        format!("{}{}", self.prefix, normalize(local_path))
    }
}

/// Binding shared between the reconciliation driver and the event monitor.
pub type SharedBinding = Arc<RwLock<FolderBinding>>;

/// Take a copy of the current binding.
pub fn snapshot(binding: &SharedBinding) -> FolderBinding {
    binding.read().unwrap_or_else(|e| e.into_inner()).clone()
}

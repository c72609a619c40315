//! FileSystem trait abstraction for vault file operations.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in sync-agent) - Uses tokio::fs, trashes into `.trash/`
//!
//! All paths are vault-relative and use forward slashes.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Directory entry
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// File or directory name (not full path)
    pub name: String,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Vault filesystem used for state persistence and conflict handling.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write file contents (creates parent directories if needed)
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;

    /// List directory contents ("" is the vault root)
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Move a file, replacing nothing: fails if `to` already exists
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Soft-delete a file so the user can still recover it
    async fn trash(&self, path: &str) -> Result<()>;

    /// Every file below the root, as vault-relative paths.
    ///
    /// Hidden entries (leading `.`) are skipped, matching what the editor
    /// itself exposes as vault files.
    async fn walk_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut dirs = vec![String::new()];

        while let Some(dir) = dirs.pop() {
            for entry in self.list(&dir).await? {
                if entry.name.starts_with('.') {
                    continue;
                }
                let path = if dir.is_empty() {
                    entry.name
                } else {
                    format!("{}/{}", dir, entry.name)
                };
                if entry.is_dir {
                    dirs.push(path);
                } else {
                    files.push(path);
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

/// In-memory filesystem for testing
pub struct InMemoryFs {
    files: RwLock<HashMap<String, Vec<u8>>>,
    dirs: RwLock<HashSet<String>>,
    /// Trashed files (path -> content), kept so tests can assert on them
    trashed: RwLock<HashMap<String, Vec<u8>>>,
    /// Number of completed writes, per path
    writes: RwLock<HashMap<String, usize>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        let mut dirs = HashSet::new();
        dirs.insert(String::new()); // Root directory
        Self {
            files: RwLock::new(HashMap::new()),
            dirs: RwLock::new(dirs),
            trashed: RwLock::new(HashMap::new()),
            writes: RwLock::new(HashMap::new()),
        }
    }

    /// Whether a file was moved to the trash.
    pub fn is_trashed(&self, path: &str) -> bool {
        let path = Self::normalize_path(path);
        self.trashed.read().unwrap().contains_key(&path)
    }

    /// How many times `path` has been written.
    pub fn write_count(&self, path: &str) -> usize {
        let path = Self::normalize_path(path);
        self.writes.read().unwrap().get(&path).copied().unwrap_or(0)
    }

    fn normalize_path(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    fn parent_path(path: &str) -> Option<String> {
        let normalized = Self::normalize_path(path);
        if normalized.is_empty() {
            None
        } else {
            match normalized.rfind('/') {
                Some(pos) => Some(normalized[..pos].to_string()),
                None => Some(String::new()),
            }
        }
    }

    fn mkdir_all(&self, path: &str) {
        let mut dirs = self.dirs.write().unwrap();
        let mut current = Some(Self::normalize_path(path));
        while let Some(dir) = current {
            current = Self::parent_path(&dir);
            dirs.insert(dir);
        }
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap();
        files
            .get(&path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let path = Self::normalize_path(path);

        if let Some(parent) = Self::parent_path(&path) {
            self.mkdir_all(&parent);
        }

        self.files
            .write()
            .unwrap()
            .insert(path.clone(), content.to_vec());
        *self.writes.write().unwrap().entry(path).or_insert(0) += 1;
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let path = Self::normalize_path(path);

        let dirs = self.dirs.read().unwrap();
        if !dirs.contains(&path) {
            return Err(FsError::NotFound(path));
        }

        let is_child =
            |candidate: &str| Self::parent_path(candidate).as_deref() == Some(path.as_str());
        let name_of = |candidate: &str| {
            candidate
                .rsplit('/')
                .next()
                .unwrap_or(candidate)
                .to_string()
        };

        let files = self.files.read().unwrap();
        let mut entries: Vec<FileEntry> = files
            .keys()
            .filter(|f| is_child(f.as_str()))
            .map(|f| FileEntry {
                name: name_of(f.as_str()),
                is_dir: false,
            })
            .collect();

        entries.extend(
            dirs.iter()
                .filter(|d| !d.is_empty() && is_child(d.as_str()))
                .map(|d| FileEntry {
                    name: name_of(d.as_str()),
                    is_dir: true,
                }),
        );

        Ok(entries)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap();
        let dirs = self.dirs.read().unwrap();
        Ok(files.contains_key(&path) || dirs.contains(&path))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = Self::normalize_path(from);
        let to = Self::normalize_path(to);

        let mut files = self.files.write().unwrap();
        if files.contains_key(&to) {
            return Err(FsError::AlreadyExists(to));
        }
        let content = files.remove(&from).ok_or(FsError::NotFound(from))?;
        files.insert(to.clone(), content);
        drop(files);

        if let Some(parent) = Self::parent_path(&to) {
            self.mkdir_all(&parent);
        }
        Ok(())
    }

    async fn trash(&self, path: &str) -> Result<()> {
        let path = Self::normalize_path(path);
        let content = self
            .files
            .write()
            .unwrap()
            .remove(&path)
            .ok_or_else(|| FsError::NotFound(path.clone()))?;
        self.trashed.write().unwrap().insert(path, content);
        Ok(())
    }
}

// Implement FileSystem for Arc<T> where T: FileSystem
// This allows sharing one filesystem between the store and the conflict detector
#[async_trait]
impl<T: FileSystem + ?Sized> FileSystem for std::sync::Arc<T> {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        (**self).list(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        (**self).rename(from, to).await
    }

    async fn trash(&self, path: &str) -> Result<()> {
        (**self).trash(path).await
    }

    async fn walk_files(&self) -> Result<Vec<String>> {
        (**self).walk_files().await
    }
}

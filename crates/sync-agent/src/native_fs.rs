//! Native filesystem implementation using tokio::fs.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use sync_core::fs::{FileEntry, FileSystem, FsError, Result};
use tokio::fs;

/// Directory (vault-relative) that soft-deleted files are moved into.
pub const TRASH_DIR: &str = ".trash";

/// Native filesystem rooted at the vault directory
pub struct NativeFs {
    base_path: PathBuf,
}

impl NativeFs {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }
}

fn map_err(path: &str, e: std::io::Error) -> FsError {
    match e.kind() {
        ErrorKind::NotFound => FsError::NotFound(path.to_string()),
        ErrorKind::AlreadyExists => FsError::AlreadyExists(path.to_string()),
        _ => FsError::Io(format!("{}: {}", path, e)),
    }
}

async fn create_parent(full_path: &std::path::Path, path: &str) -> Result<()> {
    if let Some(parent) = full_path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| map_err(path, e))?;
    }
    Ok(())
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(self.full_path(path))
            .await
            .map_err(|e| map_err(path, e))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);
        create_parent(&full_path, path).await?;
        fs::write(&full_path, content)
            .await
            .map_err(|e| map_err(path, e))
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(self.full_path(path))
            .await
            .map_err(|e| map_err(path, e))?;

        while let Some(entry) = dir.next_entry().await.map_err(|e| map_err(path, e))? {
            let name = entry.file_name().to_string_lossy().to_string();
            let file_type = entry.file_type().await.map_err(|e| map_err(path, e))?;
            entries.push(FileEntry {
                name,
                is_dir: file_type.is_dir(),
            });
        }

        Ok(entries)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        fs::try_exists(self.full_path(path))
            .await
            .map_err(|e| map_err(path, e))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.full_path(from);
        let target = self.full_path(to);

        if !fs::try_exists(&source).await.map_err(|e| map_err(from, e))? {
            return Err(FsError::NotFound(from.to_string()));
        }
        if fs::try_exists(&target).await.map_err(|e| map_err(to, e))? {
            return Err(FsError::AlreadyExists(to.to_string()));
        }

        create_parent(&target, to).await?;
        fs::rename(&source, &target)
            .await
            .map_err(|e| map_err(from, e))
    }

    async fn trash(&self, path: &str) -> Result<()> {
        let source = self.full_path(path);
        if !fs::try_exists(&source).await.map_err(|e| map_err(path, e))? {
            return Err(FsError::NotFound(path.to_string()));
        }

        let mut target = self.full_path(&format!("{}/{}", TRASH_DIR, path));
        if fs::try_exists(&target).await.map_err(|e| map_err(path, e))? {
            let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S%3f");
            target = self.full_path(&format!("{}/{}.{}", TRASH_DIR, path, stamp));
        }

        create_parent(&target, path).await?;
        fs::rename(&source, &target)
            .await
            .map_err(|e| map_err(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, NativeFs) {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::new(dir.path().to_path_buf());
        (dir, fs)
    }

    #[tokio::test]
    async fn test_write_creates_parents() {
        let (dir, fs) = setup();
        fs.write(".sync-agent/sync-state.json", b"{}").await.unwrap();

        assert!(dir.path().join(".sync-agent/sync-state.json").exists());
        assert_eq!(fs.read(".sync-agent/sync-state.json").await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let (_dir, fs) = setup();
        assert!(matches!(fs.read("nope.md").await, Err(FsError::NotFound(_))));
        assert!(!fs.exists("nope.md").await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_refuses_to_overwrite() {
        let (_dir, fs) = setup();
        fs.write("a.md", b"a").await.unwrap();
        fs.write("b.md", b"b").await.unwrap();

        assert!(matches!(
            fs.rename("a.md", "b.md").await,
            Err(FsError::AlreadyExists(_))
        ));
        assert_eq!(fs.read("b.md").await.unwrap(), b"b");

        fs.rename("a.md", "sub/c.md").await.unwrap();
        assert!(!fs.exists("a.md").await.unwrap());
        assert_eq!(fs.read("sub/c.md").await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_trash_moves_into_trash_dir() {
        let (dir, fs) = setup();
        fs.write("notes/a.md", b"first").await.unwrap();
        fs.trash("notes/a.md").await.unwrap();

        assert!(!fs.exists("notes/a.md").await.unwrap());
        assert!(dir.path().join(".trash/notes/a.md").exists());

        // Second trash of the same path keeps both copies
        fs.write("notes/a.md", b"second").await.unwrap();
        fs.trash("notes/a.md").await.unwrap();

        let trashed = fs.list(".trash/notes").await.unwrap();
        assert_eq!(trashed.len(), 2);
    }

    #[tokio::test]
    async fn test_walk_files_skips_hidden() {
        let (_dir, fs) = setup();
        fs.write("a.md", b"").await.unwrap();
        fs.write("sub/b.md", b"").await.unwrap();
        fs.write(".sync-agent/sync-state.json", b"").await.unwrap();
        fs.write("x.md", b"").await.unwrap();
        fs.trash("x.md").await.unwrap();

        assert_eq!(
            fs.walk_files().await.unwrap(),
            vec!["a.md".to_string(), "sub/b.md".to_string()]
        );
    }
}

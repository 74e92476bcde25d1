//! Content snapshots taken before destructive mutations

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use stepwise_files::{FileError, FileSystem};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::RollbackResult;

/// Creates and restores file and directory backups
///
/// Backups are plain copies in `backup_dir` with unique, timestamped names.
/// Directory backups are full recursive copies.
#[derive(Clone)]
pub struct BackupStore {
    backup_dir: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl BackupStore {
    /// Create a backup store writing into `backup_dir`
    pub fn new(backup_dir: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            fs,
        }
    }

    /// Directory receiving backups
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Snapshot a single file
    ///
    /// # Returns
    ///
    /// Path of the backup copy
    pub async fn create_backup_file(&self, path: &Path) -> RollbackResult<PathBuf> {
        if self.fs.is_dir(path).await {
            return Err(FileError::WrongKind {
                path: path.to_path_buf(),
                expected: "file",
            }
            .into());
        }

        let backup_path = self.backup_path_for(path, "bak");
        self.fs.create_dir(&self.backup_dir).await?;
        self.fs.copy_file(path, &backup_path).await?;

        info!(
            path = %path.display(),
            backup_path = %backup_path.display(),
            "File backup created"
        );
        Ok(backup_path)
    }

    /// Snapshot a directory tree
    pub async fn create_backup_directory(&self, path: &Path) -> RollbackResult<PathBuf> {
        let backup_path = self.backup_path_for(path, "bakdir");
        self.fs.create_dir(&self.backup_dir).await?;
        self.fs.copy_dir(path, &backup_path).await?;

        info!(
            path = %path.display(),
            backup_path = %backup_path.display(),
            "Directory backup created"
        );
        Ok(backup_path)
    }

    /// Whether `backup_path` holds a directory backup
    pub async fn is_directory_backup(&self, backup_path: &Path) -> bool {
        self.fs.is_dir(backup_path).await
    }

    /// Whether the backup still exists on disk
    pub async fn exists(&self, backup_path: &Path) -> bool {
        self.fs.exists(backup_path).await
    }

    /// Copy a file backup back over `target`
    pub async fn restore_file(&self, backup_path: &Path, target: &Path) -> RollbackResult<()> {
        debug!(
            backup_path = %backup_path.display(),
            target = %target.display(),
            "Restoring file from backup"
        );
        if self.fs.is_dir(target).await {
            self.fs.delete_dir(target).await?;
        }
        self.fs.copy_file(backup_path, target).await?;
        Ok(())
    }

    /// Replace the directory tree at `target` with the backup
    pub async fn restore_directory(&self, backup_path: &Path, target: &Path) -> RollbackResult<()> {
        debug!(
            backup_path = %backup_path.display(),
            target = %target.display(),
            "Restoring directory tree from backup"
        );
        if self.fs.is_dir(target).await {
            self.fs.delete_dir(target).await?;
        } else if self.fs.exists(target).await {
            self.fs.delete_file(target).await?;
        }
        self.fs.copy_dir(backup_path, target).await?;
        Ok(())
    }

    /// Delete a backup that is no longer needed
    pub async fn remove_backup(&self, backup_path: &Path) -> RollbackResult<()> {
        if self.fs.is_dir(backup_path).await {
            self.fs.delete_dir(backup_path).await?;
        } else {
            self.fs.delete_file(backup_path).await?;
        }
        Ok(())
    }

    fn backup_path_for(&self, path: &Path, suffix: &str) -> PathBuf {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("root");
        let unique = Uuid::new_v4().simple().to_string();
        self.backup_dir.join(format!(
            "{}.{}.{}.{}",
            name,
            Utc::now().format("%Y%m%d_%H%M%S_%f"),
            &unique[..8],
            suffix
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_files::LocalFileSystem;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> BackupStore {
        BackupStore::new(dir.path().join("backups"), Arc::new(LocalFileSystem::new()))
    }

    #[tokio::test]
    async fn test_file_backup_and_restore() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let file = dir.path().join("data.txt");
        std::fs::write(&file, "Original content").unwrap();

        let backup = store.create_backup_file(&file).await.unwrap();
        assert!(backup.starts_with(store.backup_dir()));

        std::fs::write(&file, "Modified content").unwrap();
        store.restore_file(&backup, &file).await.unwrap();

        assert_eq!(std::fs::read_to_string(&file).unwrap(), "Original content");
    }

    #[tokio::test]
    async fn test_backups_of_same_file_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let file = dir.path().join("data.txt");
        std::fs::write(&file, "v1").unwrap();

        let first = store.create_backup_file(&file).await.unwrap();
        let second = store.create_backup_file(&file).await.unwrap();

        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_directory_backup_replaces_tree() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let tree = dir.path().join("tree");
        std::fs::create_dir_all(tree.join("sub")).unwrap();
        std::fs::write(tree.join("sub/keep.txt"), "keep").unwrap();

        let backup = store.create_backup_directory(&tree).await.unwrap();
        assert!(store.is_directory_backup(&backup).await);

        std::fs::remove_dir_all(&tree).unwrap();
        std::fs::create_dir_all(&tree).unwrap();
        std::fs::write(tree.join("stray.txt"), "stray").unwrap();

        store.restore_directory(&backup, &tree).await.unwrap();

        assert_eq!(std::fs::read_to_string(tree.join("sub/keep.txt")).unwrap(), "keep");
        assert!(!tree.join("stray.txt").exists());
    }

    #[tokio::test]
    async fn test_file_backup_rejects_directories() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(store.create_backup_file(dir.path()).await.is_err());
    }
}

//! Filesystem trait and the local-disk implementation

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{FileError, FileResult};

/// Filesystem primitives consumed by the engine
///
/// Every operation either succeeds or reports a [`FileError`] naming the path
/// and the reason.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Create (or truncate) a file, creating parent directories first
    async fn create_file(&self, path: &Path, content: &[u8]) -> FileResult<()>;

    /// Read a whole file as bytes
    async fn read_file(&self, path: &Path) -> FileResult<Vec<u8>>;

    /// Read a whole file as UTF-8 text (lossy)
    async fn read_to_string(&self, path: &Path) -> FileResult<String> {
        let bytes = self.read_file(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Overwrite an existing file
    async fn write_file(&self, path: &Path, content: &[u8]) -> FileResult<()>;

    /// Delete a single file
    async fn delete_file(&self, path: &Path) -> FileResult<()>;

    /// Create a directory and all of its parents
    async fn create_dir(&self, path: &Path) -> FileResult<()>;

    /// Delete a directory tree
    async fn delete_dir(&self, path: &Path) -> FileResult<()>;

    /// Delete a directory only if it is empty
    async fn delete_empty_dir(&self, path: &Path) -> FileResult<()>;

    /// Whether anything exists at `path`
    async fn exists(&self, path: &Path) -> bool;

    /// Whether `path` is an existing directory
    async fn is_dir(&self, path: &Path) -> bool;

    /// Copy one file, creating the destination's parent directories
    async fn copy_file(&self, from: &Path, to: &Path) -> FileResult<()>;

    /// Recursively copy a directory tree into `to` (which must not exist yet)
    async fn copy_dir(&self, from: &Path, to: &Path) -> FileResult<()>;
}

/// [`FileSystem`] backed by the local disk through `tokio::fs`
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    /// Create a new local filesystem handle
    pub fn new() -> Self {
        Self
    }

    async fn ensure_parent(path: &Path) -> FileResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| FileError::from_io(parent, e))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn create_file(&self, path: &Path, content: &[u8]) -> FileResult<()> {
        debug!(path = %path.display(), bytes = content.len(), "Creating file");

        if fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(FileError::WrongKind {
                path: path.to_path_buf(),
                expected: "file",
            });
        }

        Self::ensure_parent(path).await?;
        fs::write(path, content)
            .await
            .map_err(|e| FileError::from_io(path, e))?;

        info!(path = %path.display(), "File written");
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> FileResult<Vec<u8>> {
        fs::read(path).await.map_err(|e| FileError::from_io(path, e))
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> FileResult<()> {
        if !self.exists(path).await {
            return Err(FileError::NotFound(path.to_path_buf()));
        }
        fs::write(path, content)
            .await
            .map_err(|e| FileError::from_io(path, e))
    }

    async fn delete_file(&self, path: &Path) -> FileResult<()> {
        debug!(path = %path.display(), "Deleting file");
        fs::remove_file(path)
            .await
            .map_err(|e| FileError::from_io(path, e))
    }

    async fn create_dir(&self, path: &Path) -> FileResult<()> {
        fs::create_dir_all(path)
            .await
            .map_err(|e| FileError::from_io(path, e))
    }

    async fn delete_dir(&self, path: &Path) -> FileResult<()> {
        debug!(path = %path.display(), "Deleting directory tree");
        fs::remove_dir_all(path)
            .await
            .map_err(|e| FileError::from_io(path, e))
    }

    async fn delete_empty_dir(&self, path: &Path) -> FileResult<()> {
        fs::remove_dir(path)
            .await
            .map_err(|e| FileError::from_io(path, e))
    }

    async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    async fn is_dir(&self, path: &Path) -> bool {
        fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> FileResult<()> {
        Self::ensure_parent(to).await?;
        fs::copy(from, to)
            .await
            .map(|_| ())
            .map_err(|e| FileError::from_io(from, e))
    }

    async fn copy_dir(&self, from: &Path, to: &Path) -> FileResult<()> {
        if !self.is_dir(from).await {
            return Err(FileError::WrongKind {
                path: from.to_path_buf(),
                expected: "directory",
            });
        }

        let from = from.to_path_buf();
        let to = to.to_path_buf();
        tokio::task::spawn_blocking(move || copy_tree(&from, &to))
            .await
            .map_err(|e| FileError::InvalidPath(format!("copy task failed: {}", e)))?
    }
}

fn copy_tree(from: &Path, to: &Path) -> FileResult<()> {
    std::fs::create_dir_all(to).map_err(|e| FileError::from_io(to, e))?;

    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| from.to_path_buf());
            match e.into_io_error() {
                Some(io) => FileError::from_io(path, io),
                None => FileError::InvalidPath(format!("symlink loop under {}", path.display())),
            }
        })?;

        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| FileError::InvalidPath(e.to_string()))?;
        let target: PathBuf = to.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| FileError::from_io(&target, e))?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| FileError::from_io(entry.path(), e))?;
        }
    }

    Ok(())
}

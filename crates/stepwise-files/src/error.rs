//! Error types for filesystem primitives

use std::path::PathBuf;

/// Errors that can occur during file operations
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    /// File or directory not found at the specified path
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission denied for the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Path exists but has the wrong kind (file vs directory)
    #[error("Unexpected path kind at {path}: expected {expected}")]
    WrongKind {
        /// Offending path
        path: PathBuf,
        /// What the operation expected to find
        expected: &'static str,
    },

    /// Invalid path provided
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Any other I/O failure, with the path it happened on
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being operated on
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl FileError {
    /// Classify an I/O error raised while operating on `path`
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            _ => Self::Io { path, source },
        }
    }
}

/// Result type for file operations
pub type FileResult<T> = Result<T, FileError>;

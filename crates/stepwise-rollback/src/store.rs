//! Durable storage for the operation log

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::error::RollbackResult;
use crate::models::OperationLog;

/// Reads and writes the JSON operation log
#[derive(Debug, Clone)]
pub struct LogStore {
    path: PathBuf,
}

impl LogStore {
    /// Create a store for the log at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the persisted log
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the log
    ///
    /// A missing file starts an empty log. An unreadable or corrupt file is
    /// reported and also starts an empty log.
    pub async fn load(&self) -> OperationLog {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No operation log yet, starting empty");
                return OperationLog::default();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Operation log unreadable, starting empty");
                return OperationLog::default();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(log) => log,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Operation log corrupt, starting empty");
                OperationLog::default()
            }
        }
    }

    /// Persist the log, replacing the previous file atomically
    pub async fn save(&self, log: &OperationLog) -> RollbackResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(log)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json).await?;
        fs::rename(&tmp, &self.path).await?;

        debug!(
            path = %self.path.display(),
            operations = log.operations.len(),
            transactions = log.transactions.len(),
            "Operation log saved"
        );
        Ok(())
    }
}

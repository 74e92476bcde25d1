//! Rollback manager configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where the operation log and backups live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackConfig {
    /// Path of the persisted operation/transaction log
    pub log_path: PathBuf,
    /// Directory that receives file and directory backups
    pub backup_dir: PathBuf,
}

impl RollbackConfig {
    /// Keep both the log and backups under `root`
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            log_path: root.join("operation_log.json"),
            backup_dir: root.join("backups"),
        }
    }

    fn default_root() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stepwise")
    }
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self::under(Self::default_root())
    }
}

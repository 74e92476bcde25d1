//! Operation log and transaction data models

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Kind of recorded mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    /// File or directory created, modified or deleted
    FileSystem,
    /// In-place content manipulation of an existing file
    Content,
    /// Shell command execution
    Command,
    /// Marker for a whole plan run
    Plan,
}

/// Filesystem action recorded in a FILE_SYSTEM operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    /// File created where nothing existed
    Create,
    /// Existing file overwritten
    Modify,
    /// File deleted
    Delete,
    /// Directory created
    CreateDir,
    /// Directory tree deleted
    DeleteDir,
}

impl FileAction {
    /// Whether the action targets a directory
    pub fn is_directory(self) -> bool {
        matches!(self, Self::CreateDir | Self::DeleteDir)
    }

    /// Whether the action brings a new path into existence
    pub fn creates(self) -> bool {
        matches!(self, Self::Create | Self::CreateDir)
    }
}

/// One entry in the append-only operation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Unique operation id
    pub id: String,
    /// Kind of operation
    pub operation_type: OperationType,
    /// Operation-specific parameters
    pub params: Value,
    /// When the operation was recorded
    pub timestamp: DateTime<Utc>,
    /// Snapshot taken before the mutation, if any
    pub backup_path: Option<PathBuf>,
    /// Owning transaction, if any
    pub transaction_id: Option<String>,
}

impl OperationRecord {
    fn new(
        operation_type: OperationType,
        params: Value,
        backup_path: Option<PathBuf>,
        transaction_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation_type,
            params,
            timestamp: Utc::now(),
            backup_path,
            transaction_id,
        }
    }

    /// Record for a filesystem action on `path`
    pub fn file_system(
        action: FileAction,
        path: impl Into<PathBuf>,
        backup_path: Option<PathBuf>,
        transaction_id: Option<String>,
    ) -> Self {
        let path = path.into();
        let params = json!({
            "action": action,
            "path": path.to_string_lossy(),
            "is_directory": action.is_directory(),
            "existed_before": backup_path.is_some() || !action.creates(),
        });
        Self::new(OperationType::FileSystem, params, backup_path, transaction_id)
    }

    /// Record for a content manipulation of `path`
    pub fn content(
        path: impl Into<PathBuf>,
        description: &str,
        backup_path: Option<PathBuf>,
        transaction_id: Option<String>,
    ) -> Self {
        let path: PathBuf = path.into();
        let params = json!({
            "path": path.to_string_lossy(),
            "description": description,
        });
        Self::new(OperationType::Content, params, backup_path, transaction_id)
    }

    /// Record for an executed command
    pub fn command(command: &str, cwd: Option<PathBuf>, transaction_id: Option<String>) -> Self {
        let params = json!({
            "command": command,
            "cwd": cwd.map(|dir| dir.to_string_lossy().into_owned()),
        });
        Self::new(OperationType::Command, params, None, transaction_id)
    }

    /// Marker record for a plan run
    pub fn plan(plan_id: &str, goal: &str, transaction_id: Option<String>) -> Self {
        let params = json!({
            "plan_id": plan_id,
            "goal": goal,
        });
        Self::new(OperationType::Plan, params, None, transaction_id)
    }

    /// String parameter by key
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Target path for FILE_SYSTEM and CONTENT operations
    pub fn path(&self) -> Option<PathBuf> {
        self.param_str("path").map(PathBuf::from)
    }

    /// Recorded command for COMMAND operations
    pub fn command_line(&self) -> Option<&str> {
        self.param_str("command")
    }

    /// Working directory a COMMAND operation ran in, when recorded
    pub fn cwd(&self) -> Option<PathBuf> {
        self.param_str("cwd").map(PathBuf::from)
    }

    /// Filesystem action for FILE_SYSTEM operations
    pub fn file_action(&self) -> Option<FileAction> {
        self.params
            .get("action")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Directories a `create` had to make, deepest first
    pub fn created_dirs(&self) -> Vec<PathBuf> {
        self.params
            .get("created_dirs")
            .and_then(Value::as_array)
            .map(|dirs| dirs.iter().filter_map(Value::as_str).map(PathBuf::from).collect())
            .unwrap_or_default()
    }

    /// Whether the target existed before the mutation
    pub fn existed_before(&self) -> bool {
        self.params
            .get("existed_before")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }
}

/// Lifecycle status of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Open and accepting operations
    Pending,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Stopped before completion
    Cancelled,
}

/// A named group of operations undertaken together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction id
    pub id: String,
    /// Human-readable description
    pub description: String,
    /// Current status
    pub status: TransactionStatus,
    /// Operations recorded under this transaction, oldest first
    pub operation_ids: Vec<String>,
    /// When the transaction started
    pub started: DateTime<Utc>,
    /// When the transaction was closed
    pub ended: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Open a new pending transaction
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            status: TransactionStatus::Pending,
            operation_ids: Vec::new(),
            started: Utc::now(),
            ended: None,
        }
    }

    /// Whether the transaction still accepts operations
    pub fn is_open(&self) -> bool {
        self.status == TransactionStatus::Pending
    }
}

/// Persisted operation/transaction log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationLog {
    /// Operations, oldest first
    #[serde(default)]
    pub operations: Vec<OperationRecord>,
    /// All transactions ever started
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl OperationLog {
    /// Index of an operation in the log
    pub fn position(&self, operation_id: &str) -> Option<usize> {
        self.operations.iter().position(|op| op.id == operation_id)
    }

    /// Look up a transaction
    pub fn transaction(&self, transaction_id: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.id == transaction_id)
    }

    /// Look up a transaction mutably
    pub fn transaction_mut(&mut self, transaction_id: &str) -> Option<&mut Transaction> {
        self.transactions.iter_mut().find(|t| t.id == transaction_id)
    }
}

/// Outcome of undoing a whole transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRollbackSummary {
    /// Transaction that was rolled back
    pub transaction_id: String,
    /// True only if every operation was undone
    pub success: bool,
    /// Operations successfully undone
    pub rolled_back: usize,
    /// Operations that could not be undone
    pub failed: usize,
}

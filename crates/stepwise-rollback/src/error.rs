//! Error types for the rollback manager

use thiserror::Error;

use stepwise_files::FileError;
use stepwise_process::ProcessError;

/// Errors that can occur while recording or undoing operations
#[derive(Debug, Error)]
pub enum RollbackError {
    /// Operation id not present in the log (never recorded or already undone)
    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    /// File or content operation has no usable backup
    #[error("No usable backup for operation {0}")]
    NoBackup(String),

    /// Command has no known compensating action
    #[error("No compensating action for command: {0}")]
    NoCompensation(String),

    /// Operation kind cannot be reversed
    #[error("Operation {0} is not reversible")]
    Irreversible(String),

    /// Unknown, closed or otherwise invalid transaction
    #[error("Transaction state error: {0}")]
    TransactionState(String),

    /// Restoring state failed part way
    #[error("Restore failed for operation {operation_id}: {reason}")]
    Restore {
        /// Operation being undone
        operation_id: String,
        /// What went wrong
        reason: String,
    },

    /// Filesystem primitive failed
    #[error("File error: {0}")]
    File(#[from] FileError),

    /// Compensating command could not run
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// Persisting the log failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RollbackError {
    /// Create a new TransactionState error with context
    pub fn transaction_state(msg: impl Into<String>) -> Self {
        Self::TransactionState(msg.into())
    }

    /// Create a new Restore error with context
    pub fn restore(operation_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Restore {
            operation_id: operation_id.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for rollback operations
pub type RollbackResult<T> = Result<T, RollbackError>;

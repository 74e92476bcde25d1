//! Error types for command execution

use std::io;
use thiserror::Error;

/// Command execution errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Failed to spawn the process
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(#[from] io::Error),

    /// Process timed out
    #[error("Process timed out after {seconds}s")]
    Timeout {
        /// Configured limit
        seconds: u64,
    },

    /// The safety gate refused to let the command run
    #[error("Denied by safety gate: {reason}")]
    SafetyDenied {
        /// Reason reported by the gate
        reason: String,
    },

    /// Invalid command or configuration
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

/// Result type for process operations
pub type Result<T> = std::result::Result<T, ProcessError>;

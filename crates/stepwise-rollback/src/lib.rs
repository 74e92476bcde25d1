#![warn(missing_docs)]

//! Transactional rollback for stepwise
//!
//! Every mutation the engine performs is recorded here as an
//! [`OperationRecord`], grouped into [`Transaction`]s, and can be undone:
//! files and directories from backups taken before the mutation, commands
//! through derived compensating commands.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stepwise_files::LocalFileSystem;
//! use stepwise_process::ShellCommandExecutor;
//! use stepwise_rollback::{RollbackConfig, RollbackManager, TransactionStatus};
//!
//! let manager = RollbackManager::open(
//!     &RollbackConfig::default(),
//!     Arc::new(LocalFileSystem::new()),
//!     Arc::new(ShellCommandExecutor::new()),
//! )
//! .await;
//!
//! let tx = manager.start_transaction("stage changes").await?;
//! let op = manager.record_command_execution("git add file.txt", None, Some(&tx)).await?;
//! manager.end_transaction(&tx, TransactionStatus::Completed).await;
//!
//! // Runs `git reset file.txt`
//! manager.rollback_operation(&op).await;
//! ```

pub mod backup;
pub mod compensation;
pub mod config;
pub mod error;
pub mod manager;
pub mod models;
pub mod store;

pub use backup::BackupStore;
pub use compensation::{derive_compensation, in_directory};
pub use config::RollbackConfig;
pub use error::{RollbackError, RollbackResult};
pub use manager::RollbackManager;
pub use models::{
    FileAction, OperationLog, OperationRecord, OperationType, Transaction,
    TransactionRollbackSummary, TransactionStatus,
};
pub use store::LogStore;

//! Transactional rollback manager
//!
//! Owns the operation/transaction log. Callers append through the `record_*`
//! and `prepare_*` methods and undo through `rollback_operation` and
//! `rollback_transaction`. Every change is persisted before the call returns.
//!
//! Undoing a single operation discards it and every operation recorded after
//! it, since later operations may depend on the state being reverted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use stepwise_files::{FileError, FileSystem};
use stepwise_process::CommandExecutor;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::backup::BackupStore;
use crate::compensation::{derive_compensation, in_directory};
use crate::config::RollbackConfig;
use crate::error::{RollbackError, RollbackResult};
use crate::models::{
    FileAction, OperationLog, OperationRecord, OperationType, Transaction,
    TransactionRollbackSummary, TransactionStatus,
};
use crate::store::LogStore;

/// Undo log with backups and compensating commands
pub struct RollbackManager {
    log: Mutex<OperationLog>,
    store: LogStore,
    backups: BackupStore,
    fs: Arc<dyn FileSystem>,
    commands: Arc<dyn CommandExecutor>,
}

impl RollbackManager {
    /// Open the manager, loading any persisted log
    ///
    /// # Arguments
    ///
    /// * `config` - Log and backup locations
    /// * `fs` - Filesystem used for backups and restores
    /// * `commands` - Executor that runs compensating commands
    pub async fn open(
        config: &RollbackConfig,
        fs: Arc<dyn FileSystem>,
        commands: Arc<dyn CommandExecutor>,
    ) -> Self {
        let store = LogStore::new(&config.log_path);
        let log = store.load().await;

        info!(
            log_path = %config.log_path.display(),
            operations = log.operations.len(),
            transactions = log.transactions.len(),
            "Rollback manager opened"
        );

        Self {
            log: Mutex::new(log),
            store,
            backups: BackupStore::new(&config.backup_dir, fs.clone()),
            fs,
            commands,
        }
    }

    /// Backup store used for snapshots
    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    /// Path of the persisted log
    pub fn log_path(&self) -> &Path {
        self.store.path()
    }

    /// Open a new pending transaction
    pub async fn start_transaction(&self, description: &str) -> RollbackResult<String> {
        let mut log = self.log.lock().await;
        let transaction = Transaction::new(description);
        let id = transaction.id.clone();
        log.transactions.push(transaction);

        if let Err(e) = self.store.save(&log).await {
            log.transactions.pop();
            return Err(e);
        }

        info!(transaction_id = %id, description = %description, "Transaction started");
        Ok(id)
    }

    /// Close a transaction
    ///
    /// # Returns
    ///
    /// `false` if the transaction is unknown, already closed, or `status` is
    /// `pending`
    pub async fn end_transaction(&self, transaction_id: &str, status: TransactionStatus) -> bool {
        match self.try_end_transaction(transaction_id, status).await {
            Ok(()) => true,
            Err(e) => {
                warn!(transaction_id = %transaction_id, error = %e, "Could not end transaction");
                false
            }
        }
    }

    /// Close a transaction, reporting why it could not be closed
    pub async fn try_end_transaction(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
    ) -> RollbackResult<()> {
        if status == TransactionStatus::Pending {
            return Err(RollbackError::transaction_state(
                "a transaction cannot be ended as pending",
            ));
        }

        let mut log = self.log.lock().await;
        let transaction = log.transaction_mut(transaction_id).ok_or_else(|| {
            RollbackError::transaction_state(format!("unknown transaction {}", transaction_id))
        })?;
        if !transaction.is_open() {
            return Err(RollbackError::transaction_state(format!(
                "transaction {} is already {:?}",
                transaction_id, transaction.status
            )));
        }

        let previous = transaction.clone();
        transaction.status = status;
        transaction.ended = Some(Utc::now());

        if let Err(e) = self.store.save(&log).await {
            if let Some(transaction) = log.transaction_mut(transaction_id) {
                *transaction = previous;
            }
            return Err(e);
        }

        info!(transaction_id = %transaction_id, status = ?status, "Transaction ended");
        Ok(())
    }

    /// Record a filesystem action
    pub async fn record_file_operation(
        &self,
        action: FileAction,
        path: &Path,
        backup_path: Option<PathBuf>,
        transaction_id: Option<&str>,
    ) -> RollbackResult<String> {
        let record = OperationRecord::file_system(
            action,
            path,
            backup_path,
            transaction_id.map(str::to_string),
        );
        self.append(record).await
    }

    /// Record an in-place content change of an existing file
    pub async fn record_content_manipulation(
        &self,
        path: &Path,
        description: &str,
        backup_path: Option<PathBuf>,
        transaction_id: Option<&str>,
    ) -> RollbackResult<String> {
        let record = OperationRecord::content(
            path,
            description,
            backup_path,
            transaction_id.map(str::to_string),
        );
        self.append(record).await
    }

    /// Record an executed command
    pub async fn record_command_execution(
        &self,
        command: &str,
        cwd: Option<PathBuf>,
        transaction_id: Option<&str>,
    ) -> RollbackResult<String> {
        let record = OperationRecord::command(command, cwd, transaction_id.map(str::to_string));
        self.append(record).await
    }

    /// Record the start of a plan run
    pub async fn record_plan_execution(
        &self,
        plan_id: &str,
        goal: &str,
        transaction_id: Option<&str>,
    ) -> RollbackResult<String> {
        let record = OperationRecord::plan(plan_id, goal, transaction_id.map(str::to_string));
        self.append(record).await
    }

    /// Protect `path` before it is written
    ///
    /// An existing file is backed up and recorded as `modify`. A missing file
    /// is recorded as `create`, which rolls back by deletion. Parent
    /// directories the write will create are recorded too and removed on
    /// rollback while they are empty.
    pub async fn prepare_file_write(
        &self,
        path: &Path,
        transaction_id: Option<&str>,
    ) -> RollbackResult<String> {
        if self.fs.is_dir(path).await {
            return Err(FileError::WrongKind {
                path: path.to_path_buf(),
                expected: "file",
            }
            .into());
        }

        if self.fs.exists(path).await {
            let backup = self.backups.create_backup_file(path).await?;
            self.record_file_operation(FileAction::Modify, path, Some(backup), transaction_id)
                .await
        } else {
            let mut record = OperationRecord::file_system(
                FileAction::Create,
                path,
                None,
                transaction_id.map(str::to_string),
            );
            let created_dirs = self.missing_parents(path).await;
            if !created_dirs.is_empty() {
                record.params["created_dirs"] = json!(created_dirs
                    .iter()
                    .map(|dir| dir.to_string_lossy().into_owned())
                    .collect::<Vec<_>>());
            }
            self.append(record).await
        }
    }

    /// Ancestors of `path` that do not exist yet, deepest first
    async fn missing_parents(&self, path: &Path) -> Vec<PathBuf> {
        let mut missing = Vec::new();
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() || self.fs.exists(dir).await {
                break;
            }
            missing.push(dir.to_path_buf());
            current = dir.parent();
        }
        missing
    }

    /// Protect a file or directory tree before it is removed
    pub async fn prepare_removal(
        &self,
        path: &Path,
        transaction_id: Option<&str>,
    ) -> RollbackResult<String> {
        if self.fs.is_dir(path).await {
            let backup = self.backups.create_backup_directory(path).await?;
            self.record_file_operation(FileAction::DeleteDir, path, Some(backup), transaction_id)
                .await
        } else {
            let backup = self.backups.create_backup_file(path).await?;
            self.record_file_operation(FileAction::Delete, path, Some(backup), transaction_id)
                .await
        }
    }

    /// Undo one operation
    ///
    /// # Returns
    ///
    /// `true` if the operation was reversed and the log truncated at it
    pub async fn rollback_operation(&self, operation_id: &str) -> bool {
        match self.try_rollback_operation(operation_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(operation_id = %operation_id, error = %e, "Rollback failed");
                false
            }
        }
    }

    /// Undo one operation, reporting why it could not be undone
    pub async fn try_rollback_operation(&self, operation_id: &str) -> RollbackResult<()> {
        let mut log = self.log.lock().await;
        self.rollback_locked(&mut log, operation_id).await
    }

    /// Undo every operation of a transaction, newest first
    ///
    /// Individual failures are counted and do not stop the remaining
    /// operations from being attempted.
    pub async fn rollback_transaction(&self, transaction_id: &str) -> TransactionRollbackSummary {
        let mut log = self.log.lock().await;

        let Some(operation_ids) = log
            .transaction(transaction_id)
            .map(|t| t.operation_ids.clone())
        else {
            warn!(transaction_id = %transaction_id, "Rollback requested for unknown transaction");
            return TransactionRollbackSummary {
                transaction_id: transaction_id.to_string(),
                success: false,
                rolled_back: 0,
                failed: 0,
            };
        };

        info!(
            transaction_id = %transaction_id,
            operation_count = operation_ids.len(),
            "Rolling back transaction"
        );

        let mut rolled_back = 0;
        let mut failed = 0;
        for operation_id in operation_ids.iter().rev() {
            let is_marker = log
                .position(operation_id)
                .map(|i| log.operations[i].operation_type == OperationType::Plan)
                .unwrap_or(false);
            if is_marker {
                debug!(operation_id = %operation_id, "Skipping plan marker");
                continue;
            }

            match self.rollback_locked(&mut log, operation_id).await {
                Ok(()) => rolled_back += 1,
                Err(e) => {
                    error!(
                        transaction_id = %transaction_id,
                        operation_id = %operation_id,
                        error = %e,
                        "Operation could not be rolled back"
                    );
                    failed += 1;
                }
            }
        }

        info!(
            transaction_id = %transaction_id,
            rolled_back,
            failed,
            "Transaction rollback finished"
        );

        TransactionRollbackSummary {
            transaction_id: transaction_id.to_string(),
            success: failed == 0,
            rolled_back,
            failed,
        }
    }

    /// All operations, oldest first
    pub async fn operations(&self) -> Vec<OperationRecord> {
        self.log.lock().await.operations.clone()
    }

    /// One operation by id
    pub async fn operation(&self, operation_id: &str) -> Option<OperationRecord> {
        let log = self.log.lock().await;
        log.position(operation_id).map(|i| log.operations[i].clone())
    }

    /// All transactions
    pub async fn transactions(&self) -> Vec<Transaction> {
        self.log.lock().await.transactions.clone()
    }

    /// One transaction by id
    pub async fn transaction(&self, transaction_id: &str) -> Option<Transaction> {
        self.log.lock().await.transaction(transaction_id).cloned()
    }

    async fn append(&self, record: OperationRecord) -> RollbackResult<String> {
        let mut log = self.log.lock().await;

        if let Some(tx_id) = &record.transaction_id {
            let transaction = log.transaction_mut(tx_id).ok_or_else(|| {
                RollbackError::transaction_state(format!("unknown transaction {}", tx_id))
            })?;
            if !transaction.is_open() {
                return Err(RollbackError::transaction_state(format!(
                    "transaction {} is closed",
                    tx_id
                )));
            }
            transaction.operation_ids.push(record.id.clone());
        }

        let id = record.id.clone();
        let transaction_id = record.transaction_id.clone();
        let operation_type = record.operation_type;
        log.operations.push(record);

        if let Err(e) = self.store.save(&log).await {
            log.operations.pop();
            if let Some(tx) = transaction_id.as_deref().and_then(|t| log.transaction_mut(t)) {
                tx.operation_ids.pop();
            }
            return Err(e);
        }

        debug!(
            operation_id = %id,
            operation_type = ?operation_type,
            transaction_id = ?transaction_id,
            "Operation recorded"
        );
        Ok(id)
    }

    async fn rollback_locked(
        &self,
        log: &mut OperationLog,
        operation_id: &str,
    ) -> RollbackResult<()> {
        let index = log
            .position(operation_id)
            .ok_or_else(|| RollbackError::OperationNotFound(operation_id.to_string()))?;
        let record = log.operations[index].clone();

        self.reverse(&record).await?;

        let discarded = log.operations.split_off(index);
        if let Err(e) = self.store.save(log).await {
            // Disk state is already reverted, so the in-memory truncation stands.
            error!(operation_id = %operation_id, error = %e, "Failed to persist truncated log");
            return Err(e);
        }

        info!(
            operation_id = %operation_id,
            discarded = discarded.len(),
            "Operation rolled back"
        );
        Ok(())
    }

    async fn reverse(&self, record: &OperationRecord) -> RollbackResult<()> {
        match record.operation_type {
            OperationType::FileSystem => self.reverse_file(record).await,
            OperationType::Content => {
                let path = Self::target_path(record)?;
                let backup = self.usable_backup(record).await?;
                self.backups.restore_file(&backup, &path).await
            }
            OperationType::Command => self.compensate(record).await,
            OperationType::Plan => Err(RollbackError::Irreversible(record.id.clone())),
        }
    }

    async fn reverse_file(&self, record: &OperationRecord) -> RollbackResult<()> {
        let path = Self::target_path(record)?;

        if record.backup_path.is_some() {
            let backup = self.usable_backup(record).await?;
            return if self.backups.is_directory_backup(&backup).await {
                self.backups.restore_directory(&backup, &path).await
            } else {
                self.backups.restore_file(&backup, &path).await
            };
        }

        let created = record.file_action().is_some_and(FileAction::creates);
        if !created || record.existed_before() {
            return Err(RollbackError::NoBackup(record.id.clone()));
        }

        debug!(path = %path.display(), "Removing path created by operation");
        if self.fs.is_dir(&path).await {
            self.fs.delete_dir(&path).await?;
        } else if self.fs.exists(&path).await {
            self.fs.delete_file(&path).await?;
        }

        for dir in record.created_dirs() {
            if let Err(e) = self.fs.delete_empty_dir(&dir).await {
                debug!(path = %dir.display(), error = %e, "Keeping created directory");
                break;
            }
        }
        Ok(())
    }

    async fn compensate(&self, record: &OperationRecord) -> RollbackResult<()> {
        let command = record
            .command_line()
            .ok_or_else(|| RollbackError::restore(&record.id, "record has no command"))?;
        let mut compensation = derive_compensation(command)
            .ok_or_else(|| RollbackError::NoCompensation(command.to_string()))?;
        if let Some(cwd) = record.cwd() {
            compensation = in_directory(&cwd, &compensation);
        }

        info!(
            operation_id = %record.id,
            command = %command,
            compensation = %compensation,
            "Running compensating command"
        );

        let output = self
            .commands
            .execute_command(&compensation, false, false)
            .await?;
        if !output.success() {
            return Err(RollbackError::restore(
                &record.id,
                format!(
                    "compensating command `{}` exited with {}: {}",
                    compensation,
                    output.return_code,
                    output.stderr.trim()
                ),
            ));
        }
        Ok(())
    }

    async fn usable_backup(&self, record: &OperationRecord) -> RollbackResult<PathBuf> {
        match &record.backup_path {
            Some(backup) if self.backups.exists(backup).await => Ok(backup.clone()),
            _ => Err(RollbackError::NoBackup(record.id.clone())),
        }
    }

    fn target_path(record: &OperationRecord) -> RollbackResult<PathBuf> {
        record
            .path()
            .ok_or_else(|| RollbackError::restore(&record.id, "record has no path"))
    }
}

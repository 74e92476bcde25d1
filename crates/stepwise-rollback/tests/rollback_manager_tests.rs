//! Rollback manager behaviour across backups, compensations and transactions

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use stepwise_files::LocalFileSystem;
use stepwise_process::{CommandExecutor, CommandOutput, ProcessError};
use stepwise_rollback::{
    OperationType, RollbackConfig, RollbackError, RollbackManager, TransactionStatus,
};
use tempfile::TempDir;

#[derive(Default)]
struct FakeExecutor {
    commands: Mutex<Vec<String>>,
}

impl FakeExecutor {
    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn execute_command(
        &self,
        command: &str,
        _check_safety: bool,
        _dry_run: bool,
    ) -> Result<CommandOutput, ProcessError> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            return_code: 0,
        })
    }
}

async fn setup() -> (TempDir, RollbackManager, Arc<FakeExecutor>) {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(FakeExecutor::default());
    let manager = RollbackManager::open(
        &RollbackConfig::under(dir.path().join(".stepwise")),
        Arc::new(LocalFileSystem::new()),
        executor.clone(),
    )
    .await;
    (dir, manager, executor)
}

#[tokio::test]
async fn test_file_write_round_trip_restores_original_bytes() {
    let (dir, manager, _) = setup().await;
    let file = dir.path().join("config.txt");
    std::fs::write(&file, "Original content").unwrap();

    let op = manager.prepare_file_write(&file, None).await.unwrap();
    std::fs::write(&file, "Modified content").unwrap();

    assert!(manager.rollback_operation(&op).await);
    assert_eq!(std::fs::read(&file).unwrap(), b"Original content");
}

#[tokio::test]
async fn test_second_rollback_of_same_operation_fails() {
    let (dir, manager, _) = setup().await;
    let file = dir.path().join("a.txt");
    std::fs::write(&file, "v1").unwrap();

    let op = manager.prepare_file_write(&file, None).await.unwrap();
    std::fs::write(&file, "v2").unwrap();

    assert!(manager.rollback_operation(&op).await);
    assert!(!manager.rollback_operation(&op).await);
    assert!(matches!(
        manager.try_rollback_operation(&op).await,
        Err(RollbackError::OperationNotFound(_))
    ));
}

#[tokio::test]
async fn test_command_compensations() {
    let (_dir, manager, executor) = setup().await;

    let add = manager
        .record_command_execution("git add file.txt", None, None)
        .await
        .unwrap();
    assert!(manager.rollback_operation(&add).await);

    let install = manager
        .record_command_execution("npm install express", None, None)
        .await
        .unwrap();
    assert!(manager.rollback_operation(&install).await);

    let unknown = manager
        .record_command_execution("echo hello", None, None)
        .await
        .unwrap();
    assert!(!manager.rollback_operation(&unknown).await);

    assert_eq!(
        executor.commands(),
        vec!["git reset file.txt".to_string(), "npm uninstall express".to_string()]
    );
}

#[tokio::test]
async fn test_rollback_truncates_later_operations() {
    let (_dir, manager, _) = setup().await;

    let first = manager
        .record_command_execution("git add a.txt", None, None)
        .await
        .unwrap();
    let second = manager
        .record_command_execution("echo untracked", None, None)
        .await
        .unwrap();
    let third = manager
        .record_command_execution("git add b.txt", None, None)
        .await
        .unwrap();

    assert!(manager.rollback_operation(&first).await);

    assert!(manager.operations().await.is_empty());
    assert!(manager.operation(&second).await.is_none());
    assert!(!manager.rollback_operation(&third).await);
}

#[tokio::test]
async fn test_transaction_rollback_tolerates_failures() {
    let (dir, manager, _) = setup().await;
    let tx = manager.start_transaction("two edits").await.unwrap();

    let first = dir.path().join("first.txt");
    std::fs::write(&first, "first original").unwrap();
    manager.prepare_file_write(&first, Some(&tx)).await.unwrap();
    std::fs::write(&first, "first changed").unwrap();

    let second = dir.path().join("second.txt");
    std::fs::write(&second, "second original").unwrap();
    let second_op = manager.prepare_file_write(&second, Some(&tx)).await.unwrap();
    std::fs::write(&second, "second changed").unwrap();

    // Lose the backup protecting the second edit.
    let backup = manager.operation(&second_op).await.unwrap().backup_path.unwrap();
    std::fs::remove_file(backup).unwrap();

    manager.end_transaction(&tx, TransactionStatus::Failed).await;
    let summary = manager.rollback_transaction(&tx).await;

    assert_eq!(summary.rolled_back, 1);
    assert_eq!(summary.failed, 1);
    assert!(!summary.success);
    assert_eq!(std::fs::read_to_string(&first).unwrap(), "first original");
}

#[tokio::test]
async fn test_unknown_transaction_rollback_reports_failure() {
    let (_dir, manager, _) = setup().await;
    let summary = manager.rollback_transaction("nope").await;

    assert!(!summary.success);
    assert_eq!(summary.rolled_back, 0);
}

#[tokio::test]
async fn test_transaction_keeps_operation_order() {
    let (_dir, manager, _) = setup().await;
    let tx = manager.start_transaction("run").await.unwrap();

    let plan = manager.record_plan_execution("p1", "goal", Some(&tx)).await.unwrap();
    let cmd = manager
        .record_command_execution("git commit -m x", None, Some(&tx))
        .await
        .unwrap();

    let stored = manager.transaction(&tx).await.unwrap();
    assert_eq!(stored.operation_ids, vec![plan.clone(), cmd]);
    assert_eq!(
        manager.operation(&plan).await.unwrap().operation_type,
        OperationType::Plan
    );
}

#[tokio::test]
async fn test_persisted_log_layout() {
    let (_dir, manager, _) = setup().await;
    let tx = manager.start_transaction("layout").await.unwrap();
    manager
        .record_command_execution("git add x", None, Some(&tx))
        .await
        .unwrap();

    let raw = std::fs::read_to_string(manager.log_path()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

    let op = &value["operations"][0];
    assert_eq!(op["operation_type"], "COMMAND");
    assert_eq!(op["transaction_id"], serde_json::json!(tx));
    assert!(op["timestamp"].as_str().unwrap().contains('T'));

    let transaction = &value["transactions"][0];
    assert_eq!(transaction["status"], "pending");
    assert_eq!(transaction["operation_ids"].as_array().unwrap().len(), 1);
}

//! Journaling of plan runs into rollback transactions

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use stepwise_engine::{EngineConfig, FailureKind, Plan, PlanScheduler, PlanStatus, Step};
use stepwise_files::LocalFileSystem;
use stepwise_process::{CommandExecutor, CommandOutput, ProcessError};
use stepwise_rollback::{
    OperationType, RollbackConfig, RollbackManager, TransactionStatus,
};
use tempfile::TempDir;

/// Succeeds unless the command starts with `fail`; denies `shutdown`
#[derive(Default)]
struct RecordingExecutor {
    calls: Mutex<Vec<(String, bool)>>,
}

impl RecordingExecutor {
    fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute_command(
        &self,
        command: &str,
        check_safety: bool,
        _dry_run: bool,
    ) -> Result<CommandOutput, ProcessError> {
        self.calls
            .lock()
            .unwrap()
            .push((command.to_string(), check_safety));
        if check_safety && command.starts_with("shutdown") {
            return Err(ProcessError::SafetyDenied {
                reason: "host power control".to_string(),
            });
        }
        Ok(CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            return_code: if command.starts_with("fail") { 1 } else { 0 },
        })
    }
}

struct Harness {
    dir: TempDir,
    steps: Arc<RecordingExecutor>,
    compensations: Arc<RecordingExecutor>,
    manager: Arc<RollbackManager>,
}

impl Harness {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let compensations = Arc::new(RecordingExecutor::default());
        let manager = RollbackManager::open(
            &RollbackConfig::under(dir.path().join("state")),
            Arc::new(LocalFileSystem::new()),
            compensations.clone(),
        )
        .await;
        Self {
            dir,
            steps: Arc::new(RecordingExecutor::default()),
            compensations,
            manager: Arc::new(manager),
        }
    }

    fn scheduler(&self, config: EngineConfig) -> PlanScheduler {
        PlanScheduler::builder()
            .config(config)
            .command_executor(self.steps.clone())
            .file_system(Arc::new(LocalFileSystem::new()))
            .rollback_manager(self.manager.clone())
            .build()
            .unwrap()
    }

    fn file(&self, name: &str, content: &str) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }
}

#[tokio::test]
async fn test_file_write_rolls_back_to_original_content() {
    let h = Harness::new().await;
    let path = h.file("notes.txt", "Original content");
    let plan = Plan::new("edit")
        .with_step(Step::write_file("edit", path.clone(), "New content"))
        .with_entry_point("edit");

    let result = h.scheduler(EngineConfig::default()).execute(&plan, false, None).await;
    assert!(result.success);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "New content");

    let op = h
        .manager
        .operations()
        .await
        .into_iter()
        .find(|op| op.operation_type == OperationType::FileSystem)
        .unwrap();
    assert_eq!(op.transaction_id, result.transaction_id);
    assert!(op.backup_path.is_some());

    assert!(h.manager.rollback_operation(&op.id).await);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "Original content");

    assert!(!h.manager.rollback_operation(&op.id).await);
}

#[tokio::test]
async fn test_new_file_is_deleted_on_rollback() {
    let h = Harness::new().await;
    let path = h.dir.path().join("fresh/created.txt");
    let plan = Plan::new("create")
        .with_step(Step::write_file("create", path.to_string_lossy(), "hello"))
        .with_entry_point("create");

    let result = h.scheduler(EngineConfig::default()).execute(&plan, false, None).await;
    assert!(path.exists());

    let summary = h
        .manager
        .rollback_transaction(result.transaction_id.as_deref().unwrap())
        .await;

    assert!(summary.success);
    assert_eq!(summary.rolled_back, 1);
    assert!(!path.exists());
}

#[tokio::test]
async fn test_command_compensations_run_newest_first_without_safety_checks() {
    let h = Harness::new().await;
    let plan = Plan::new("stage")
        .with_step(Step::command("stage", "git add file.txt"))
        .with_step(Step::command("deps", "npm install express").depends_on(&["stage"]))
        .with_entry_point("stage");

    let result = h.scheduler(EngineConfig::default()).execute(&plan, false, None).await;
    assert!(result.success);

    let summary = h
        .manager
        .rollback_transaction(result.transaction_id.as_deref().unwrap())
        .await;

    assert!(summary.success);
    assert_eq!(summary.rolled_back, 2);
    assert_eq!(
        h.compensations.calls(),
        vec![
            ("npm uninstall express".to_string(), false),
            ("git reset file.txt".to_string(), false),
        ]
    );
}

#[tokio::test]
async fn test_command_compensation_runs_in_configured_workdir() {
    let h = Harness::new().await;
    let workdir = h.dir.path().join("repo");
    let mut config = EngineConfig::default();
    config.command.workdir = Some(workdir.clone());
    let plan = Plan::new("stage")
        .with_step(Step::command("stage", "git add a.txt"))
        .with_entry_point("stage");

    let result = h.scheduler(config).execute(&plan, false, None).await;
    assert!(result.success);

    let op = h
        .manager
        .operations()
        .await
        .into_iter()
        .find(|op| op.operation_type == OperationType::Command)
        .unwrap();
    assert_eq!(op.cwd(), Some(workdir.clone()));

    assert!(h.manager.rollback_operation(&op.id).await);
    assert_eq!(
        h.compensations.calls(),
        vec![(
            format!("cd '{}' && git reset a.txt", workdir.display()),
            false
        )]
    );
}

#[tokio::test]
async fn test_command_without_compensation_cannot_roll_back() {
    let h = Harness::new().await;
    let plan = Plan::new("say")
        .with_step(Step::command("say", "echo hi"))
        .with_entry_point("say");

    h.scheduler(EngineConfig::default()).execute(&plan, false, None).await;

    let op = h
        .manager
        .operations()
        .await
        .into_iter()
        .find(|op| op.operation_type == OperationType::Command)
        .unwrap();
    assert!(!h.manager.rollback_operation(&op.id).await);
    assert!(h.manager.operation(&op.id).await.is_some());
    assert!(h.compensations.calls().is_empty());
}

#[tokio::test]
async fn test_partial_transaction_rollback_reports_counts() {
    let h = Harness::new().await;
    let path = h.file("config.ini", "Original content");
    let plan = Plan::new("mixed")
        .with_step(Step::write_file("write", path.clone(), "changed"))
        .with_step(Step::command("say", "echo done").depends_on(&["write"]))
        .with_entry_point("write");

    let result = h.scheduler(EngineConfig::default()).execute(&plan, false, None).await;
    let summary = h
        .manager
        .rollback_transaction(result.transaction_id.as_deref().unwrap())
        .await;

    assert!(!summary.success);
    assert_eq!(summary.rolled_back, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "Original content");
}

#[tokio::test]
async fn test_owned_transaction_is_closed_with_run_status() {
    let h = Harness::new().await;
    let scheduler = h.scheduler(EngineConfig::default());

    let ok = Plan::new("ok")
        .with_step(Step::command("a", "echo a"))
        .with_entry_point("a");
    let failing = Plan::new("bad")
        .with_step(Step::command("a", "fail a"))
        .with_entry_point("a");
    let vetoed = Plan::new("vetoed")
        .with_step(Step::command("a", "shutdown now"))
        .with_entry_point("a");

    for (plan, expected) in [
        (ok, TransactionStatus::Completed),
        (failing, TransactionStatus::Failed),
        (vetoed, TransactionStatus::Cancelled),
    ] {
        let result = scheduler.execute(&plan, false, None).await;
        let tx = h
            .manager
            .transaction(result.transaction_id.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(tx.status, expected, "plan {}", plan.goal);
        assert!(tx.ended.is_some());
    }
}

#[tokio::test]
async fn test_supplied_transaction_is_left_open() {
    let h = Harness::new().await;
    let tx = h.manager.start_transaction("caller owned").await.unwrap();
    let plan = Plan::new("inside")
        .with_step(Step::command("a", "git commit -m wip"))
        .with_entry_point("a");

    let result = h
        .scheduler(EngineConfig::default())
        .execute(&plan, false, Some(&tx))
        .await;

    assert!(result.success);
    assert_eq!(result.transaction_id.as_deref(), Some(tx.as_str()));

    let stored = h.manager.transaction(&tx).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Pending);
    assert_eq!(stored.operation_ids.len(), 2);
    let marker = h.manager.operation(&stored.operation_ids[0]).await.unwrap();
    assert_eq!(marker.operation_type, OperationType::Plan);
    assert_eq!(marker.param_str("plan_id"), Some(plan.id.as_str()));
}

#[tokio::test]
async fn test_closed_supplied_transaction_fails_the_run() {
    let h = Harness::new().await;
    let tx = h.manager.start_transaction("done already").await.unwrap();
    h.manager.end_transaction(&tx, TransactionStatus::Completed).await;
    let plan = Plan::new("late")
        .with_step(Step::command("a", "echo a"))
        .with_entry_point("a");

    let result = h
        .scheduler(EngineConfig::default())
        .execute(&plan, false, Some(&tx))
        .await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().kind, FailureKind::Rollback);
    assert!(h.steps.calls().is_empty());
}

#[tokio::test]
async fn test_failed_run_rolls_back_when_configured() {
    let h = Harness::new().await;
    let path = h.file("app.toml", "Original content");
    let plan = Plan::new("deploy")
        .with_step(Step::write_file("write", path.clone(), "broken"))
        .with_step(Step::command("verify", "fail verification").depends_on(&["write"]))
        .with_entry_point("write");

    let config = EngineConfig {
        rollback_on_failure: true,
        ..EngineConfig::default()
    };
    let result = h.scheduler(config).execute(&plan, false, None).await;

    assert_eq!(result.status, PlanStatus::Failed);
    let summary = result.rollback.unwrap();
    assert!(summary.success);
    assert_eq!(summary.rolled_back, 1);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "Original content");
}

#[tokio::test]
async fn test_failed_command_is_not_journaled() {
    let h = Harness::new().await;
    let plan = Plan::new("broken")
        .with_step(Step::command("a", "fail install"))
        .with_entry_point("a");

    h.scheduler(EngineConfig::default()).execute(&plan, false, None).await;

    let commands: Vec<_> = h
        .manager
        .operations()
        .await
        .into_iter()
        .filter(|op| op.operation_type == OperationType::Command)
        .collect();
    assert!(commands.is_empty());
}

#[tokio::test]
async fn test_dry_run_is_not_journaled() {
    let h = Harness::new().await;
    let path = h.file("keep.txt", "Original content");
    let plan = Plan::new("rehearse")
        .with_step(Step::write_file("w", path.clone(), "changed"))
        .with_entry_point("w");

    let result = h.scheduler(EngineConfig::default()).execute(&plan, true, None).await;

    assert!(result.success);
    assert!(result.transaction_id.is_none());
    assert!(h.manager.operations().await.is_empty());
    assert!(h.manager.transactions().await.is_empty());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "Original content");
}

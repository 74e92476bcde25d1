//! Handle through which step executors protect what they mutate

use std::path::Path;
use std::sync::Arc;

use stepwise_rollback::RollbackManager;
use tracing::debug;

use crate::error::EngineResult;

/// Rollback manager plus the transaction a run records into
#[derive(Clone)]
pub struct MutationJournal {
    manager: Arc<RollbackManager>,
    transaction_id: Option<String>,
}

impl MutationJournal {
    /// Journal recording into `transaction_id`
    pub fn new(manager: Arc<RollbackManager>, transaction_id: Option<String>) -> Self {
        Self {
            manager,
            transaction_id,
        }
    }

    /// Transaction operations are recorded under
    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    /// Underlying rollback manager
    pub fn manager(&self) -> &Arc<RollbackManager> {
        &self.manager
    }

    /// Back up and record `path` before it is written
    pub async fn protect_file_write(&self, path: &Path) -> EngineResult<String> {
        let operation_id = self
            .manager
            .prepare_file_write(path, self.transaction_id())
            .await?;
        debug!(
            operation_id = %operation_id,
            path = %path.display(),
            "File write journaled"
        );
        Ok(operation_id)
    }

    /// Record a command that ran successfully in `cwd`
    pub async fn record_command(&self, command: &str, cwd: Option<&Path>) -> EngineResult<String> {
        let operation_id = self
            .manager
            .record_command_execution(command, cwd.map(Path::to_path_buf), self.transaction_id())
            .await?;
        debug!(operation_id = %operation_id, command = %command, "Command journaled");
        Ok(operation_id)
    }
}

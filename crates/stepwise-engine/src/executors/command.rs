//! COMMAND steps

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use stepwise_process::{CommandExecutor, CommandOutput};
use tracing::{error, info};

use crate::context::ExecutionContext;
use crate::error::{EngineError, EngineResult};
use crate::models::{Step, StepKind, StepResult, StepType};

use super::StepHandler;

/// Runs shell commands through the command executor with safety checks on
pub struct CommandHandler {
    executor: Arc<dyn CommandExecutor>,
    workdir: Option<PathBuf>,
}

impl CommandHandler {
    /// Create a handler over `executor`
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            workdir: None,
        }
    }

    /// Directory the executor runs commands in, recorded for compensation
    pub fn with_workdir(mut self, workdir: Option<PathBuf>) -> Self {
        self.workdir = workdir;
        self
    }

    fn command(step: &Step) -> EngineResult<&str> {
        match &step.kind {
            StepKind::Command { command } if !command.trim().is_empty() => Ok(command),
            StepKind::Command { .. } => Err(EngineError::step(&step.id, "command is empty")),
            other => Err(EngineError::step(
                &step.id,
                format!("expected COMMAND payload, got {}", other.step_type()),
            )),
        }
    }

    fn to_result(step: &Step, output: CommandOutput) -> StepResult {
        let mut result = if output.success() {
            StepResult::success(step)
        } else {
            StepResult::failure(
                step,
                format!(
                    "command exited with code {}: {}",
                    output.return_code,
                    output.stderr.trim()
                ),
            )
        };
        result = result
            .with_output("stdout", output.stdout)
            .with_output("stderr", output.stderr)
            .with_output("return_code", output.return_code);
        result
    }
}

#[async_trait]
impl StepHandler for CommandHandler {
    fn step_type(&self) -> StepType {
        StepType::Command
    }

    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> EngineResult<StepResult> {
        let command = Self::command(step)?;
        let output = self.executor.execute_command(command, true, false).await?;
        let succeeded = output.success();

        if succeeded {
            if let Some(journal) = &ctx.journal {
                // The command already ran; an unrecorded run is reported, not undone.
                if let Err(e) = journal.record_command(command, self.workdir.as_deref()).await {
                    error!(step_id = %step.id, error = %e, "Failed to journal command");
                }
            }
        }

        info!(
            step_id = %step.id,
            return_code = output.return_code,
            "Command step finished"
        );
        Ok(Self::to_result(step, output))
    }

    async fn simulate(&self, step: &Step, _ctx: &ExecutionContext) -> EngineResult<StepResult> {
        let command = Self::command(step)?;
        let output = self.executor.execute_command(command, true, true).await?;
        Ok(Self::to_result(step, output))
    }
}

//! FILE steps
//!
//! With content the step writes (creating parent directories), otherwise it
//! reads. Writes pass the safety gate, then the target is backed up and
//! journaled, and only then written.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use stepwise_files::FileSystem;
use stepwise_process::{MutationRequest, SafetyDecision, SafetyGate};
use tracing::info;

use crate::context::ExecutionContext;
use crate::error::{EngineError, EngineResult};
use crate::models::{Step, StepKind, StepResult, StepType};

use super::StepHandler;

/// Reads and writes files through the filesystem collaborator
pub struct FileHandler {
    fs: Arc<dyn FileSystem>,
    gate: Arc<dyn SafetyGate>,
}

impl FileHandler {
    /// Create a handler over `fs`, vetting writes with `gate`
    pub fn new(fs: Arc<dyn FileSystem>, gate: Arc<dyn SafetyGate>) -> Self {
        Self { fs, gate }
    }

    fn payload(step: &Step) -> EngineResult<(&str, Option<&str>)> {
        match &step.kind {
            StepKind::File { path, content } if !path.trim().is_empty() => {
                Ok((path, content.as_deref()))
            }
            StepKind::File { .. } => Err(EngineError::step(&step.id, "path is empty")),
            other => Err(EngineError::step(
                &step.id,
                format!("expected FILE payload, got {}", other.step_type()),
            )),
        }
    }
}

#[async_trait]
impl StepHandler for FileHandler {
    fn step_type(&self) -> StepType {
        StepType::File
    }

    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> EngineResult<StepResult> {
        let (path, content) = Self::payload(step)?;
        let path = Path::new(path);

        let Some(content) = content else {
            let text = self.fs.read_to_string(path).await?;
            return Ok(StepResult::success(step).with_output("content", text));
        };

        let request = MutationRequest::WriteFile {
            path: path.to_path_buf(),
        };
        if let SafetyDecision::Deny(reason) = self.gate.check(&request) {
            return Err(EngineError::SafetyDenied(reason));
        }

        if let Some(journal) = &ctx.journal {
            journal.protect_file_write(path).await?;
        }
        self.fs.create_file(path, content.as_bytes()).await?;

        info!(step_id = %step.id, path = %path.display(), bytes = content.len(), "File written");
        Ok(StepResult::success(step).with_output(
            "message",
            format!("Wrote {} bytes to {}", content.len(), path.display()),
        ))
    }

    async fn simulate(&self, step: &Step, _ctx: &ExecutionContext) -> EngineResult<StepResult> {
        let (path, content) = Self::payload(step)?;

        Ok(match content {
            Some(content) => StepResult::success(step).with_output(
                "message",
                format!("[dry-run] would write {} bytes to {}", content.len(), path),
            ),
            None => {
                let path = Path::new(path);
                let text = if self.fs.exists(path).await {
                    self.fs.read_to_string(path).await?
                } else {
                    String::new()
                };
                StepResult::success(step).with_output("content", text)
            }
        })
    }
}

//! CODE steps

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::{EngineError, EngineResult};
use crate::models::{Step, StepKind, StepResult, StepType};
use crate::runner::CodeRunner;

use super::StepHandler;

/// Delegates snippets to a [`CodeRunner`]
pub struct CodeHandler {
    runner: Arc<dyn CodeRunner>,
}

impl CodeHandler {
    /// Create a handler over `runner`
    pub fn new(runner: Arc<dyn CodeRunner>) -> Self {
        Self { runner }
    }

    fn payload(step: &Step) -> EngineResult<(&str, &str)> {
        match &step.kind {
            StepKind::Code { code, language } if !code.trim().is_empty() => Ok((code, language)),
            StepKind::Code { .. } => Err(EngineError::step(&step.id, "code is empty")),
            other => Err(EngineError::step(
                &step.id,
                format!("expected CODE payload, got {}", other.step_type()),
            )),
        }
    }
}

#[async_trait]
impl StepHandler for CodeHandler {
    fn step_type(&self) -> StepType {
        StepType::Code
    }

    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> EngineResult<StepResult> {
        let (code, language) = Self::payload(step)?;
        let inputs = ctx.scope.snapshot();
        let output = self.runner.run(code, language, &inputs).await?;

        Ok(StepResult::success(step)
            .with_output("result", output.result)
            .with_output("stdout", output.stdout))
    }

    async fn simulate(&self, step: &Step, _ctx: &ExecutionContext) -> EngineResult<StepResult> {
        let (_, language) = Self::payload(step)?;
        Ok(StepResult::success(step)
            .with_output("result", Value::Null)
            .with_output("stdout", format!("[dry-run] would run {} code\n", language)))
    }
}

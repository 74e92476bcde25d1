//! Step executors
//!
//! One [`StepHandler`] per step type, each with a real and a simulated path
//! returning the same output schema. LOOP steps are driven by the scheduler
//! because their bodies are subgraphs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::error::EngineResult;
use crate::models::{Step, StepResult, StepType};

pub mod api;
pub mod code;
pub mod command;
pub mod decision;
pub mod file;

pub use api::ApiHandler;
pub use code::CodeHandler;
pub use command::CommandHandler;
pub use decision::DecisionHandler;
pub use file::FileHandler;

/// Execution strategy for one step type
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Step type this handler serves
    fn step_type(&self) -> StepType;

    /// Perform the step
    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> EngineResult<StepResult>;

    /// Produce a representative result without side effects
    async fn simulate(&self, step: &Step, ctx: &ExecutionContext) -> EngineResult<StepResult>;
}

/// Dispatches steps to handlers by type
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    handlers: HashMap<StepType, Arc<dyn StepHandler>>,
}

impl ExecutorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same type
    pub fn register(&mut self, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(handler.step_type(), handler);
    }

    /// Handler for a step type
    pub fn get(&self, step_type: StepType) -> Option<&Arc<dyn StepHandler>> {
        self.handlers.get(&step_type)
    }

    /// Run `step`, turning every error into a failed or cancelled result
    pub async fn dispatch(&self, step: &Step, ctx: &ExecutionContext) -> StepResult {
        let step_type = step.step_type();
        let Some(handler) = self.handlers.get(&step_type) else {
            return StepResult::failure(
                step,
                format!("no executor registered for {} steps", step_type),
            );
        };

        debug!(step_id = %step.id, step_type = %step_type, dry_run = ctx.dry_run, "Dispatching step");

        let outcome = if ctx.dry_run {
            handler.simulate(step, ctx).await
        } else {
            handler.execute(step, ctx).await
        };

        match outcome {
            Ok(result) => result,
            Err(e) if e.is_safety_denial() => {
                warn!(step_id = %step.id, reason = %e, "Step cancelled by safety gate");
                StepResult::cancelled(step, e.to_string())
            }
            Err(e) => StepResult::failure(step, e.to_string()),
        }
    }
}

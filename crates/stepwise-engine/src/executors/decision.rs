//! DECISION steps

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::error::{EngineError, EngineResult};
use crate::expression::ExpressionEvaluator;
use crate::models::{Step, StepKind, StepResult, StepType};

use super::StepHandler;

/// Output value naming the branch taken when the condition holds
pub const TRUE_BRANCH: &str = "true_branch";
/// Output value naming the branch taken otherwise
pub const FALSE_BRANCH: &str = "false_branch";

/// Evaluates a condition and reports which branch to take
pub struct DecisionHandler {
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl DecisionHandler {
    /// Create a handler over `evaluator`
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        Self { evaluator }
    }
}

#[async_trait]
impl StepHandler for DecisionHandler {
    fn step_type(&self) -> StepType {
        StepType::Decision
    }

    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> EngineResult<StepResult> {
        let condition = match &step.kind {
            StepKind::Decision { condition, .. } if !condition.trim().is_empty() => condition,
            StepKind::Decision { .. } => return Err(EngineError::step(&step.id, "condition is empty")),
            other => {
                return Err(EngineError::step(
                    &step.id,
                    format!("expected DECISION payload, got {}", other.step_type()),
                ))
            }
        };

        let outcome = self
            .evaluator
            .evaluate_condition(condition, &ctx.scope, &ctx.results)
            .await?;
        let branch = if outcome { TRUE_BRANCH } else { FALSE_BRANCH };

        debug!(step_id = %step.id, condition = %condition, outcome, "Condition evaluated");
        Ok(StepResult::success(step)
            .with_output("condition_result", outcome)
            .with_output("next_branch", branch))
    }

    async fn simulate(&self, step: &Step, ctx: &ExecutionContext) -> EngineResult<StepResult> {
        // Evaluation has no side effects.
        self.execute(step, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::DefaultEvaluator;
    use crate::variables::VariableScope;
    use serde_json::json;
    use stepwise_files::LocalFileSystem;

    fn handler() -> DecisionHandler {
        DecisionHandler::new(Arc::new(DefaultEvaluator::new(Arc::new(LocalFileSystem::new()))))
    }

    #[tokio::test]
    async fn test_reports_branch_for_outcome() {
        let mut scope = VariableScope::new();
        scope.set("env", json!("prod"), None);
        let ctx = ExecutionContext::new("plan", "gate", false).with_scope(Arc::new(scope));

        let taken = handler()
            .execute(&Step::decision("gate", "env == prod", &["a"], &["b"]), &ctx)
            .await
            .unwrap();
        assert_eq!(taken.output("condition_result"), Some(&json!(true)));
        assert_eq!(taken.output("next_branch"), Some(&json!(TRUE_BRANCH)));

        let skipped = handler()
            .execute(&Step::decision("gate", "env == staging", &["a"], &["b"]), &ctx)
            .await
            .unwrap();
        assert_eq!(skipped.output("next_branch"), Some(&json!(FALSE_BRANCH)));
    }

    #[tokio::test]
    async fn test_empty_condition_is_an_error() {
        let ctx = ExecutionContext::new("plan", "gate", false);
        let step = Step::decision("gate", "  ", &[], &[]);

        assert!(handler().execute(&step, &ctx).await.is_err());
    }
}

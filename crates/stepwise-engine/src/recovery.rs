//! Recovery collaborator consulted after retries are exhausted

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::context::ExecutionContext;
use crate::models::{Step, StepKind, StepResult};

/// Substitute outcome offered by a [`RecoveryHandler`]
#[derive(Debug, Clone, PartialEq)]
pub enum Recovery {
    /// Run this payload once in place of the failed one
    Substitute(StepKind),
    /// Treat the step as successful with these output fields
    Outputs(Map<String, Value>),
}

/// Given a failed step, optionally proposes a way forward
#[async_trait]
pub trait RecoveryHandler: Send + Sync {
    /// Propose a recovery for `step`, or `None` to give up
    async fn recover(
        &self,
        step: &Step,
        ctx: &ExecutionContext,
        failure: &StepResult,
    ) -> Option<Recovery>;
}

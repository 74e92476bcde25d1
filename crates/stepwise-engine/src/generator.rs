//! Plan generator seam

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::EngineResult;
use crate::models::Plan;

/// Produces a plan for a goal
///
/// Typically backed by a planner service. The engine validates whatever it
/// returns before running it.
#[async_trait]
pub trait PlanGenerator: Send + Sync {
    /// Build a plan for `goal` seeded with `context`
    async fn generate(&self, goal: &str, context: &Map<String, Value>) -> EngineResult<Plan>;
}

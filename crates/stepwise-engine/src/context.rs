//! Per-step execution context

use std::collections::HashMap;
use std::sync::Arc;

use crate::journal::MutationJournal;
use crate::models::StepResult;
use crate::variables::VariableScope;

/// Everything a step executor can see
#[derive(Clone)]
pub struct ExecutionContext {
    /// Step being executed
    pub step_id: String,
    /// Plan being executed
    pub plan_id: String,
    /// Simulate instead of mutating
    pub dry_run: bool,
    /// Active variable scope
    pub scope: Arc<VariableScope>,
    /// Results of steps completed so far
    pub results: Arc<HashMap<String, StepResult>>,
    /// Rollback journal for real runs
    pub journal: Option<MutationJournal>,
}

impl ExecutionContext {
    /// Context with an empty scope, no prior results and no journal
    pub fn new(plan_id: impl Into<String>, step_id: impl Into<String>, dry_run: bool) -> Self {
        Self {
            step_id: step_id.into(),
            plan_id: plan_id.into(),
            dry_run,
            scope: Arc::new(VariableScope::new()),
            results: Arc::new(HashMap::new()),
            journal: None,
        }
    }

    /// Replace the scope
    pub fn with_scope(mut self, scope: Arc<VariableScope>) -> Self {
        self.scope = scope;
        self
    }

    /// Attach a journal
    pub fn with_journal(mut self, journal: MutationJournal) -> Self {
        self.journal = Some(journal);
        self
    }
}

//! Core data models for plans, steps and results

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stepwise_rollback::TransactionRollbackSummary;
use uuid::Uuid;

/// Highest allowed `estimated_risk`
pub const MAX_RISK: u8 = 4;

/// A DAG of steps with declared entry points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan identifier
    #[serde(default = "new_id")]
    pub id: String,
    /// Goal the plan accomplishes
    pub goal: String,
    /// Plan description
    #[serde(default)]
    pub description: String,
    /// Steps, unique by id
    pub steps: Vec<Step>,
    /// Steps eligible to run first, in order
    #[serde(default)]
    pub entry_points: Vec<String>,
    /// Seed data for the variable store
    #[serde(default)]
    pub context: Map<String, Value>,
    /// When the plan was created
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl Plan {
    /// Create an empty plan for `goal`
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            goal: goal.into(),
            description: String::new(),
            steps: Vec::new(),
            entry_points: Vec::new(),
            context: Map::new(),
            created: Utc::now(),
        }
    }

    /// Set the plan id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Append a step
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Append an entry point
    pub fn with_entry_point(mut self, step_id: impl Into<String>) -> Self {
        self.entry_points.push(step_id.into());
        self
    }

    /// Seed a context variable
    pub fn with_context(mut self, name: impl Into<String>, value: Value) -> Self {
        self.context.insert(name.into(), value);
        self
    }

    /// Look up a step by id
    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}

/// One typed unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique step identifier
    pub id: String,
    /// Step description
    #[serde(default)]
    pub description: String,
    /// Steps that must complete first
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Risk estimate from 0 (none) to 4 (critical)
    #[serde(default)]
    pub estimated_risk: u8,
    /// Time budget in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Extra attempts after the first failure
    #[serde(default)]
    pub retry: u32,
    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Type-specific payload
    #[serde(flatten)]
    pub kind: StepKind,
}

/// Type-specific step payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    /// Shell command
    Command {
        /// Command line
        command: String,
    },
    /// Snippet run by an external code runner
    Code {
        /// Source code
        code: String,
        /// Language name
        #[serde(default = "default_language")]
        language: String,
    },
    /// File write (with content) or read (without)
    File {
        /// Target path
        path: String,
        /// Content to write
        #[serde(default)]
        content: Option<String>,
    },
    /// Conditional branch
    Decision {
        /// Condition expression
        condition: String,
        /// Steps scheduled when the condition holds
        #[serde(default)]
        true_branch: Vec<String>,
        /// Steps scheduled otherwise
        #[serde(default)]
        false_branch: Vec<String>,
    },
    /// HTTP call
    Api {
        /// Target URL
        url: String,
        /// HTTP method
        #[serde(default = "default_method")]
        method: String,
        /// JSON body
        #[serde(default)]
        payload: Option<Value>,
        /// Request headers
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    /// Repeat a body subgraph per item
    Loop {
        /// Expression or literal resolving to the items
        loop_items: Value,
        /// Steps run once per item
        loop_body: Vec<String>,
    },
}

fn default_language() -> String {
    "python".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

impl StepKind {
    /// Discriminant of this payload
    pub fn step_type(&self) -> StepType {
        match self {
            Self::Command { .. } => StepType::Command,
            Self::Code { .. } => StepType::Code,
            Self::File { .. } => StepType::File,
            Self::Decision { .. } => StepType::Decision,
            Self::Api { .. } => StepType::Api,
            Self::Loop { .. } => StepType::Loop,
        }
    }
}

/// Step type discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    /// Shell command
    Command,
    /// External code runner
    Code,
    /// File read or write
    File,
    /// Conditional branch
    Decision,
    /// HTTP call
    Api,
    /// Loop over items
    Loop,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Command => "COMMAND",
            Self::Code => "CODE",
            Self::File => "FILE",
            Self::Decision => "DECISION",
            Self::Api => "API",
            Self::Loop => "LOOP",
        };
        f.write_str(name)
    }
}

impl Step {
    /// Create a step with default common fields
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            dependencies: Vec::new(),
            estimated_risk: 0,
            timeout: None,
            retry: 0,
            tags: Vec::new(),
            kind,
        }
    }

    /// COMMAND step
    pub fn command(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(
            id,
            StepKind::Command {
                command: command.into(),
            },
        )
    }

    /// CODE step
    pub fn code(id: impl Into<String>, code: impl Into<String>, language: impl Into<String>) -> Self {
        Self::new(
            id,
            StepKind::Code {
                code: code.into(),
                language: language.into(),
            },
        )
    }

    /// FILE step that writes `content`
    pub fn write_file(id: impl Into<String>, path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            id,
            StepKind::File {
                path: path.into(),
                content: Some(content.into()),
            },
        )
    }

    /// FILE step that reads `path`
    pub fn read_file(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(
            id,
            StepKind::File {
                path: path.into(),
                content: None,
            },
        )
    }

    /// DECISION step
    pub fn decision(
        id: impl Into<String>,
        condition: impl Into<String>,
        true_branch: &[&str],
        false_branch: &[&str],
    ) -> Self {
        Self::new(
            id,
            StepKind::Decision {
                condition: condition.into(),
                true_branch: true_branch.iter().map(|s| s.to_string()).collect(),
                false_branch: false_branch.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    /// API step
    pub fn api(id: impl Into<String>, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            id,
            StepKind::Api {
                url: url.into(),
                method: method.into(),
                payload: None,
                headers: BTreeMap::new(),
            },
        )
    }

    /// LOOP step
    pub fn loop_over(id: impl Into<String>, loop_items: Value, loop_body: &[&str]) -> Self {
        Self::new(
            id,
            StepKind::Loop {
                loop_items,
                loop_body: loop_body.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    /// Add dependencies
    pub fn depends_on(mut self, step_ids: &[&str]) -> Self {
        self.dependencies
            .extend(step_ids.iter().map(|s| s.to_string()));
        self
    }

    /// Set the retry count
    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    /// Set the time budget
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// Set the risk estimate
    pub fn with_risk(mut self, risk: u8) -> Self {
        self.estimated_risk = risk;
        self
    }

    /// Step type discriminant
    pub fn step_type(&self) -> StepType {
        self.kind.step_type()
    }

    /// Output name namespaced under this step
    pub fn output_key(&self, field: &str) -> String {
        format!("{}_{}", self.id, field)
    }
}

/// Uniform result of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Step that produced the result
    pub step_id: String,
    /// Step type
    pub step_type: StepType,
    /// Whether the step succeeded
    pub success: bool,
    /// Exported outputs, named `<step_id>_<field>`
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    /// Failure detail
    #[serde(default)]
    pub error: Option<String>,
    /// Attempts beyond the first
    #[serde(default)]
    pub retries: u32,
    /// Whether the recovery collaborator supplied the outcome
    #[serde(default)]
    pub recovery_applied: bool,
    /// Whether the safety gate vetoed the step
    #[serde(default)]
    pub cancelled: bool,
    /// When execution started
    pub started_at: DateTime<Utc>,
    /// Wall time in milliseconds
    #[serde(default)]
    pub duration_ms: u64,
}

impl StepResult {
    fn new(step: &Step, success: bool) -> Self {
        Self {
            step_id: step.id.clone(),
            step_type: step.step_type(),
            success,
            outputs: BTreeMap::new(),
            error: None,
            retries: 0,
            recovery_applied: false,
            cancelled: false,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Successful result with no outputs yet
    pub fn success(step: &Step) -> Self {
        Self::new(step, true)
    }

    /// Failed result carrying `error`
    pub fn failure(step: &Step, error: impl Into<String>) -> Self {
        let mut result = Self::new(step, false);
        result.error = Some(error.into());
        result
    }

    /// Result of a mutation vetoed by the safety gate
    pub fn cancelled(step: &Step, reason: impl Into<String>) -> Self {
        let mut result = Self::failure(step, reason);
        result.cancelled = true;
        result
    }

    /// Add an output under `<step_id>_<field>`
    pub fn with_output(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.outputs
            .insert(format!("{}_{}", self.step_id, field), value.into());
        self
    }

    /// Output by field name (without the step prefix)
    pub fn output(&self, field: &str) -> Option<&Value> {
        self.outputs.get(&format!("{}_{}", self.step_id, field))
    }
}

/// Outcome of one loop iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Zero-based iteration index
    pub index: usize,
    /// Item bound to `loop_item`
    pub item: Value,
    /// Whether every body step succeeded
    pub success: bool,
    /// First failure in the iteration
    #[serde(default)]
    pub error: Option<String>,
    /// Body step results in execution order
    #[serde(default)]
    pub results: Vec<StepResult>,
}

/// Final status of a plan run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Every scheduled step succeeded
    Completed,
    /// A step or the graph failed
    Failed,
    /// A mutation was vetoed by the safety gate
    Cancelled,
    /// The plan was malformed and never ran
    Rejected,
}

/// Category of a plan failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Plan failed validation
    Validation,
    /// Cycle or unreachable pending steps
    Graph,
    /// Step failed without retry or recovery configured
    Step,
    /// Retries and recovery were attempted and failed
    RecoveryExhausted,
    /// Safety gate vetoed a step
    Cancelled,
    /// The rollback journal could not be opened for the run
    Rollback,
}

/// Failure detail attached to a [`PlanResult`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFailure {
    /// Failure category
    pub kind: FailureKind,
    /// Human-readable detail
    pub message: String,
}

/// Structured result tree of a plan run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// Plan that ran
    pub plan_id: String,
    /// Whether the plan completed
    pub success: bool,
    /// Final status
    pub status: PlanStatus,
    /// Top-level steps that succeeded
    pub steps_completed: usize,
    /// Steps defined in the plan
    pub steps_total: usize,
    /// Top-level step results in execution order
    pub results: Vec<StepResult>,
    /// Step that stopped the plan
    pub failed_step: Option<String>,
    /// Failure detail
    pub error: Option<PlanFailure>,
    /// Top-level step ids in execution order
    pub execution_path: Vec<String>,
    /// Final root variable snapshot
    pub variables: Map<String, Value>,
    /// Transaction the run was journaled under
    pub transaction_id: Option<String>,
    /// Automatic rollback outcome, if one ran
    pub rollback: Option<TransactionRollbackSummary>,
    /// Whether this was a dry run
    pub dry_run: bool,
    /// Wall time in milliseconds
    pub duration_ms: u64,
}

impl PlanResult {
    /// Result for a plan that never started
    pub fn not_started(
        plan_id: impl Into<String>,
        steps_total: usize,
        status: PlanStatus,
        kind: FailureKind,
        message: impl Into<String>,
        dry_run: bool,
    ) -> Self {
        Self {
            plan_id: plan_id.into(),
            success: false,
            status,
            steps_completed: 0,
            steps_total,
            results: Vec::new(),
            failed_step: None,
            error: Some(PlanFailure {
                kind,
                message: message.into(),
            }),
            execution_path: Vec::new(),
            variables: Map::new(),
            transaction_id: None,
            rollback: None,
            dry_run,
            duration_ms: 0,
        }
    }

    /// Top-level result of a step
    pub fn result(&self, step_id: &str) -> Option<&StepResult> {
        self.results.iter().find(|r| r.step_id == step_id)
    }
}

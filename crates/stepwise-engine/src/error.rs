//! Error types for plan execution

use thiserror::Error;

use stepwise_files::FileError;
use stepwise_process::ProcessError;
use stepwise_rollback::RollbackError;

/// Errors that can occur while validating or executing plans
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed plan, rejected before execution
    #[error("Invalid plan: {0}")]
    PlanValidation(String),

    /// Dependency cycle or unreachable steps
    #[error("Graph error: {0}")]
    Graph(String),

    /// Step failed (non-zero exit, missing field, executor failure)
    #[error("Step {step_id} failed: {message}")]
    StepExecution {
        /// Failing step
        step_id: String,
        /// What went wrong
        message: String,
    },

    /// Retries and recovery both failed
    #[error("Recovery exhausted for step {step_id}: {message}")]
    RecoveryExhausted {
        /// Failing step
        step_id: String,
        /// Last failure
        message: String,
    },

    /// The safety gate vetoed a mutation
    #[error("Denied by safety gate: {0}")]
    SafetyDenied(String),

    /// Condition or loop-items expression could not be evaluated
    #[error("Expression error: {0}")]
    Expression(String),

    /// Step exceeded its time budget
    #[error("Step {step_id} timed out after {seconds}s")]
    Timeout {
        /// Step that timed out
        step_id: String,
        /// Budget in seconds
        seconds: u64,
    },

    /// Rollback manager failure
    #[error("Rollback error: {0}")]
    Rollback(#[from] RollbackError),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Plan document could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Code runner failure
    #[error("Code runner error: {0}")]
    CodeRunner(String),

    /// HTTP collaborator failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Command execution failure
    #[error("Process error: {0}")]
    Process(ProcessError),

    /// Filesystem failure
    #[error("File error: {0}")]
    File(#[from] FileError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create a new StepExecution error with context
    pub fn step(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StepExecution {
            step_id: step_id.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a safety denial (a cancellation, not a failure)
    pub fn is_safety_denial(&self) -> bool {
        matches!(self, Self::SafetyDenied(_))
    }
}

impl From<ProcessError> for EngineError {
    fn from(error: ProcessError) -> Self {
        match error {
            ProcessError::SafetyDenied { reason } => Self::SafetyDenied(reason),
            other => Self::Process(other),
        }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(error: config::ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(error: reqwest::Error) -> Self {
        Self::Http(error.to_string())
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

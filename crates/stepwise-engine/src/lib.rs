#![warn(missing_docs)]

//! Stepwise plan execution engine
//!
//! Executes [`Plan`]s: DAGs of typed steps (COMMAND, CODE, FILE, DECISION,
//! API, LOOP) with declared entry points. Steps run in rounds with bounded
//! concurrency; decisions pick one branch, loops repeat a body subgraph per
//! item, and failing steps are retried and offered to a recovery handler
//! before the plan stops. Real runs are journaled into a
//! [`stepwise_rollback::RollbackManager`] transaction so their file writes
//! and commands can be undone.
//!
//! # Example
//!
//! ```ignore
//! use serde_json::json;
//! use stepwise_engine::{ConfigLoader, Plan, PlanScheduler, Step};
//!
//! let config = ConfigLoader::new().load()?;
//! let scheduler = PlanScheduler::from_config(config).await?;
//!
//! let plan = Plan::new("greet")
//!     .with_step(Step::command("hello", "echo hi"))
//!     .with_step(Step::code("shout", "print('$hello_stdout'.upper())", "python").depends_on(&["hello"]))
//!     .with_entry_point("hello");
//!
//! let result = scheduler.execute(&plan, false, None).await;
//! println!("{}", scheduler.render(&result));
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod executors;
pub mod expression;
pub mod generator;
pub mod http;
pub mod journal;
pub mod models;
pub mod parser;
pub mod recovery;
pub mod render;
pub mod runner;
pub mod scheduler;
pub mod telemetry;
pub mod validation;
pub mod variables;

#[cfg(test)]
mod variables_properties;

#[cfg(test)]
mod scheduler_properties;

pub use config::{CommandConfig, ConfigLoader, EngineConfig, LoopFailurePolicy};
pub use context::ExecutionContext;
pub use error::{EngineError, EngineResult};
pub use executors::{ExecutorRegistry, StepHandler};
pub use expression::{DefaultEvaluator, ExpressionEvaluator};
pub use generator::PlanGenerator;
pub use http::{HttpClient, HttpResponse, ReqwestHttpClient};
pub use journal::MutationJournal;
pub use models::{
    FailureKind, IterationRecord, Plan, PlanFailure, PlanResult, PlanStatus, Step, StepKind,
    StepResult, StepType,
};
pub use parser::PlanParser;
pub use recovery::{Recovery, RecoveryHandler};
pub use render::{JsonRenderer, ResultRenderer};
pub use runner::{CodeOutput, CodeRunner, SubprocessCodeRunner};
pub use scheduler::{PlanScheduler, PlanSchedulerBuilder};
pub use validation::PlanValidator;
pub use variables::VariableScope;

#![warn(missing_docs)]

//! # stepwise-process
//!
//! The command-execution primitive and the pre-mutation safety gate.
//!
//! ```rust,no_run
//! use stepwise_process::{CommandExecutor, ShellCommandExecutor};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = ShellCommandExecutor::new();
//! let output = executor.execute_command("echo hi", true, false).await?;
//! assert_eq!(output.stdout, "hi\n");
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod executor;
pub mod safety;

pub use error::{ProcessError, Result};
pub use executor::{CommandExecutor, CommandOutput, ShellCommandExecutor};
pub use safety::{AllowAllGate, MutationRequest, PatternSafetyGate, SafetyDecision, SafetyGate};

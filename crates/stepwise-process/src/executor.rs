//! Command execution primitive

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{ProcessError, Result};
use crate::safety::{MutationRequest, SafetyDecision, SafetyGate};

/// Default command timeout (2 minutes)
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Output of a finished command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit code (-1 when the process was killed by a signal)
    pub return_code: i32,
}

impl CommandOutput {
    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.return_code == 0
    }
}

/// Runs shell commands on behalf of the engine
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute `command`
    ///
    /// With `check_safety` the configured gate is consulted first and a denial
    /// is returned as [`ProcessError::SafetyDenied`]. With `dry_run` nothing is
    /// spawned and a simulated successful output is returned.
    async fn execute_command(
        &self,
        command: &str,
        check_safety: bool,
        dry_run: bool,
    ) -> Result<CommandOutput>;
}

/// [`CommandExecutor`] that runs commands through a POSIX shell
#[derive(Clone)]
pub struct ShellCommandExecutor {
    shell: String,
    timeout: Duration,
    workdir: Option<PathBuf>,
    gate: Option<Arc<dyn SafetyGate>>,
}

impl ShellCommandExecutor {
    /// Create an executor using `sh` with the default timeout and no gate
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            workdir: None,
            gate: None,
        }
    }

    /// Use a different shell binary (invoked as `<shell> -c <command>`)
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Set the per-command timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run commands from this directory
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    /// Consult `gate` whenever a caller asks for a safety check
    pub fn with_safety_gate(mut self, gate: Arc<dyn SafetyGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn check(&self, command: &str) -> Result<()> {
        let Some(gate) = &self.gate else {
            return Ok(());
        };
        let request = MutationRequest::Command {
            command: command.to_string(),
        };
        match gate.check(&request) {
            SafetyDecision::Allow => Ok(()),
            SafetyDecision::Deny(reason) => Err(ProcessError::SafetyDenied { reason }),
        }
    }
}

impl Default for ShellCommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandExecutor for ShellCommandExecutor {
    async fn execute_command(
        &self,
        command: &str,
        check_safety: bool,
        dry_run: bool,
    ) -> Result<CommandOutput> {
        if command.trim().is_empty() {
            return Err(ProcessError::InvalidCommand("empty command".to_string()));
        }

        if check_safety {
            self.check(command)?;
        }

        if dry_run {
            debug!(command = %command, "Dry run: command not spawned");
            return Ok(CommandOutput {
                stdout: format!("[dry-run] would execute: {}\n", command),
                stderr: String::new(),
                return_code: 0,
            });
        }

        debug!(command = %command, shell = %self.shell, "Spawning command");

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn()?;
        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(command = %command, timeout_secs = self.timeout.as_secs(), "Command timed out");
                return Err(ProcessError::Timeout {
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            return_code: output.status.code().unwrap_or(-1),
        };

        info!(command = %command, return_code = result.return_code, "Command finished");
        Ok(result)
    }
}

//! External code runner for CODE steps

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};

/// Environment variable carrying the variable snapshot as JSON
pub const VARS_ENV: &str = "STEPWISE_VARS";

/// Output of a code run
#[derive(Debug, Clone, PartialEq)]
pub struct CodeOutput {
    /// Captured standard output
    pub stdout: String,
    /// Return value of the snippet
    pub result: Value,
}

/// Runs code snippets outside the engine
#[async_trait]
pub trait CodeRunner: Send + Sync {
    /// Run `code` written in `language` with `inputs` available to it
    async fn run(
        &self,
        code: &str,
        language: &str,
        inputs: &Map<String, Value>,
    ) -> EngineResult<CodeOutput>;
}

/// [`CodeRunner`] that spawns an interpreter process per snippet
///
/// Inputs are passed as JSON in `STEPWISE_VARS`. The return value is the last
/// stdout line parsed as JSON, or the trimmed stdout text if it is not JSON.
#[derive(Debug, Clone, Default)]
pub struct SubprocessCodeRunner;

impl SubprocessCodeRunner {
    /// Create a runner
    pub fn new() -> Self {
        Self
    }

    fn interpreter(language: &str) -> Option<(&'static str, &'static str)> {
        match language.to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Some(("python3", "-c")),
            "sh" | "shell" => Some(("sh", "-c")),
            "bash" => Some(("bash", "-c")),
            "node" | "javascript" | "js" => Some(("node", "-e")),
            _ => None,
        }
    }
}

#[async_trait]
impl CodeRunner for SubprocessCodeRunner {
    async fn run(
        &self,
        code: &str,
        language: &str,
        inputs: &Map<String, Value>,
    ) -> EngineResult<CodeOutput> {
        let (program, flag) = Self::interpreter(language).ok_or_else(|| {
            EngineError::CodeRunner(format!("unsupported code language: {}", language))
        })?;
        let vars = serde_json::to_string(inputs)
            .map_err(|e| EngineError::Parse(format!("cannot encode inputs: {}", e)))?;

        debug!(language = %language, program = %program, "Running code snippet");

        let output = Command::new(program)
            .arg(flag)
            .arg(code)
            .env(VARS_ENV, vars)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::CodeRunner(format!(
                "{} exited with {}: {}",
                program,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        info!(language = %language, bytes = stdout.len(), "Code snippet finished");
        Ok(CodeOutput {
            result: return_value(&stdout),
            stdout,
        })
    }
}

/// Last non-empty stdout line as JSON, else the trimmed stdout
pub fn return_value(stdout: &str) -> Value {
    stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| serde_json::from_str(line.trim()).ok())
        .unwrap_or_else(|| Value::String(stdout.trim().to_string()))
}

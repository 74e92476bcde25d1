//! Engine configuration
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML file,
//! then `STEPWISE_*` environment variables (`__` separates nested keys, e.g.
//! `STEPWISE_ROLLBACK__LOG_PATH`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use stepwise_process::executor::DEFAULT_TIMEOUT_SECS;
use stepwise_rollback::RollbackConfig;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::expression::DEFAULT_MAX_RANGE_ITEMS;

/// What a LOOP does when an iteration fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopFailurePolicy {
    /// Run every iteration, fail the loop afterwards
    #[default]
    RunAll,
    /// Stop at the first failed iteration
    FailFast,
}

/// Shell command settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Shell binary invoked as `<shell> -c <command>`
    pub shell: String,
    /// Per-command timeout in seconds
    pub timeout_secs: u64,
    /// Directory commands run in; the process working directory when unset
    pub workdir: Option<PathBuf>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            workdir: None,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on concurrently running steps within a round
    pub max_parallel_steps: usize,
    /// Delay between retry attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Time budget for steps without their own `timeout`
    pub default_step_timeout_secs: Option<u64>,
    /// Loop behaviour on iteration failure
    pub loop_failure_policy: LoopFailurePolicy,
    /// Most items a loop range may expand to
    pub max_loop_items: usize,
    /// Roll back the run's transaction when a plan fails
    pub rollback_on_failure: bool,
    /// Operation log and backup locations
    pub rollback: RollbackConfig,
    /// Shell command settings
    pub command: CommandConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_steps: 4,
            retry_delay_ms: 500,
            default_step_timeout_secs: None,
            loop_failure_policy: LoopFailurePolicy::RunAll,
            max_loop_items: DEFAULT_MAX_RANGE_ITEMS,
            rollback_on_failure: false,
            rollback: RollbackConfig::default(),
            command: CommandConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_parallel_steps == 0 {
            return Err(EngineError::Config(
                "max_parallel_steps must be at least 1".to_string(),
            ));
        }
        if self.max_loop_items == 0 {
            return Err(EngineError::Config(
                "max_loop_items must be at least 1".to_string(),
            ));
        }
        if self.command.shell.trim().is_empty() {
            return Err(EngineError::Config("command.shell cannot be empty".to_string()));
        }
        if self.command.timeout_secs == 0 {
            return Err(EngineError::Config(
                "command.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay between retry attempts
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Loads [`EngineConfig`] from defaults, file and environment
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    /// Loader reading the default config file and `STEPWISE_*` variables
    pub fn new() -> Self {
        Self {
            config_path: Self::default_path(),
            env_prefix: "STEPWISE".to_string(),
        }
    }

    /// Read this file instead of the default one
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Skip the file layer
    pub fn without_file(mut self) -> Self {
        self.config_path = None;
        self
    }

    /// Use a different environment prefix
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// `<config dir>/stepwise/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("stepwise").join("config.toml"))
    }

    /// Load and validate the layered configuration
    pub fn load(&self) -> EngineResult<EngineConfig> {
        let mut builder = Config::builder().add_source(Config::try_from(&EngineConfig::default())?);

        if let Some(path) = &self.config_path {
            debug!(path = %path.display(), "Adding config file layer");
            builder = builder.add_source(
                File::new(&path.to_string_lossy(), FileFormat::Toml).required(false),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Write `config` as TOML to `path`
    pub fn save(config: &EngineConfig, path: &Path) -> EngineResult<()> {
        let text = toml::to_string_pretty(config)
            .map_err(|e| EngineError::Config(format!("failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

//! Pre-mutation safety gate
//!
//! A gate sees every mutation before it happens and either allows it or
//! denies it with a reason. Denials are cancellations, not failures.

use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A mutation about to be performed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationRequest {
    /// Run a shell command
    Command {
        /// Full command line
        command: String,
    },
    /// Create or overwrite a file
    WriteFile {
        /// Target path
        path: PathBuf,
    },
    /// Perform an outbound HTTP call
    Http {
        /// HTTP method
        method: String,
        /// Target URL
        url: String,
    },
}

impl MutationRequest {
    /// Text the pattern gate matches against
    pub fn subject(&self) -> String {
        match self {
            Self::Command { command } => command.clone(),
            Self::WriteFile { path } => path.display().to_string(),
            Self::Http { method, url } => format!("{} {}", method, url),
        }
    }
}

/// Decision returned by a [`SafetyGate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyDecision {
    /// The mutation may proceed
    Allow,
    /// The mutation must not happen
    Deny(String),
}

impl SafetyDecision {
    /// Whether the decision allows the mutation
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Approves or vetoes a mutation before it runs
pub trait SafetyGate: Send + Sync {
    /// Check one mutation
    fn check(&self, request: &MutationRequest) -> SafetyDecision;
}

/// Gate that allows everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllGate;

impl SafetyGate for AllowAllGate {
    fn check(&self, _request: &MutationRequest) -> SafetyDecision {
        SafetyDecision::Allow
    }
}

/// Gate that denies commands and paths matching any deny pattern
pub struct PatternSafetyGate {
    deny: Vec<(Regex, String)>,
}

/// Patterns denied by [`PatternSafetyGate::with_defaults`]
const DEFAULT_DENY_PATTERNS: &[(&str, &str)] = &[
    (r"\brm\s+(-[a-zA-Z]*[rf][a-zA-Z]*\s+)+/(\s|$|\*)", "recursive delete of filesystem root"),
    (r"\bmkfs(\.\w+)?\b", "filesystem formatting"),
    (r"\bdd\s+.*\bof=/dev/", "raw write to a block device"),
    (r":\(\)\s*\{\s*:\|:&\s*\};:", "fork bomb"),
    (r"\b(shutdown|reboot|halt|poweroff)\b", "host power control"),
    (r">\s*/dev/sd[a-z]", "redirect onto a block device"),
    (r"\bchmod\s+(-R\s+)?[0-7]*777\s+/(\s|$)", "world-writable filesystem root"),
];

impl PatternSafetyGate {
    /// Create a gate with no deny patterns
    pub fn new() -> Self {
        Self { deny: Vec::new() }
    }

    /// Create a gate with the built-in deny list
    pub fn with_defaults() -> Self {
        let mut gate = Self::new();
        for (pattern, reason) in DEFAULT_DENY_PATTERNS {
            if let Err(e) = gate.add_pattern(pattern, reason) {
                warn!(pattern = %pattern, error = %e, "Skipping invalid built-in deny pattern");
            }
        }
        gate
    }

    /// Add a deny pattern
    pub fn add_pattern(&mut self, pattern: &str, reason: &str) -> Result<(), regex::Error> {
        self.deny.push((Regex::new(pattern)?, reason.to_string()));
        Ok(())
    }

    /// Number of active deny patterns
    pub fn pattern_count(&self) -> usize {
        self.deny.len()
    }
}

impl Default for PatternSafetyGate {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl SafetyGate for PatternSafetyGate {
    fn check(&self, request: &MutationRequest) -> SafetyDecision {
        let subject = request.subject();
        for (regex, reason) in &self.deny {
            if regex.is_match(&subject) {
                warn!(subject = %subject, reason = %reason, "Mutation denied by safety gate");
                return SafetyDecision::Deny(format!("{}: {}", reason, subject));
            }
        }
        SafetyDecision::Allow
    }
}

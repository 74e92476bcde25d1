//! Variable store
//!
//! Scopes map names to values with the id of the step that produced them.
//! Loop iterations run in child scopes that see their parent but never write
//! to it.
//!
//! String fields of a step are substituted before execution. Both `${name}`
//! and bare `$name` are recognised. `${a.b}` walks into JSON objects.
//! Unresolved tokens are left verbatim.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::models::{Step, StepKind};

/// A bound value and the step that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Bound value
    pub value: Value,
    /// Producing step, `None` for plan context seeds
    pub source: Option<String>,
}

/// Name to value bindings visible to a step
#[derive(Debug, Clone, Default)]
pub struct VariableScope {
    vars: HashMap<String, Variable>,
    parent: Option<Arc<VariableScope>>,
}

impl VariableScope {
    /// Create an empty root scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Root scope seeded from a plan context
    pub fn from_context(context: &Map<String, Value>) -> Self {
        let vars = context
            .iter()
            .map(|(name, value)| {
                (
                    name.clone(),
                    Variable {
                        value: value.clone(),
                        source: None,
                    },
                )
            })
            .collect();
        Self { vars, parent: None }
    }

    /// Child scope reading through to `parent`
    pub fn child(parent: Arc<VariableScope>) -> Self {
        Self {
            vars: HashMap::new(),
            parent: Some(parent),
        }
    }

    /// Bind `name` in this scope
    pub fn set(&mut self, name: impl Into<String>, value: Value, source: Option<&str>) {
        self.vars.insert(
            name.into(),
            Variable {
                value,
                source: source.map(str::to_string),
            },
        );
    }

    /// Look up a binding, falling back to parent scopes
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        match self.vars.get(name) {
            Some(var) => Some(var),
            None => self.parent.as_deref().and_then(|p| p.variable(name)),
        }
    }

    /// Look up a value
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variable(name).map(|v| &v.value)
    }

    /// Producing step of a value
    pub fn source(&self, name: &str) -> Option<&str> {
        self.variable(name).and_then(|v| v.source.as_deref())
    }

    /// Whether `name` is bound here or in a parent
    pub fn contains(&self, name: &str) -> bool {
        self.variable(name).is_some()
    }

    /// Resolve a dotted path such as `config.db.host`
    pub fn lookup_path(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.get(path) {
            return Some(value);
        }
        let mut parts = path.split('.');
        let mut current = self.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Flattened view of every visible binding
    pub fn snapshot(&self) -> Map<String, Value> {
        let mut map = match &self.parent {
            Some(parent) => parent.snapshot(),
            None => Map::new(),
        };
        for (name, var) in &self.vars {
            map.insert(name.clone(), var.value.clone());
        }
        map
    }

    /// Replace `${name}`, `${a.b}` and `$name` tokens in `text`
    pub fn substitute(&self, text: &str) -> String {
        if !text.contains('$') {
            return text.to_string();
        }
        token_regex()
            .replace_all(text, |caps: &Captures| {
                let name = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str());
                match name.and_then(|n| self.lookup_path(n)) {
                    Some(value) => render(value),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Substitute every string inside a JSON value
    pub fn substitute_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.substitute(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.substitute_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.substitute_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Copy of `step` with its string fields substituted
    ///
    /// Conditions and loop items are left alone; the expression evaluator
    /// resolves those itself so typed values survive.
    pub fn substitute_step(&self, step: &Step) -> Step {
        let kind = match &step.kind {
            StepKind::Command { command } => StepKind::Command {
                command: self.substitute(command),
            },
            StepKind::Code { code, language } => StepKind::Code {
                code: self.substitute(code),
                language: language.clone(),
            },
            StepKind::File { path, content } => StepKind::File {
                path: self.substitute(path),
                content: content.as_deref().map(|c| self.substitute(c)),
            },
            StepKind::Api {
                url,
                method,
                payload,
                headers,
            } => StepKind::Api {
                url: self.substitute(url),
                method: method.clone(),
                payload: payload.as_ref().map(|p| self.substitute_value(p)),
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.clone(), self.substitute(v)))
                    .collect(),
            },
            other => other.clone(),
        };
        Step {
            kind,
            ..step.clone()
        }
    }
}

/// Render a value for insertion into text
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn token_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        // ${name}, ${nested.path} or $name
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").expect("Invalid regex")
    })
}

//! Condition and loop-item evaluation
//!
//! The scheduler only talks to [`ExpressionEvaluator`], so the condition
//! language can be replaced without touching scheduling.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use stepwise_files::FileSystem;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::models::StepResult;
use crate::variables::VariableScope;

/// Evaluates DECISION conditions and LOOP item expressions
#[async_trait]
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate a condition against the scope and prior results
    async fn evaluate_condition(
        &self,
        condition: &str,
        scope: &VariableScope,
        results: &HashMap<String, StepResult>,
    ) -> EngineResult<bool>;

    /// Resolve loop items to a concrete ordered sequence
    async fn resolve_items(&self, items: &Value, scope: &VariableScope) -> EngineResult<Vec<Value>>;
}

/// Built-in condition language
///
/// Conditions:
/// - `file exists: <path>` / `file not exists: <path>`
/// - `step success: <id>` / `step failed: <id>`
/// - `true` / `false`
/// - `<operand> <op> <operand>` with `==`, `!=`, `>=`, `<=`, `>`, `<` or `contains`
/// - a bare variable name, `$name` or `${name}` (truthiness)
///
/// Loop items:
/// - `range(n)`, `range(a, b)`, `range(a, b, step)` or a bare integer
/// - a JSON array, inline or as a literal string
/// - a comma-separated list
/// - a variable holding an array, a JSON-array string or newline-separated text
///
/// Ranges longer than the item limit are rejected.
pub struct DefaultEvaluator {
    fs: Arc<dyn FileSystem>,
    max_items: usize,
}

/// Default cap on the number of items a range may produce
pub const DEFAULT_MAX_RANGE_ITEMS: usize = 100_000;

impl DefaultEvaluator {
    /// Create an evaluator checking paths through `fs`
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            max_items: DEFAULT_MAX_RANGE_ITEMS,
        }
    }

    /// Cap the number of items a range may produce
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }
}

const OPERATORS: &[&str] = &["==", "!=", ">=", "<=", ">", "<"];

#[async_trait]
impl ExpressionEvaluator for DefaultEvaluator {
    async fn evaluate_condition(
        &self,
        condition: &str,
        scope: &VariableScope,
        results: &HashMap<String, StepResult>,
    ) -> EngineResult<bool> {
        let condition = condition.trim();
        debug!(condition = %condition, "Evaluating condition");

        if let Some(path) = strip_prefix_ci(condition, "file not exists:") {
            let path = scope.substitute(path.trim());
            return Ok(!self.fs.exists(Path::new(&path)).await);
        }
        if let Some(path) = strip_prefix_ci(condition, "file exists:") {
            let path = scope.substitute(path.trim());
            return Ok(self.fs.exists(Path::new(&path)).await);
        }
        if let Some(id) = strip_prefix_ci(condition, "step success:") {
            let id = scope.substitute(id.trim());
            return Ok(results.get(&id).is_some_and(|r| r.success));
        }
        if let Some(id) = strip_prefix_ci(condition, "step failed:") {
            let id = scope.substitute(id.trim());
            return Ok(results.get(&id).is_some_and(|r| !r.success));
        }

        match condition.to_ascii_lowercase().as_str() {
            "true" => return Ok(true),
            "false" => return Ok(false),
            "" => return Err(EngineError::Expression("empty condition".to_string())),
            _ => {}
        }

        if let Some((left, right)) = split_keyword(condition, "contains") {
            let haystack = resolve_operand(left, scope);
            let needle = resolve_operand(right, scope);
            return Ok(contains(&haystack, &needle));
        }

        for op in OPERATORS {
            if let Some(index) = condition.find(op) {
                let left = resolve_operand(&condition[..index], scope);
                let right = resolve_operand(&condition[index + op.len()..], scope);
                return Ok(compare(&left, op, &right));
            }
        }

        if let Some(name) = variable_reference(condition, scope) {
            return Ok(scope.lookup_path(&name).is_some_and(truthy));
        }

        match scope.substitute(condition).trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ if identifier_regex().is_match(condition) => Ok(false),
            _ => Err(EngineError::Expression(format!(
                "unrecognized condition: {}",
                condition
            ))),
        }
    }

    async fn resolve_items(&self, items: &Value, scope: &VariableScope) -> EngineResult<Vec<Value>> {
        match items {
            Value::Array(values) => Ok(values.iter().map(|v| scope.substitute_value(v)).collect()),
            Value::Number(n) => {
                let count = n
                    .as_i64()
                    .ok_or_else(|| EngineError::Expression(format!("not an integer count: {}", n)))?;
                range(0, count, 1, self.max_items)
            }
            Value::String(text) => self.resolve_text(text, scope),
            Value::Null => Ok(Vec::new()),
            other => Err(EngineError::Expression(format!(
                "cannot iterate over {}",
                other
            ))),
        }
    }
}

impl DefaultEvaluator {
    fn resolve_text(&self, text: &str, scope: &VariableScope) -> EngineResult<Vec<Value>> {
        let trimmed = text.trim();

        if let Some(name) = variable_reference(trimmed, scope) {
            return match scope.lookup_path(&name) {
                Some(value) => items_from_value(value, self.max_items),
                None => Err(EngineError::Expression(format!(
                    "loop items reference unknown variable {}",
                    name
                ))),
            };
        }

        let expanded = scope.substitute(trimmed);
        let expanded = expanded.trim();

        if let Some(caps) = range_regex().captures(expanded) {
            let args = caps[1]
                .split(',')
                .map(|arg| {
                    let value = resolve_operand(arg, scope);
                    value
                        .as_i64()
                        .or_else(|| {
                            as_number(&value)
                                .filter(|n| n.fract() == 0.0)
                                .map(|n| n as i64)
                        })
                        .ok_or_else(|| {
                            EngineError::Expression(format!(
                                "invalid range argument `{}` in {}",
                                arg.trim(),
                                expanded
                            ))
                        })
                })
                .collect::<EngineResult<Vec<i64>>>()?;
            return match args.as_slice() {
                [end] => range(0, *end, 1, self.max_items),
                [start, end] => range(*start, *end, 1, self.max_items),
                [start, end, step] => range(*start, *end, *step, self.max_items),
                _ => Err(EngineError::Expression(format!(
                    "range takes 1 to 3 arguments: {}",
                    expanded
                ))),
            };
        }

        if let Ok(count) = expanded.parse::<i64>() {
            return range(0, count, 1, self.max_items);
        }

        if expanded.starts_with('[') {
            let value: Value = serde_json::from_str(expanded)
                .map_err(|e| EngineError::Expression(format!("invalid item list: {}", e)))?;
            return items_from_value(&value, self.max_items);
        }

        if expanded.is_empty() {
            return Ok(Vec::new());
        }
        if expanded.contains('\n') {
            return Ok(split_lines(expanded));
        }
        if expanded.contains(',') {
            return Ok(expanded
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(parse_literal)
                .collect());
        }
        if expanded.contains('$') {
            return Err(EngineError::Expression(format!(
                "unresolved loop items: {}",
                expanded
            )));
        }
        Ok(vec![parse_literal(expanded)])
    }
}

fn items_from_value(value: &Value, max_items: usize) -> EngineResult<Vec<Value>> {
    match value {
        Value::Array(values) => Ok(values.clone()),
        Value::Number(n) => match n.as_i64() {
            Some(count) => range(0, count, 1, max_items),
            None => Err(EngineError::Expression(format!("not an integer count: {}", n))),
        },
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.starts_with('[') {
                if let Ok(Value::Array(values)) = serde_json::from_str::<Value>(trimmed) {
                    return Ok(values);
                }
            }
            Ok(split_lines(trimmed))
        }
        Value::Null => Ok(Vec::new()),
        other => Err(EngineError::Expression(format!(
            "cannot iterate over {}",
            other
        ))),
    }
}

fn split_lines(text: &str) -> Vec<Value> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| Value::String(l.to_string()))
        .collect()
}

fn range(start: i64, end: i64, step: i64, max_items: usize) -> EngineResult<Vec<Value>> {
    if step == 0 {
        return Err(EngineError::Expression("range step cannot be zero".to_string()));
    }
    let span = i128::from(end) - i128::from(start);
    let step_wide = i128::from(step);
    let len = if span.signum() == step_wide.signum() {
        (span.abs() + step_wide.abs() - 1) / step_wide.abs()
    } else {
        0
    };
    if len > max_items as i128 {
        return Err(EngineError::Expression(format!(
            "range({}, {}, {}) yields {} items (limit {})",
            start, end, step, len, max_items
        )));
    }

    let mut items = Vec::with_capacity(len as usize);
    let mut current = Some(start);
    while let Some(value) = current {
        if (step > 0 && value >= end) || (step < 0 && value <= end) {
            break;
        }
        items.push(Value::from(value));
        current = value.checked_add(step);
    }
    Ok(items)
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

fn split_keyword<'a>(text: &'a str, keyword: &str) -> Option<(&'a str, &'a str)> {
    let pattern = format!(" {} ", keyword);
    let index = text.find(&pattern)?;
    Some((&text[..index], &text[index + pattern.len()..]))
}

/// Name referenced by `$x`, `${x}` or a bare bound identifier
fn variable_reference(text: &str, scope: &VariableScope) -> Option<String> {
    let text = text.trim();
    if let Some(inner) = text.strip_prefix("${").and_then(|t| t.strip_suffix('}')) {
        return path_regex().is_match(inner).then(|| inner.to_string());
    }
    if let Some(inner) = text.strip_prefix('$') {
        return identifier_regex().is_match(inner).then(|| inner.to_string());
    }
    if path_regex().is_match(text) && scope.lookup_path(text).is_some() {
        return Some(text.to_string());
    }
    None
}

fn resolve_operand(text: &str, scope: &VariableScope) -> Value {
    let text = text.trim();
    if let Some(name) = variable_reference(text, scope) {
        return scope.lookup_path(&name).cloned().unwrap_or(Value::Null);
    }
    parse_literal(&scope.substitute(text))
}

fn parse_literal(text: &str) -> Value {
    let text = text.trim();
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return Value::String(text[1..text.len() - 1].to_string());
        }
    }
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => {
            if let Ok(n) = text.parse::<i64>() {
                Value::from(n)
            } else if let Ok(f) = text.parse::<f64>() {
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(text.to_string()))
            } else {
                Value::String(text.to_string())
            }
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(_) | Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn compare(left: &Value, op: &str, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
        return match op {
            "==" => l == r,
            "!=" => l != r,
            ">=" => l >= r,
            "<=" => l <= r,
            ">" => l > r,
            "<" => l < r,
            _ => false,
        };
    }
    let (l, r) = (as_text(left), as_text(right));
    match op {
        "==" => l == r,
        "!=" => l != r,
        ">=" => l >= r,
        "<=" => l <= r,
        ">" => l > r,
        "<" => l < r,
        _ => false,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items
            .iter()
            .any(|item| item == needle || as_text(item) == as_text(needle)),
        Value::Object(map) => map.contains_key(&as_text(needle)),
        Value::Null => false,
        other => as_text(other).contains(&as_text(needle)),
    }
}

/// Truthiness of a bound value
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => {
            let s = s.trim();
            !s.is_empty() && !matches!(s.to_ascii_lowercase().as_str(), "false" | "0" | "no")
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn identifier_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid regex"))
}

fn path_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z0-9_]+)*$").expect("Invalid regex"))
}

fn range_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^range\s*\(([^)]*)\)$").expect("Invalid regex"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Step;
    use serde_json::json;
    use stepwise_files::LocalFileSystem;

    fn evaluator() -> DefaultEvaluator {
        DefaultEvaluator::new(Arc::new(LocalFileSystem::new()))
    }

    fn scope() -> VariableScope {
        let mut scope = VariableScope::new();
        scope.set("count", json!(5), None);
        scope.set("status", json!("ready"), None);
        scope.set("enabled", json!(true), None);
        scope.set("empty", json!(""), None);
        scope.set("files", json!(["a.txt", "b.txt"]), None);
        scope.set("lines", json!("one\ntwo\nthree\n"), None);
        scope
    }

    async fn eval(condition: &str) -> EngineResult<bool> {
        evaluator()
            .evaluate_condition(condition, &scope(), &HashMap::new())
            .await
    }

    #[tokio::test]
    async fn test_literal_booleans() {
        assert!(eval("true").await.unwrap());
        assert!(!eval("FALSE").await.unwrap());
    }

    #[tokio::test]
    async fn test_comparisons() {
        assert!(eval("count > 3").await.unwrap());
        assert!(eval("$count >= 5").await.unwrap());
        assert!(!eval("${count} < 5").await.unwrap());
        assert!(eval("status == ready").await.unwrap());
        assert!(eval("status == 'ready'").await.unwrap());
        assert!(eval("status != done").await.unwrap());
        assert!(eval("files contains a.txt").await.unwrap());
        assert!(!eval("status contains xyz").await.unwrap());
    }

    #[tokio::test]
    async fn test_truthiness() {
        assert!(eval("enabled").await.unwrap());
        assert!(eval("$enabled").await.unwrap());
        assert!(!eval("empty").await.unwrap());
        assert!(!eval("undefined_flag").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_conditions() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("present.txt");
        std::fs::write(&file, "x").unwrap();

        assert!(eval(&format!("file exists: {}", file.display())).await.unwrap());
        assert!(eval(&format!("file not exists: {}", dir.path().join("nope").display()))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_step_conditions() {
        let mut results = HashMap::new();
        let ok = Step::command("build", "true");
        let bad = Step::command("test", "false");
        results.insert("build".to_string(), StepResult::success(&ok));
        results.insert("test".to_string(), StepResult::failure(&bad, "exit 1"));

        let evaluator = evaluator();
        let scope = scope();
        assert!(evaluator.evaluate_condition("step success: build", &scope, &results).await.unwrap());
        assert!(evaluator.evaluate_condition("step failed: test", &scope, &results).await.unwrap());
        assert!(!evaluator.evaluate_condition("step success: missing", &scope, &results).await.unwrap());
    }

    #[tokio::test]
    async fn test_garbage_condition_is_an_error() {
        assert!(matches!(eval("what is this?").await, Err(EngineError::Expression(_))));
        assert!(eval("   ").await.is_err());
    }

    #[tokio::test]
    async fn test_item_forms() {
        let evaluator = evaluator();
        let scope = scope();
        let resolve = |items: Value| {
            let evaluator = &evaluator;
            let scope = &scope;
            async move { evaluator.resolve_items(&items, scope).await.unwrap() }
        };

        assert_eq!(resolve(json!("range(3)")).await, vec![json!(0), json!(1), json!(2)]);
        assert_eq!(resolve(json!("range(2, 5)")).await.len(), 3);
        assert_eq!(resolve(json!("range(10, 0, -5)")).await, vec![json!(10), json!(5)]);
        assert_eq!(resolve(json!(4)).await.len(), 4);
        assert_eq!(resolve(json!("2")).await.len(), 2);
        assert_eq!(resolve(json!(["x", "y"])).await, vec![json!("x"), json!("y")]);
        assert_eq!(resolve(json!("[1, 2, 3]")).await.len(), 3);
        assert_eq!(resolve(json!("a, b, c")).await, vec![json!("a"), json!("b"), json!("c")]);
        assert_eq!(resolve(json!("files")).await, vec![json!("a.txt"), json!("b.txt")]);
        assert_eq!(resolve(json!("${files}")).await.len(), 2);
        assert_eq!(resolve(json!("$lines")).await.len(), 3);
        assert_eq!(resolve(json!("range(count)")).await.len(), 5);
    }

    #[tokio::test]
    async fn test_item_errors() {
        let evaluator = evaluator();
        let scope = scope();

        assert!(evaluator.resolve_items(&json!("range(1, 5, 0)"), &scope).await.is_err());
        assert!(evaluator.resolve_items(&json!("${missing}"), &scope).await.is_err());
        assert!(evaluator.resolve_items(&json!({"a": 1}), &scope).await.is_err());
    }

    #[tokio::test]
    async fn test_range_near_integer_limits() {
        let evaluator = evaluator();
        let scope = scope();

        let items = evaluator
            .resolve_items(&json!("range(9223372036854775806, 9223372036854775807, 5)"), &scope)
            .await
            .unwrap();
        assert_eq!(items, vec![json!(9223372036854775806i64)]);

        let items = evaluator
            .resolve_items(&json!("range(-9223372036854775807, -9223372036854775808, -3)"), &scope)
            .await
            .unwrap();
        assert_eq!(items, vec![json!(-9223372036854775807i64)]);
    }

    #[tokio::test]
    async fn test_oversized_range_is_rejected() {
        let scope = scope();
        let evaluator = evaluator();

        let err = evaluator
            .resolve_items(&json!("range(1000000000000)"), &scope)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Expression(_)));
        assert!(evaluator.resolve_items(&json!(1_000_000_000_000i64), &scope).await.is_err());

        let small = DefaultEvaluator::new(Arc::new(LocalFileSystem::new())).with_max_items(3);
        assert_eq!(small.resolve_items(&json!("range(3)"), &scope).await.unwrap().len(), 3);
        assert!(small.resolve_items(&json!("range(4)"), &scope).await.is_err());
        assert!(small.resolve_items(&json!("range(0, 100, 50)"), &scope).await.is_ok());
    }
}

//! Plan validation and cycle detection
//!
//! Structural checks run first and reject the plan outright. Cycle detection
//! runs on a structurally valid plan and reports a graph error.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::models::{Plan, StepKind, MAX_RISK};

/// Validates plans before scheduling
pub struct PlanValidator;

impl PlanValidator {
    /// Check ids, references and per-step constraints
    ///
    /// Validates:
    /// - step ids are non-empty and unique
    /// - entry points are non-empty, unique and defined (when there are steps)
    /// - every dependency, branch and loop-body id is defined
    /// - no step depends on itself
    /// - no loop body contains its loop and no branch contains its decision
    /// - no entry point is a branch or loop-body member
    /// - risk estimates are within range
    pub fn validate(plan: &Plan) -> EngineResult<()> {
        let mut ids = HashSet::new();
        for step in &plan.steps {
            if step.id.trim().is_empty() {
                return Err(invalid("step id cannot be empty"));
            }
            if !ids.insert(step.id.as_str()) {
                return Err(invalid(format!("duplicate step id: {}", step.id)));
            }
        }

        if !plan.steps.is_empty() && plan.entry_points.is_empty() {
            return Err(invalid("plan has steps but no entry points"));
        }
        let mut entries = HashSet::new();
        for entry in &plan.entry_points {
            if !ids.contains(entry.as_str()) {
                return Err(invalid(format!("entry point {} is not a step", entry)));
            }
            if !entries.insert(entry.as_str()) {
                return Err(invalid(format!("duplicate entry point: {}", entry)));
            }
        }

        for step in &plan.steps {
            for dep in &step.dependencies {
                if dep == &step.id {
                    return Err(invalid(format!("step {} depends on itself", step.id)));
                }
                if !ids.contains(dep.as_str()) {
                    return Err(invalid(format!(
                        "step {} depends on undefined step {}",
                        step.id, dep
                    )));
                }
            }

            if step.estimated_risk > MAX_RISK {
                return Err(invalid(format!(
                    "step {} has estimated_risk {} (max {})",
                    step.id, step.estimated_risk, MAX_RISK
                )));
            }

            match &step.kind {
                StepKind::Decision {
                    true_branch,
                    false_branch,
                    ..
                } => {
                    for target in true_branch.iter().chain(false_branch) {
                        if target == &step.id {
                            return Err(invalid(format!(
                                "decision {} lists itself as a branch",
                                step.id
                            )));
                        }
                        if !ids.contains(target.as_str()) {
                            return Err(invalid(format!(
                                "decision {} branches to undefined step {}",
                                step.id, target
                            )));
                        }
                    }
                }
                StepKind::Loop { loop_body, .. } => {
                    if loop_body.is_empty() {
                        return Err(invalid(format!("loop {} has an empty body", step.id)));
                    }
                    for target in loop_body {
                        if target == &step.id {
                            return Err(invalid(format!("loop {} contains itself", step.id)));
                        }
                        if !ids.contains(target.as_str()) {
                            return Err(invalid(format!(
                                "loop {} body references undefined step {}",
                                step.id, target
                            )));
                        }
                    }
                }
                _ => {}
            }
        }

        let gated = gated_steps(plan);
        if let Some(entry) = plan
            .entry_points
            .iter()
            .find(|entry| gated.contains(entry.as_str()))
        {
            return Err(invalid(format!(
                "entry point {} only runs when a decision or loop schedules it",
                entry
            )));
        }

        debug!(plan_id = %plan.id, steps = plan.steps.len(), "Plan validated");
        Ok(())
    }

    /// Detect cycles over dependency, branch and loop-body edges
    pub fn detect_cycles(plan: &Plan) -> EngineResult<()> {
        // Edges point from a step to the steps it unlocks.
        let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
        for step in &plan.steps {
            for dep in &step.dependencies {
                edges.entry(dep.as_str()).or_default().push(step.id.as_str());
            }
            let children: Vec<&String> = match &step.kind {
                StepKind::Decision {
                    true_branch,
                    false_branch,
                    ..
                } => true_branch.iter().chain(false_branch).collect(),
                StepKind::Loop { loop_body, .. } => loop_body.iter().collect(),
                _ => Vec::new(),
            };
            edges
                .entry(step.id.as_str())
                .or_default()
                .extend(children.into_iter().map(String::as_str));
        }

        let mut visited = HashSet::new();
        let mut stack = Vec::new();
        for step in &plan.steps {
            if !visited.contains(step.id.as_str()) {
                Self::visit(step.id.as_str(), &edges, &mut visited, &mut stack)?;
            }
        }
        Ok(())
    }

    fn visit<'a>(
        node: &'a str,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
    ) -> EngineResult<()> {
        visited.insert(node);
        stack.push(node);

        for &next in edges.get(node).map(Vec::as_slice).unwrap_or_default() {
            if let Some(start) = stack.iter().position(|&n| n == next) {
                let mut cycle: Vec<&str> = stack[start..].to_vec();
                cycle.push(next);
                return Err(EngineError::Graph(format!(
                    "dependency cycle: {}",
                    cycle.join(" -> ")
                )));
            }
            if !visited.contains(next) {
                Self::visit(next, edges, visited, stack)?;
            }
        }

        stack.pop();
        Ok(())
    }
}

/// Steps that only run when a DECISION or LOOP schedules them
pub(crate) fn gated_steps(plan: &Plan) -> HashSet<&str> {
    let mut gated = HashSet::new();
    for step in &plan.steps {
        match &step.kind {
            StepKind::Decision {
                true_branch,
                false_branch,
                ..
            } => gated.extend(true_branch.iter().chain(false_branch).map(String::as_str)),
            StepKind::Loop { loop_body, .. } => gated.extend(loop_body.iter().map(String::as_str)),
            _ => {}
        }
    }
    gated
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::PlanValidation(message.into())
}

//! Plan document parser

use std::path::Path;

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::models::Plan;
use crate::validation::PlanValidator;

/// Builds [`Plan`]s from YAML or JSON documents
pub struct PlanParser;

impl PlanParser {
    /// Parse and validate a plan from YAML
    pub fn from_yaml(content: &str) -> EngineResult<Plan> {
        let plan: Plan = serde_yaml::from_str(content)
            .map_err(|e| EngineError::Parse(format!("Failed to parse YAML: {}", e)))?;
        PlanValidator::validate(&plan)?;
        Ok(plan)
    }

    /// Parse and validate a plan from JSON
    pub fn from_json(content: &str) -> EngineResult<Plan> {
        let plan: Plan = serde_json::from_str(content)
            .map_err(|e| EngineError::Parse(format!("Failed to parse JSON: {}", e)))?;
        PlanValidator::validate(&plan)?;
        Ok(plan)
    }

    /// Parse a plan file, choosing the format by extension
    pub fn from_file(path: &Path) -> EngineResult<Plan> {
        let content = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "Parsing plan file");

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            Some("json") => Self::from_json(&content),
            other => Err(EngineError::Parse(format!(
                "Unsupported plan file extension: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }

    /// Serialize a plan to YAML
    pub fn to_yaml(plan: &Plan) -> EngineResult<String> {
        serde_yaml::to_string(plan)
            .map_err(|e| EngineError::Parse(format!("Failed to serialize to YAML: {}", e)))
    }

    /// Serialize a plan to JSON
    pub fn to_json(plan: &Plan) -> EngineResult<String> {
        serde_json::to_string_pretty(plan)
            .map_err(|e| EngineError::Parse(format!("Failed to serialize to JSON: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StepKind, StepType};

    const YAML_PLAN: &str = r#"
id: deploy
goal: Deploy the service
entry_points: [check]
context:
  env: staging
steps:
  - id: check
    type: DECISION
    condition: "env == staging"
    true_branch: [build]
    false_branch: [abort]
  - id: build
    type: COMMAND
    command: "echo building for ${env}"
    retry: 1
  - id: abort
    type: COMMAND
    command: "echo aborting"
  - id: notify
    type: API
    url: "https://hooks.example.com/${env}"
    method: POST
    payload:
      text: done
    dependencies: [build]
"#;

    #[test]
    fn test_parse_yaml() {
        let plan = PlanParser::from_yaml(YAML_PLAN).unwrap();

        assert_eq!(plan.id, "deploy");
        assert_eq!(plan.steps.len(), 4);
        assert_eq!(plan.step("check").unwrap().step_type(), StepType::Decision);
        assert_eq!(plan.step("build").unwrap().retry, 1);
        assert!(matches!(
            &plan.step("notify").unwrap().kind,
            StepKind::Api { method, payload: Some(_), .. } if method == "POST"
        ));
    }

    #[test]
    fn test_yaml_json_agree() {
        let plan = PlanParser::from_yaml(YAML_PLAN).unwrap();
        let json = PlanParser::to_json(&plan).unwrap();
        assert_eq!(PlanParser::from_json(&json).unwrap(), plan);
    }

    #[test]
    fn test_invalid_reference_is_rejected() {
        let json = r#"{
            "goal": "broken",
            "entry_points": ["a"],
            "steps": [{"id": "a", "type": "COMMAND", "command": "true", "dependencies": ["ghost"]}]
        }"#;
        assert!(matches!(
            PlanParser::from_json(json),
            Err(EngineError::PlanValidation(_))
        ));
    }

    #[test]
    fn test_unknown_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("plan.txt");
        std::fs::write(&path, YAML_PLAN).unwrap();

        assert!(matches!(PlanParser::from_file(&path), Err(EngineError::Parse(_))));
    }

    #[test]
    fn test_from_file_yaml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("plan.yml");
        std::fs::write(&path, YAML_PLAN).unwrap();

        assert_eq!(PlanParser::from_file(&path).unwrap().goal, "Deploy the service");
    }
}

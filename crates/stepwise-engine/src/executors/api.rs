//! API steps

use std::sync::Arc;

use async_trait::async_trait;
use stepwise_process::{MutationRequest, SafetyDecision, SafetyGate};
use tracing::info;

use crate::context::ExecutionContext;
use crate::error::{EngineError, EngineResult};
use crate::http::HttpClient;
use crate::models::{Step, StepKind, StepResult, StepType};

use super::StepHandler;

/// Longest response body exported, in characters
pub const MAX_RESPONSE_CHARS: usize = 4096;

/// Performs HTTP calls through the HTTP collaborator
pub struct ApiHandler {
    client: Arc<dyn HttpClient>,
    gate: Arc<dyn SafetyGate>,
}

impl ApiHandler {
    /// Create a handler over `client`, vetting calls with `gate`
    pub fn new(client: Arc<dyn HttpClient>, gate: Arc<dyn SafetyGate>) -> Self {
        Self { client, gate }
    }
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_RESPONSE_CHARS) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}

#[async_trait]
impl StepHandler for ApiHandler {
    fn step_type(&self) -> StepType {
        StepType::Api
    }

    async fn execute(&self, step: &Step, _ctx: &ExecutionContext) -> EngineResult<StepResult> {
        let StepKind::Api {
            url,
            method,
            payload,
            headers,
        } = &step.kind
        else {
            return Err(EngineError::step(
                &step.id,
                format!("expected API payload, got {}", step.step_type()),
            ));
        };
        if url.trim().is_empty() {
            return Err(EngineError::step(&step.id, "url is empty"));
        }

        let request = MutationRequest::Http {
            method: method.clone(),
            url: url.clone(),
        };
        if let SafetyDecision::Deny(reason) = self.gate.check(&request) {
            return Err(EngineError::SafetyDenied(reason));
        }

        let response = self
            .client
            .request(method, url, headers, payload.as_ref())
            .await?;

        info!(step_id = %step.id, method = %method, url = %url, status = response.status, "API call finished");

        let result = if response.is_success() {
            StepResult::success(step)
        } else {
            StepResult::failure(step, format!("{} {} returned HTTP {}", method, url, response.status))
        };
        Ok(result
            .with_output("status_code", response.status)
            .with_output("response", truncate(&response.body)))
    }

    async fn simulate(&self, step: &Step, _ctx: &ExecutionContext) -> EngineResult<StepResult> {
        let StepKind::Api { url, method, .. } = &step.kind else {
            return Err(EngineError::step(
                &step.id,
                format!("expected API payload, got {}", step.step_type()),
            ));
        };
        Ok(StepResult::success(step)
            .with_output("status_code", 200)
            .with_output("response", format!("[dry-run] would {} {}", method, url)))
    }
}

//! Presentation seam for plan results
//!
//! The engine only produces [`PlanResult`] trees; formatting is injected.

use tracing::warn;

use crate::models::PlanResult;

/// Turns a plan result into text for display
pub trait ResultRenderer: Send + Sync {
    /// Render `result`
    fn render(&self, result: &PlanResult) -> String;
}

/// Renders results as JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer {
    pretty: bool,
}

impl JsonRenderer {
    /// Compact JSON renderer
    pub fn new() -> Self {
        Self { pretty: false }
    }

    /// Indented JSON renderer
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl ResultRenderer for JsonRenderer {
    fn render(&self, result: &PlanResult) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(result)
        } else {
            serde_json::to_string(result)
        };
        rendered.unwrap_or_else(|e| {
            warn!(plan_id = %result.plan_id, error = %e, "Failed to render plan result");
            format!("{{\"plan_id\":{:?},\"render_error\":{:?}}}", result.plan_id, e.to_string())
        })
    }
}

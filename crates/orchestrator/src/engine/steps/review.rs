//! Automated pre-review step: a machine pass over the report before the
//! final human gate.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::{ReporterClient, ReviewRequest};
use crate::db::models::WorkflowInstance;
use crate::engine::context::WorkflowContext;
use crate::engine::pipeline::StepName;
use crate::engine::registry::{StepHandler, StepOutcome};
use crate::error::{AppError, AppResult};

pub struct ReviewStepHandler {
    reporter: Arc<dyn ReporterClient>,
}

impl ReviewStepHandler {
    pub fn new(reporter: Arc<dyn ReporterClient>) -> Self {
        Self { reporter }
    }
}

#[async_trait]
impl StepHandler for ReviewStepHandler {
    fn step(&self) -> StepName {
        StepName::Review
    }

    async fn execute(
        &self,
        instance: &WorkflowInstance,
        _payload: &serde_json::Value,
    ) -> AppResult<StepOutcome> {
        let ctx = WorkflowContext::from_value(&instance.context)?;
        let report_id = ctx.report_id.clone().ok_or_else(|| {
            AppError::NonRetryable("Review step requires a report_id in context".to_string())
        })?;

        let review = self
            .reporter
            .review_report(&ReviewRequest {
                workflow_id: instance.id,
                report_id,
            })
            .await?;

        tracing::info!(
            workflow_id = %instance.id,
            review_id = %review.review_id,
            verdict = %review.verdict,
            "Automated review finished"
        );

        Ok(StepOutcome::advance(
            StepName::HitlReview,
            serde_json::json!({
                "review_id": review.review_id,
                "review_verdict": review.verdict,
                "review_notes": review.notes,
            }),
        ))
    }
}

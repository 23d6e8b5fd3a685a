//! Report rendering step.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::{ReportRequest, ReporterClient};
use crate::db::models::WorkflowInstance;
use crate::engine::context::WorkflowContext;
use crate::engine::pipeline::StepName;
use crate::engine::registry::{StepHandler, StepOutcome};
use crate::error::{AppError, AppResult};

pub struct ReportStepHandler {
    reporter: Arc<dyn ReporterClient>,
}

impl ReportStepHandler {
    pub fn new(reporter: Arc<dyn ReporterClient>) -> Self {
        Self { reporter }
    }
}

#[async_trait]
impl StepHandler for ReportStepHandler {
    fn step(&self) -> StepName {
        StepName::Report
    }

    async fn execute(
        &self,
        instance: &WorkflowInstance,
        _payload: &serde_json::Value,
    ) -> AppResult<StepOutcome> {
        let ctx = WorkflowContext::from_value(&instance.context)?;
        let analysis_id = ctx.analysis_id.clone().ok_or_else(|| {
            AppError::NonRetryable("Report step requires an analysis_id in context".to_string())
        })?;

        let report = self
            .reporter
            .render_report(&ReportRequest {
                workflow_id: instance.id,
                analysis_id,
            })
            .await?;

        tracing::info!(
            workflow_id = %instance.id,
            report_id = %report.report_id,
            "Report rendered"
        );

        Ok(StepOutcome::advance(
            StepName::Review,
            serde_json::json!({
                "report_id": report.report_id,
                "report_summary": report.summary,
            }),
        ))
    }
}

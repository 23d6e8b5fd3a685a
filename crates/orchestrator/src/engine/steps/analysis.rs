//! Result analysis step.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::{AnalysisRequest, PlannerClient};
use crate::db::models::WorkflowInstance;
use crate::engine::context::WorkflowContext;
use crate::engine::pipeline::StepName;
use crate::engine::registry::{StepHandler, StepOutcome};
use crate::error::{AppError, AppResult};

pub struct AnalysisStepHandler {
    planner: Arc<dyn PlannerClient>,
}

impl AnalysisStepHandler {
    pub fn new(planner: Arc<dyn PlannerClient>) -> Self {
        Self { planner }
    }
}

#[async_trait]
impl StepHandler for AnalysisStepHandler {
    fn step(&self) -> StepName {
        StepName::Analysis
    }

    async fn execute(
        &self,
        instance: &WorkflowInstance,
        _payload: &serde_json::Value,
    ) -> AppResult<StepOutcome> {
        let ctx = WorkflowContext::from_value(&instance.context)?;
        let job_id = ctx.job_id.clone().ok_or_else(|| {
            AppError::NonRetryable("Analysis step requires a job_id in context".to_string())
        })?;
        let metrics = ctx
            .extra
            .get("metrics")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));

        let analysis = self
            .planner
            .analyze(&AnalysisRequest {
                workflow_id: instance.id,
                job_id,
                metrics,
            })
            .await?;

        tracing::info!(
            workflow_id = %instance.id,
            analysis_id = %analysis.analysis_id,
            "Results analyzed"
        );

        Ok(StepOutcome::advance(
            StepName::Report,
            serde_json::json!({
                "analysis_id": analysis.analysis_id,
                "analysis_summary": analysis.summary,
            }),
        ))
    }
}

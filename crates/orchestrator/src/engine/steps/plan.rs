//! Plan generation step.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::{PlanRequest, PlannerClient};
use crate::db::models::WorkflowInstance;
use crate::engine::context::WorkflowContext;
use crate::engine::pipeline::StepName;
use crate::engine::registry::{StepHandler, StepOutcome};
use crate::error::AppResult;

/// Asks the planner for a research plan, then hands off to the
/// direction gate.
pub struct PlanStepHandler {
    planner: Arc<dyn PlannerClient>,
}

impl PlanStepHandler {
    pub fn new(planner: Arc<dyn PlannerClient>) -> Self {
        Self { planner }
    }
}

#[async_trait]
impl StepHandler for PlanStepHandler {
    fn step(&self) -> StepName {
        StepName::PlanGenerate
    }

    async fn execute(
        &self,
        instance: &WorkflowInstance,
        payload: &serde_json::Value,
    ) -> AppResult<StepOutcome> {
        let ctx = WorkflowContext::from_value(&instance.context)?;
        let rework_comment = payload
            .get("rework_comment")
            .and_then(|v| v.as_str())
            .map(String::from);

        if let Some(comment) = &rework_comment {
            tracing::info!(
                workflow_id = %instance.id,
                comment = %comment,
                "Re-generating plan after requested changes"
            );
        }

        let plan = self
            .planner
            .generate_plan(&PlanRequest {
                workflow_id: instance.id,
                project_id: instance.project_id,
                cluster_type: ctx.cluster_type.clone(),
                max_experiments: ctx.max_experiments,
                rework_comment,
            })
            .await?;

        tracing::info!(
            workflow_id = %instance.id,
            plan_id = %plan.plan_id,
            experiments = plan.experiments.len(),
            "Plan generated"
        );

        Ok(StepOutcome::advance(
            StepName::HitlDirection,
            serde_json::json!({
                "plan_id": plan.plan_id,
                "plan_summary": plan.summary,
            }),
        ))
    }
}

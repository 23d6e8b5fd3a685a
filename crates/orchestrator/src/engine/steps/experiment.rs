//! Experiment execution step: submit the plan to the cluster and wait
//! for the job to finish.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::clients::{ClusterClient, JobRequest, JobState};
use crate::db::models::WorkflowInstance;
use crate::engine::context::WorkflowContext;
use crate::engine::pipeline::StepName;
use crate::engine::registry::{StepHandler, StepOutcome};
use crate::error::{AppError, AppResult};

pub struct ExperimentStepHandler {
    cluster: Arc<dyn ClusterClient>,
    poll_interval_secs: u64,
    max_polls: u32,
}

impl ExperimentStepHandler {
    pub fn new(cluster: Arc<dyn ClusterClient>, poll_interval_secs: u64, max_polls: u32) -> Self {
        Self {
            cluster,
            poll_interval_secs,
            max_polls,
        }
    }
}

#[async_trait]
impl StepHandler for ExperimentStepHandler {
    fn step(&self) -> StepName {
        StepName::ExperimentRun
    }

    async fn execute(
        &self,
        instance: &WorkflowInstance,
        _payload: &serde_json::Value,
    ) -> AppResult<StepOutcome> {
        let ctx = WorkflowContext::from_value(&instance.context)?;
        let plan_id = ctx.plan_id.clone().ok_or_else(|| {
            AppError::NonRetryable("Experiment step requires a plan_id in context".to_string())
        })?;

        let submission = self
            .cluster
            .submit_job(&JobRequest {
                workflow_id: instance.id,
                plan_id: plan_id.clone(),
                cluster_type: ctx.cluster_type.clone(),
                max_experiments: ctx.max_experiments,
            })
            .await?;

        tracing::info!(
            workflow_id = %instance.id,
            plan_id = %plan_id,
            job_id = %submission.job_id,
            "Cluster job submitted"
        );

        // The task lease stays alive via the runner's heartbeat while we
        // poll here.
        let mut polls = 0u32;
        loop {
            match self.cluster.job_state(&submission.job_id).await? {
                JobState::Queued | JobState::Running => {
                    polls += 1;
                    if polls >= self.max_polls {
                        return Err(AppError::ExternalService(format!(
                            "Cluster job {} still running after {} polls",
                            submission.job_id, polls
                        )));
                    }
                    tokio::time::sleep(Duration::from_secs(self.poll_interval_secs)).await;
                }
                JobState::Completed { metrics } => {
                    tracing::info!(
                        workflow_id = %instance.id,
                        job_id = %submission.job_id,
                        "Cluster job completed"
                    );
                    return Ok(StepOutcome::advance(
                        StepName::Analysis,
                        serde_json::json!({
                            "job_id": submission.job_id,
                            "metrics": metrics,
                        }),
                    ));
                }
                JobState::Failed { reason } => {
                    return Err(AppError::ExternalService(format!(
                        "Cluster job {} failed: {reason}",
                        submission.job_id
                    )));
                }
            }
        }
    }
}

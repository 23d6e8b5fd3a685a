//! Runner integration tests: one leased task driven end to end through
//! `process_task`, covering the gate hand-off, autonomous auto-approval,
//! cancellation at the step boundary, and attempt exhaustion.

mod support;

use std::sync::Arc;

use async_trait::async_trait;
use labdesk_orchestrator::clients::{
    AnalysisDocument, AnalysisRequest, ClusterClient, JobRequest, JobState, JobSubmission,
    PlanDocument, PlanRequest, PlannerClient, ReportDocument, ReportRequest, ReporterClient,
    ReviewDocument, ReviewRequest,
};
use labdesk_orchestrator::config::AppConfig;
use labdesk_orchestrator::db::models::{GateStatus, TaskStatus, WorkflowStatus};
use labdesk_orchestrator::db::{queries, DbPool};
use labdesk_orchestrator::engine::context::{DecisionMode, WorkflowContext};
use labdesk_orchestrator::engine::gate::{GateManager, AUTO_APPROVER};
use labdesk_orchestrator::engine::queue::TaskQueue;
use labdesk_orchestrator::engine::runner::Runner;
use labdesk_orchestrator::engine::steps;
use labdesk_orchestrator::error::{AppError, AppResult};
use labdesk_orchestrator::services::{CreateWorkflowRequest, WorkflowService};
use serde_json::json;
use uuid::Uuid;

struct StubPlanner {
    unavailable: bool,
}

#[async_trait]
impl PlannerClient for StubPlanner {
    async fn generate_plan(&self, request: &PlanRequest) -> AppResult<PlanDocument> {
        if self.unavailable {
            return Err(AppError::ExternalService("planner is down".to_string()));
        }
        Ok(PlanDocument {
            plan_id: format!("plan-{}", request.workflow_id),
            summary: "three sweeps".to_string(),
            experiments: vec![json!({"lr": 0.01})],
        })
    }

    async fn analyze(&self, request: &AnalysisRequest) -> AppResult<AnalysisDocument> {
        Ok(AnalysisDocument {
            analysis_id: format!("analysis-of-{}", request.job_id),
            summary: "converged".to_string(),
            findings: json!({}),
        })
    }
}

struct StubCluster;

#[async_trait]
impl ClusterClient for StubCluster {
    async fn submit_job(&self, request: &JobRequest) -> AppResult<JobSubmission> {
        Ok(JobSubmission {
            job_id: format!("job-for-{}", request.plan_id),
        })
    }

    async fn job_state(&self, _job_id: &str) -> AppResult<JobState> {
        Ok(JobState::Completed {
            metrics: json!({"loss": 0.12}),
        })
    }
}

struct StubReporter;

#[async_trait]
impl ReporterClient for StubReporter {
    async fn render_report(&self, _request: &ReportRequest) -> AppResult<ReportDocument> {
        Ok(ReportDocument {
            report_id: "rep-1".to_string(),
            summary: "writeup".to_string(),
        })
    }

    async fn review_report(&self, _request: &ReviewRequest) -> AppResult<ReviewDocument> {
        Ok(ReviewDocument {
            review_id: "rev-1".to_string(),
            verdict: "accept".to_string(),
            notes: None,
        })
    }
}

fn build_runner(pool: &DbPool, config: &AppConfig, planner_down: bool) -> Runner {
    let queue = Arc::new(TaskQueue::new(pool.clone(), config));
    let gates = Arc::new(GateManager::new(pool.clone(), config));
    let registry = Arc::new(steps::build_registry(
        config,
        Arc::new(StubPlanner {
            unavailable: planner_down,
        }),
        Arc::new(StubCluster),
        Arc::new(StubReporter),
    ));
    Runner::new(pool.clone(), config.clone(), queue, registry, gates)
}

fn create_request(decision_mode: DecisionMode) -> CreateWorkflowRequest {
    CreateWorkflowRequest {
        project_id: Uuid::new_v4(),
        name: Some("resnet-sweep".to_string()),
        requested_by: "alice".to_string(),
        decision_mode,
        cluster_type: Some("gpu-small".to_string()),
        max_experiments: Some(4),
    }
}

async fn get_instance(
    pool: &DbPool,
    id: Uuid,
) -> labdesk_orchestrator::db::models::WorkflowInstance {
    queries::workflow::get(pool, id)
        .await
        .expect("get instance")
        .expect("instance exists")
}

#[tokio::test]
async fn completed_plan_step_parks_the_instance_at_the_direction_gate() {
    let Some(db) = support::test_pool().await else {
        return;
    };
    let pool = db.pool.clone();
    let config = support::test_config();
    let service = WorkflowService::new(pool.clone());
    let queue = TaskQueue::new(pool.clone(), &config);
    let runner = build_runner(&pool, &config, false);

    let instance = service
        .create(create_request(DecisionMode::HumanInTheLoop))
        .await
        .expect("create");

    let task = queue
        .lease_next(&config.worker_id, 60)
        .await
        .expect("lease")
        .expect("entry task");
    assert_eq!(task.workflow_id, instance.id);
    runner.process_task(task).await.expect("process plan step");

    let after = get_instance(&pool, instance.id).await;
    assert_eq!(after.workflow_status(), WorkflowStatus::WaitingHuman);
    assert_eq!(after.current_step, "hitl_direction");

    let ctx = WorkflowContext::from_value(&after.context).expect("context");
    assert_eq!(
        ctx.plan_id,
        Some(format!("plan-{}", instance.id)),
        "the handler's patch must land in the persisted context"
    );

    let gate = queries::gate::get_pending(&pool, instance.id, "hitl_direction")
        .await
        .expect("lookup")
        .expect("one pending gate");
    assert_eq!(gate.gate_status(), GateStatus::Pending);

    for event_type in [
        "workflow.step_completed",
        "gate.opened",
        "workflow.waiting_human",
    ] {
        let count = queries::event::count(&pool, instance.id, Some(event_type), None)
            .await
            .expect("count");
        assert_eq!(count, 1, "expected exactly one {event_type} event");
    }

    // Approval resumes the pipeline, and the runner carries it through
    // the experiment step.
    let gates = GateManager::new(pool.clone(), &config);
    gates
        .resolve(
            instance.id,
            gate.id,
            GateStatus::Approved,
            Some("approve_plan"),
            None,
            "alice",
        )
        .await
        .expect("resolve");

    let task = queue
        .lease_next(&config.worker_id, 60)
        .await
        .expect("lease")
        .expect("experiment task");
    assert_eq!(task.step, "experiment_run");
    runner
        .process_task(task)
        .await
        .expect("process experiment step");

    let after = get_instance(&pool, instance.id).await;
    assert_eq!(after.workflow_status(), WorkflowStatus::Running);
    assert_eq!(after.current_step, "analysis");

    let ctx = WorkflowContext::from_value(&after.context).expect("context");
    assert_eq!(
        ctx.job_id,
        Some(format!("job-for-plan-{}", instance.id)),
        "the experiment result must flow into context for the analysis step"
    );
}

#[tokio::test]
async fn autonomous_mode_approves_the_gate_without_waiting() {
    let Some(db) = support::test_pool().await else {
        return;
    };
    let pool = db.pool.clone();
    let config = support::test_config();
    let service = WorkflowService::new(pool.clone());
    let queue = TaskQueue::new(pool.clone(), &config);
    let runner = build_runner(&pool, &config, false);

    let instance = service
        .create(create_request(DecisionMode::Autonomous))
        .await
        .expect("create");

    let task = queue
        .lease_next(&config.worker_id, 60)
        .await
        .expect("lease")
        .expect("entry task");
    runner.process_task(task).await.expect("process plan step");

    let after = get_instance(&pool, instance.id).await;
    assert_eq!(after.workflow_status(), WorkflowStatus::Running);
    assert_eq!(
        after.current_step, "experiment_run",
        "autonomous mode must not park at the gate"
    );

    // The gate row stays behind as the audit record of the decision.
    let gates = queries::gate::list_by_workflow(&pool, instance.id)
        .await
        .expect("list gates");
    assert_eq!(gates.len(), 1);
    assert_eq!(gates[0].gate_status(), GateStatus::Approved);
    assert_eq!(gates[0].resolved_by.as_deref(), Some(AUTO_APPROVER));
    assert_eq!(gates[0].selected_option.as_deref(), Some("approve_plan"));
}

#[tokio::test]
async fn cancellation_observed_at_the_boundary_freezes_the_instance() {
    let Some(db) = support::test_pool().await else {
        return;
    };
    let pool = db.pool.clone();
    let config = support::test_config();
    let service = WorkflowService::new(pool.clone());
    let queue = TaskQueue::new(pool.clone(), &config);
    let runner = build_runner(&pool, &config, false);

    let instance = service
        .create(create_request(DecisionMode::HumanInTheLoop))
        .await
        .expect("create");
    let task = queue
        .lease_next(&config.worker_id, 60)
        .await
        .expect("lease")
        .expect("entry task");

    // Cancellation lands while the task is held, so it defers to the
    // runner's next look at the flag.
    let after_cancel = service.cancel(instance.id).await.expect("cancel");
    assert!(after_cancel.cancel_requested);

    runner.process_task(task).await.expect("process");

    let after = get_instance(&pool, instance.id).await;
    assert_eq!(after.workflow_status(), WorkflowStatus::Cancelled);

    let tasks = queries::task::list_by_workflow(&pool, instance.id)
        .await
        .expect("list");
    assert!(tasks
        .iter()
        .all(|t| t.task_status() == TaskStatus::Cancelled));

    let cancelled_events =
        queries::event::count(&pool, instance.id, Some("workflow.cancelled"), None)
            .await
            .expect("count");
    assert_eq!(cancelled_events, 1);
}

#[tokio::test]
async fn attempt_exhaustion_fails_the_workflow_with_an_error_trail() {
    let Some(db) = support::test_pool().await else {
        return;
    };
    let pool = db.pool.clone();
    let config = support::test_config();
    let service = WorkflowService::new(pool.clone());
    let queue = TaskQueue::new(pool.clone(), &config);
    let runner = build_runner(&pool, &config, true);

    let instance = service
        .create(create_request(DecisionMode::HumanInTheLoop))
        .await
        .expect("create");

    // retry_base_secs is 0, so each failed attempt is immediately
    // eligible again.
    for _ in 0..3 {
        let task = queue
            .lease_next(&config.worker_id, 60)
            .await
            .expect("lease")
            .expect("task eligible");
        assert_eq!(task.workflow_id, instance.id);
        runner.process_task(task).await.expect("process attempt");
    }

    let after = get_instance(&pool, instance.id).await;
    assert_eq!(after.workflow_status(), WorkflowStatus::Failed);
    let message = after.error_message.expect("error recorded");
    assert!(message.contains("planner is down"));

    let tasks = queries::task::list_by_workflow(&pool, instance.id)
        .await
        .expect("list");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_status(), TaskStatus::Failed);
    assert_eq!(tasks[0].attempts, 3);

    let task_failures = queries::event::count(&pool, instance.id, Some("task.failed"), Some("error"))
        .await
        .expect("count");
    assert_eq!(task_failures, 3, "one error-level event per failed attempt");
    let workflow_failures = queries::event::count(&pool, instance.id, Some("workflow.failed"), None)
        .await
        .expect("count");
    assert_eq!(workflow_failures, 1);

    assert!(
        queue
            .lease_next(&config.worker_id, 60)
            .await
            .expect("lease")
            .is_none(),
        "a failed instance's task must leave the queue"
    );
}

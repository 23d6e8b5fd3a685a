//! AI planner client: research plan generation and result analysis.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Request for a research plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRequest {
    pub workflow_id: Uuid,
    pub project_id: Uuid,
    pub cluster_type: Option<String>,
    pub max_experiments: Option<i32>,
    /// Reviewer comment when a plan is being re-generated after a
    /// changes_requested decision.
    #[serde(default)]
    pub rework_comment: Option<String>,
}

/// Structured plan document returned by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDocument {
    pub plan_id: String,
    pub summary: String,
    #[serde(default)]
    pub experiments: Vec<serde_json::Value>,
}

/// Request to analyze a finished cluster job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub workflow_id: Uuid,
    pub job_id: String,
    pub metrics: serde_json::Value,
}

/// Analysis document returned by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisDocument {
    pub analysis_id: String,
    pub summary: String,
    #[serde(default)]
    pub findings: serde_json::Value,
}

/// Plan and analysis generation.
#[async_trait]
pub trait PlannerClient: Send + Sync {
    async fn generate_plan(&self, request: &PlanRequest) -> AppResult<PlanDocument>;

    async fn analyze(&self, request: &AnalysisRequest) -> AppResult<AnalysisDocument>;
}

/// HTTP implementation against the planner service.
#[derive(Clone)]
pub struct HttpPlannerClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPlannerClient {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PlannerClient for HttpPlannerClient {
    async fn generate_plan(&self, request: &PlanRequest) -> AppResult<PlanDocument> {
        let response = self
            .client
            .post(format!("{}/api/plans", self.base_url))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "Planner rejected plan request ({status}): {body}"
            )));
        }

        Ok(response.json().await?)
    }

    async fn analyze(&self, request: &AnalysisRequest) -> AppResult<AnalysisDocument> {
        let response = self
            .client
            .post(format!("{}/api/analyses", self.base_url))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "Planner rejected analysis request ({status}): {body}"
            )));
        }

        Ok(response.json().await?)
    }
}

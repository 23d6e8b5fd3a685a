//! Cluster job submission client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Job specification submitted to the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub workflow_id: Uuid,
    pub plan_id: String,
    pub cluster_type: Option<String>,
    pub max_experiments: Option<i32>,
}

/// Acknowledgement of a submitted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    pub job_id: String,
}

/// Current state of a cluster job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Queued,
    Running,
    Completed { metrics: serde_json::Value },
    Failed { reason: String },
}

/// Wire shape for `GET /api/jobs/{id}`.
#[derive(Debug, Deserialize)]
struct JobStatusBody {
    status: String,
    #[serde(default)]
    metrics: Option<serde_json::Value>,
    #[serde(default)]
    reason: Option<String>,
}

/// Cluster job submission and polling.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn submit_job(&self, request: &JobRequest) -> AppResult<JobSubmission>;

    async fn job_state(&self, job_id: &str) -> AppResult<JobState>;
}

/// HTTP implementation against the cluster service.
#[derive(Clone)]
pub struct HttpClusterClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClusterClient {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    async fn submit_job(&self, request: &JobRequest) -> AppResult<JobSubmission> {
        let response = self
            .client
            .post(format!("{}/api/jobs", self.base_url))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "Cluster rejected job submission ({status}): {body}"
            )));
        }

        Ok(response.json().await?)
    }

    async fn job_state(&self, job_id: &str) -> AppResult<JobState> {
        let response = self
            .client
            .get(format!("{}/api/jobs/{job_id}", self.base_url))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "Cluster job status lookup failed ({status}): {body}"
            )));
        }

        let body: JobStatusBody = response.json().await?;
        match body.status.as_str() {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed {
                metrics: body.metrics.unwrap_or_else(|| serde_json::json!({})),
            }),
            "failed" => Ok(JobState::Failed {
                reason: body
                    .reason
                    .unwrap_or_else(|| "Cluster reported failure without a reason".to_string()),
            }),
            other => Err(AppError::ExternalService(format!(
                "Cluster reported unknown job status: {other}"
            ))),
        }
    }
}

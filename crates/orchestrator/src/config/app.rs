//! Application configuration for the Labdesk Orchestrator.

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// Environment variables are prefixed with `LABDESK_`:
/// - `LABDESK_HOST`: Server bind address (default: "0.0.0.0")
/// - `LABDESK_PORT`: Server port (default: 8088)
/// - `LABDESK_WORKER_ID`: Stable identity of this orchestrator process
/// - `LABDESK_WORKER_SLOTS`: Concurrent task slots per process (default: 4)
/// - `LABDESK_POLL_INTERVAL_SECS`: Queue poll interval when idle (default: 1)
/// - `LABDESK_LEASE_SECS`: Task lease duration (default: 60)
/// - `LABDESK_RETRY_BASE_SECS` / `LABDESK_RETRY_CAP_SECS`: retry backoff
/// - `LABDESK_GATE_TIMEOUT_SECS`: pending gate age before the timeout sweep
///   resolves it (default: 7 days, 0 disables the sweep)
/// - `LABDESK_PLANNER_URL` / `LABDESK_CLUSTER_URL` / `LABDESK_REPORTER_URL`:
///   external collaborator endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Server name for identification
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Worker identity used as the lease fencing token. Defaults to a
    /// fresh `orc-<uuid>` per process start.
    #[serde(default = "default_worker_id")]
    pub worker_id: String,

    /// Concurrent task slots in this process
    #[serde(default = "default_worker_slots")]
    pub worker_slots: usize,

    /// Queue poll interval in seconds when no task is eligible
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Task lease duration in seconds
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    /// Base retry backoff in seconds
    #[serde(default = "default_retry_base")]
    pub retry_base_secs: u64,

    /// Retry backoff cap in seconds
    #[serde(default = "default_retry_cap")]
    pub retry_cap_secs: u64,

    /// Age in seconds after which a pending gate times out (0 disables)
    #[serde(default = "default_gate_timeout")]
    pub gate_timeout_secs: u64,

    /// Gate timeout sweep interval in seconds
    #[serde(default = "default_gate_sweep_interval")]
    pub gate_sweep_interval_secs: u64,

    /// Plan/analysis generator endpoint
    #[serde(default = "default_planner_url")]
    pub planner_url: String,

    /// Cluster job submission endpoint
    #[serde(default = "default_cluster_url")]
    pub cluster_url: String,

    /// Report/review generator endpoint
    #[serde(default = "default_reporter_url")]
    pub reporter_url: String,

    /// Interval in seconds between cluster job status polls
    #[serde(default = "default_job_poll_interval")]
    pub job_poll_interval_secs: u64,

    /// Maximum cluster job status polls before the attempt is abandoned
    #[serde(default = "default_job_poll_max_attempts")]
    pub job_poll_max_attempts: u32,

    /// Enable debug mode
    #[serde(default)]
    pub debug: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8088
}

fn default_server_name() -> String {
    "labdesk-orchestrator".to_string()
}

fn default_worker_id() -> String {
    format!("orc-{}", uuid::Uuid::new_v4())
}

fn default_worker_slots() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    1
}

fn default_lease_secs() -> u64 {
    60
}

fn default_retry_base() -> u64 {
    5
}

fn default_retry_cap() -> u64 {
    600
}

fn default_gate_timeout() -> u64 {
    7 * 24 * 60 * 60
}

fn default_gate_sweep_interval() -> u64 {
    60
}

fn default_planner_url() -> String {
    "http://localhost:8090".to_string()
}

fn default_cluster_url() -> String {
    "http://localhost:8091".to_string()
}

fn default_reporter_url() -> String {
    "http://localhost:8092".to_string()
}

fn default_job_poll_interval() -> u64 {
    10
}

fn default_job_poll_max_attempts() -> u32 {
    360
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `LABDESK_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("LABDESK_").from_env::<AppConfig>()
    }

    /// Bind address string for the HTTP listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

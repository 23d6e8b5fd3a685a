//! Shared helpers for Postgres-backed integration tests.
//!
//! Tests skip cleanly when `DATABASE_URL` is not set.

use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use labdesk_orchestrator::config::AppConfig;
use labdesk_orchestrator::db::models::WorkflowInstance;
use labdesk_orchestrator::db::{ensure_schema, queries, DbPool};
use labdesk_orchestrator::engine::context::{DecisionMode, WorkflowContext};
use labdesk_orchestrator::engine::pipeline::StepName;

/// Advisory lock key shared by every DB test; `lease_next` is a global
/// dequeue, so tests that touch the queue must not interleave.
const TEST_LOCK_KEY: i64 = 0x4c41_4244_4553_4b31; // "LABDESK1"

/// A test database handle holding a session-level advisory lock for the
/// life of the test. The lock is released when the pool shuts down.
pub struct TestDb {
    pub pool: DbPool,
    _guard: sqlx::pool::PoolConnection<sqlx::Postgres>,
}

impl std::ops::Deref for TestDb {
    type Target = DbPool;

    fn deref(&self) -> &DbPool {
        &self.pool
    }
}

/// Connect to the test database, or `None` to skip the test. Tests run
/// serialized behind an advisory lock.
pub async fn test_pool() -> Option<TestDb> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping DB integration test: DATABASE_URL not set");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to test database");

    let mut guard = pool.acquire().await.expect("acquire lock connection");
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(TEST_LOCK_KEY)
        .execute(&mut *guard)
        .await
        .expect("take test lock");

    ensure_schema(&pool).await.expect("ensure schema");

    // Clean slate: `lease_next` is a global dequeue, so leftover rows from
    // earlier tests would leak into this test's lease assertions.
    sqlx::query(
        "TRUNCATE labdesk.workflow_events, labdesk.workflow_tasks, \
         labdesk.human_gates, labdesk.workflow_instances CASCADE",
    )
    .execute(&pool)
    .await
    .expect("truncate test tables");

    Some(TestDb { pool, _guard: guard })
}

/// Config with defaults suitable for fast tests: no retry backoff delay.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::from_env().expect("config from env");
    config.retry_base_secs = 0;
    config.worker_id = format!("test-{}", Uuid::new_v4());
    config
}

/// Insert a fresh instance in the given state.
pub async fn seed_instance(
    pool: &DbPool,
    status: &str,
    current_step: StepName,
) -> WorkflowInstance {
    seed_with_mode(pool, status, current_step, DecisionMode::HumanInTheLoop).await
}

/// Insert a fresh autonomous-mode instance in the given state.
#[allow(dead_code)]
pub async fn seed_autonomous_instance(
    pool: &DbPool,
    status: &str,
    current_step: StepName,
) -> WorkflowInstance {
    seed_with_mode(pool, status, current_step, DecisionMode::Autonomous).await
}

async fn seed_with_mode(
    pool: &DbPool,
    status: &str,
    current_step: StepName,
    decision_mode: DecisionMode,
) -> WorkflowInstance {
    let id = Uuid::new_v4();
    let ctx = WorkflowContext {
        version: 1,
        decision_mode,
        requested_by: Some("itest".to_string()),
        ..Default::default()
    };

    queries::workflow::insert(
        pool,
        id,
        Uuid::new_v4(),
        &format!("itest-{}", &id.to_string()[..8]),
        StepName::ENTRY.as_str(),
        &ctx.to_value().unwrap(),
    )
    .await
    .expect("insert instance");

    queries::workflow::apply_transition(
        pool,
        id,
        status,
        current_step.as_str(),
        &ctx.to_value().unwrap(),
        None,
    )
    .await
    .expect("seed transition")
}

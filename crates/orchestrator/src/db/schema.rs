//! Schema bootstrap.
//!
//! The DDL ships with the crate so deployments and integration tests can
//! bring up their own database without an external migration step. Every
//! statement is idempotent (`IF NOT EXISTS`), so applying it repeatedly
//! against a live schema is safe.

use crate::db::DbPool;
use crate::error::AppResult;

/// Embedded schema DDL.
pub const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Apply the schema to the connected database.
pub async fn ensure_schema(pool: &DbPool) -> AppResult<()> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    tracing::info!("Schema ensured");
    Ok(())
}

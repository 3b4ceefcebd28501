//! Execution log repository (append-only)

use crate::db::{db_err, DatabasePool};
use crate::models::ExecutionLogEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lexflow_common::types::BatchId;
use lexflow_common::{Error, Result};
use sqlx::FromRow;
use uuid::Uuid;

/// Execution log repository trait
#[async_trait]
pub trait ExecutionLogRepository: Send + Sync {
    /// Append all entries of one execution run atomically
    async fn append(&self, entries: &[ExecutionLogEntry]) -> Result<()>;
    /// Entries of a batch in action order
    async fn list_for_batch(&self, batch_id: BatchId) -> Result<Vec<ExecutionLogEntry>>;
}

#[derive(FromRow)]
struct LogRow {
    id: Uuid,
    batch_id: Uuid,
    position: i32,
    action_type: String,
    status: String,
    result: Option<serde_json::Value>,
    error: Option<String>,
    attempts: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<LogRow> for ExecutionLogEntry {
    type Error = Error;

    fn try_from(row: LogRow) -> Result<Self> {
        Ok(ExecutionLogEntry {
            id: row.id,
            batch_id: row.batch_id,
            position: row.position,
            action_type: row.action_type.parse()?,
            status: row.status.parse()?,
            result: row.result,
            error: row.error,
            attempts: row.attempts,
            created_at: row.created_at,
        })
    }
}

/// Database execution log repository
pub struct DbExecutionLogRepository {
    pool: DatabasePool,
}

impl DbExecutionLogRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionLogRepository for DbExecutionLogRepository {
    async fn append(&self, entries: &[ExecutionLogEntry]) -> Result<()> {
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO execution_log (
                    id, batch_id, position, action_type, status, result, error,
                    attempts, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(entry.id)
            .bind(entry.batch_id)
            .bind(entry.position)
            .bind(entry.action_type.as_str())
            .bind(entry.status.as_str())
            .bind(&entry.result)
            .bind(&entry.error)
            .bind(entry.attempts)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list_for_batch(&self, batch_id: BatchId) -> Result<Vec<ExecutionLogEntry>> {
        let rows = sqlx::query_as::<_, LogRow>(
            "SELECT * FROM execution_log WHERE batch_id = $1 ORDER BY position ASC, created_at ASC",
        )
        .bind(batch_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

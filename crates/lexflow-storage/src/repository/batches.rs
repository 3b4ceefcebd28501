//! Approval batch repository
//!
//! Status changes go through [`BatchRepository::transition`], a single
//! conditional update. There is no read-modify-write path.

use crate::db::{db_err, DatabasePool};
use crate::models::{
    Action, ApprovalBatch, BatchTransition, CreateBatch, CreateBatchOutcome, ExecutionSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lexflow_common::types::{BatchId, BatchStatus, MessageId};
use lexflow_common::{Error, Result};
use sqlx::types::Json;
use sqlx::FromRow;
use tracing::debug;
use uuid::Uuid;

/// Batch list filter
#[derive(Debug, Clone, Default)]
pub struct BatchFilter {
    pub status: Option<BatchStatus>,
    pub message_id: Option<MessageId>,
}

/// Batch repository trait
#[async_trait]
pub trait BatchRepository: Send + Sync {
    /// Store a new pending batch unless the message already has an active one
    async fn create(&self, input: CreateBatch) -> Result<CreateBatchOutcome>;
    async fn get(&self, id: BatchId) -> Result<Option<ApprovalBatch>>;
    async fn find_active_for_message(&self, message_id: MessageId)
        -> Result<Option<ApprovalBatch>>;
    /// Newest first
    async fn list(&self, filter: BatchFilter, limit: i64, offset: i64)
        -> Result<Vec<ApprovalBatch>>;
    /// Replace the action snapshot; `None` if the batch is missing or not pending
    async fn update_actions(
        &self,
        id: BatchId,
        actions: Vec<Action>,
        at: DateTime<Utc>,
    ) -> Result<Option<ApprovalBatch>>;
    /// Apply a conditional transition; `None` if the batch is missing or a guard failed
    async fn transition(
        &self,
        id: BatchId,
        transition: BatchTransition,
    ) -> Result<Option<ApprovalBatch>>;
    /// Pending batches whose link expired before `cutoff`
    async fn list_stale(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<ApprovalBatch>>;
}

#[derive(FromRow)]
struct BatchRow {
    id: Uuid,
    message_id: Uuid,
    rule_id: Uuid,
    rule_name: String,
    mail_subject: String,
    mail_from: String,
    actions_current: Json<Vec<Action>>,
    status: String,
    expires_at: DateTime<Utc>,
    approver_identity: Option<String>,
    approved_by: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    failure_reason: Option<String>,
    execution_summary: Option<Json<ExecutionSummary>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<BatchRow> for ApprovalBatch {
    type Error = Error;

    fn try_from(row: BatchRow) -> Result<Self> {
        Ok(ApprovalBatch {
            id: row.id,
            message_id: row.message_id,
            rule_id: row.rule_id,
            rule_name: row.rule_name,
            mail_subject: row.mail_subject,
            mail_from: row.mail_from,
            actions_current: row.actions_current.0,
            status: row.status.parse()?,
            expires_at: row.expires_at,
            approver_identity: row.approver_identity,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            cancel_reason: row.cancel_reason,
            failure_reason: row.failure_reason,
            execution_summary: row.execution_summary.map(|s| s.0),
            created_at: row.created_at,
            updated_at: row.updated_at,
            finished_at: row.finished_at,
        })
    }
}

fn status_strings(statuses: &[BatchStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// Database batch repository
pub struct DbBatchRepository {
    pool: DatabasePool,
}

impl DbBatchRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BatchRepository for DbBatchRepository {
    async fn create(&self, input: CreateBatch) -> Result<CreateBatchOutcome> {
        let message_id = input.message_id;
        let batch = input.into_batch();

        // The active batch found on conflict may finish between the insert and
        // the lookup, so retry a few times before giving up.
        for _ in 0..3 {
            let row = sqlx::query_as::<_, BatchRow>(
                r#"
                INSERT INTO approval_batches (
                    id, message_id, rule_id, rule_name, mail_subject, mail_from,
                    actions_current, status, expires_at, approver_identity,
                    created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $10, $10)
                ON CONFLICT (message_id) WHERE status IN ('pending', 'approved', 'executing')
                DO NOTHING
                RETURNING *
                "#,
            )
            .bind(batch.id)
            .bind(batch.message_id)
            .bind(batch.rule_id)
            .bind(&batch.rule_name)
            .bind(&batch.mail_subject)
            .bind(&batch.mail_from)
            .bind(Json(&batch.actions_current))
            .bind(batch.expires_at)
            .bind(&batch.approver_identity)
            .bind(batch.created_at)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?;

            if let Some(row) = row {
                return Ok(CreateBatchOutcome::Created(row.try_into()?));
            }
            if let Some(existing) = self.find_active_for_message(message_id).await? {
                debug!(batch_id = %existing.id, message_id = %message_id, "Reusing active batch");
                return Ok(CreateBatchOutcome::Existing(existing));
            }
        }

        Err(Error::Conflict(format!(
            "Could not create batch for message {}",
            message_id
        )))
    }

    async fn get(&self, id: BatchId) -> Result<Option<ApprovalBatch>> {
        sqlx::query_as::<_, BatchRow>("SELECT * FROM approval_batches WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn find_active_for_message(
        &self,
        message_id: MessageId,
    ) -> Result<Option<ApprovalBatch>> {
        sqlx::query_as::<_, BatchRow>(
            r#"
            SELECT * FROM approval_batches
            WHERE message_id = $1 AND status = ANY($2)
            "#,
        )
        .bind(message_id)
        .bind(status_strings(&BatchStatus::ACTIVE))
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?
        .map(TryInto::try_into)
        .transpose()
    }

    async fn list(
        &self,
        filter: BatchFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ApprovalBatch>> {
        let rows = sqlx::query_as::<_, BatchRow>(
            r#"
            SELECT * FROM approval_batches
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR message_id = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.message_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_actions(
        &self,
        id: BatchId,
        actions: Vec<Action>,
        at: DateTime<Utc>,
    ) -> Result<Option<ApprovalBatch>> {
        sqlx::query_as::<_, BatchRow>(
            r#"
            UPDATE approval_batches
            SET actions_current = $2, updated_at = $3
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(Json(&actions))
        .bind(at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?
        .map(TryInto::try_into)
        .transpose()
    }

    async fn transition(
        &self,
        id: BatchId,
        transition: BatchTransition,
    ) -> Result<Option<ApprovalBatch>> {
        let row = sqlx::query_as::<_, BatchRow>(
            r#"
            UPDATE approval_batches SET
                status = $2,
                actions_current = COALESCE($3::jsonb, actions_current),
                approved_by = CASE WHEN $2 = 'approved' THEN COALESCE($4, approved_by) ELSE approved_by END,
                approved_at = CASE WHEN $2 = 'approved' THEN $9 ELSE approved_at END,
                cancel_reason = COALESCE($5, cancel_reason),
                failure_reason = COALESCE($6, failure_reason),
                execution_summary = COALESCE($7::jsonb, execution_summary),
                finished_at = CASE WHEN $2 IN ('executed', 'failed') THEN $9 ELSE finished_at END,
                updated_at = $9
            WHERE id = $1
              AND status = ANY($8)
              AND ($10::timestamptz IS NULL OR expires_at > $10)
              AND (
                  NOT $11
                  OR EXISTS (
                      SELECT 1
                      FROM jsonb_array_elements(COALESCE($3::jsonb, actions_current)) AS a
                      WHERE (a->>'enabled')::boolean
                  )
              )
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(transition.to.as_str())
        .bind(transition.actions.as_ref().map(Json))
        .bind(&transition.approved_by)
        .bind(&transition.cancel_reason)
        .bind(&transition.failure_reason)
        .bind(transition.execution_summary.map(Json))
        .bind(status_strings(&transition.from))
        .bind(transition.at)
        .bind(transition.link_valid_at)
        .bind(transition.require_enabled_action)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        if row.is_none() {
            debug!(batch_id = %id, to = %transition.to, "Batch transition not applied");
        }
        row.map(TryInto::try_into).transpose()
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<ApprovalBatch>> {
        let rows = sqlx::query_as::<_, BatchRow>(
            r#"
            SELECT * FROM approval_batches
            WHERE status = 'pending' AND expires_at < $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

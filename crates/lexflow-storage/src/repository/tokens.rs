//! Approval token repository

use crate::db::{db_err, DatabasePool};
use crate::models::{ApprovalToken, IssueToken};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lexflow_common::types::{BatchId, TokenId};
use lexflow_common::Result;
use sqlx::FromRow;
use uuid::Uuid;

/// Token repository trait
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Store the token for a batch, replacing a previous one only if it is unused.
    /// Returns `None` when the batch already has a used token.
    async fn issue(&self, input: IssueToken) -> Result<Option<ApprovalToken>>;
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<ApprovalToken>>;
    async fn get_for_batch(&self, batch_id: BatchId) -> Result<Option<ApprovalToken>>;
    /// Mark used if the secret still hashes to `token_hash` and the token is
    /// unused and unexpired at `at`; true if this call consumed it
    async fn consume(&self, id: TokenId, token_hash: &str, at: DateTime<Utc>) -> Result<bool>;
}

#[derive(FromRow)]
struct TokenRow {
    id: Uuid,
    batch_id: Uuid,
    token_hash: String,
    approver_identity: Option<String>,
    expires_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<TokenRow> for ApprovalToken {
    fn from(row: TokenRow) -> Self {
        ApprovalToken {
            id: row.id,
            batch_id: row.batch_id,
            token_hash: row.token_hash,
            approver_identity: row.approver_identity,
            expires_at: row.expires_at,
            used_at: row.used_at,
            created_at: row.created_at,
        }
    }
}

/// Database token repository
pub struct DbTokenRepository {
    pool: DatabasePool,
}

impl DbTokenRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenRepository for DbTokenRepository {
    async fn issue(&self, input: IssueToken) -> Result<Option<ApprovalToken>> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            INSERT INTO approval_tokens (
                id, batch_id, token_hash, approver_identity, expires_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (batch_id) DO UPDATE SET
                token_hash = EXCLUDED.token_hash,
                approver_identity = EXCLUDED.approver_identity,
                expires_at = EXCLUDED.expires_at,
                created_at = EXCLUDED.created_at
            WHERE approval_tokens.used_at IS NULL
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.batch_id)
        .bind(&input.token_hash)
        .bind(&input.approver_identity)
        .bind(input.expires_at)
        .bind(input.created_at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(row.map(Into::into))
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<ApprovalToken>> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT * FROM approval_tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;
        Ok(row.map(Into::into))
    }

    async fn get_for_batch(&self, batch_id: BatchId) -> Result<Option<ApprovalToken>> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT * FROM approval_tokens WHERE batch_id = $1",
        )
        .bind(batch_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;
        Ok(row.map(Into::into))
    }

    async fn consume(&self, id: TokenId, token_hash: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE approval_tokens SET used_at = $2
            WHERE id = $1 AND token_hash = $3 AND used_at IS NULL AND expires_at > $2
            "#,
        )
        .bind(id)
        .bind(at)
        .bind(token_hash)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }
}

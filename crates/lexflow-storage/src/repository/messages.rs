//! Inbound message repository

use crate::db::{db_err, DatabasePool};
use crate::models::{AttachmentMeta, InboundMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lexflow_common::types::{MessageId, ProcessingStatus, RuleId};
use lexflow_common::{Error, Result};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Result of storing a message
#[derive(Debug, Clone)]
pub enum MessageInsert {
    Inserted(InboundMessage),
    /// A message with the same `external_id` was already stored
    Duplicate(InboundMessage),
}

impl MessageInsert {
    pub fn message(&self) -> &InboundMessage {
        match self {
            MessageInsert::Inserted(m) | MessageInsert::Duplicate(m) => m,
        }
    }

    pub fn into_message(self) -> InboundMessage {
        match self {
            MessageInsert::Inserted(m) | MessageInsert::Duplicate(m) => m,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, MessageInsert::Duplicate(_))
    }
}

/// Message repository trait
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn insert(&self, message: InboundMessage) -> Result<MessageInsert>;
    async fn get(&self, id: MessageId) -> Result<Option<InboundMessage>>;
    /// Newest first
    async fn list(
        &self,
        status: Option<ProcessingStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InboundMessage>>;
    /// Update the display projection; never read back by the approval workflow
    async fn set_processing(
        &self,
        id: MessageId,
        status: ProcessingStatus,
        matched_rule_id: Option<RuleId>,
    ) -> Result<()>;
}

#[derive(FromRow)]
struct MessageRow {
    id: Uuid,
    external_id: Option<String>,
    sender_address: String,
    sender_name: Option<String>,
    subject: String,
    body_text: String,
    body_html: Option<String>,
    attachments: Json<Vec<AttachmentMeta>>,
    thread_id: Option<String>,
    metadata: serde_json::Value,
    received_at: DateTime<Utc>,
    processing_status: String,
    matched_rule_id: Option<Uuid>,
}

impl TryFrom<MessageRow> for InboundMessage {
    type Error = Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(InboundMessage {
            id: row.id,
            external_id: row.external_id,
            sender_address: row.sender_address,
            sender_name: row.sender_name,
            subject: row.subject,
            body_text: row.body_text,
            body_html: row.body_html,
            attachments: row.attachments.0,
            thread_id: row.thread_id,
            metadata: row.metadata,
            received_at: row.received_at,
            processing_status: row.processing_status.parse()?,
            matched_rule_id: row.matched_rule_id,
        })
    }
}

/// Database message repository
pub struct DbMessageRepository {
    pool: DatabasePool,
}

impl DbMessageRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn get_by_external_id(&self, external_id: &str) -> Result<Option<InboundMessage>> {
        sqlx::query_as::<_, MessageRow>("SELECT * FROM inbound_messages WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?
            .map(TryInto::try_into)
            .transpose()
    }
}

#[async_trait]
impl MessageRepository for DbMessageRepository {
    async fn insert(&self, message: InboundMessage) -> Result<MessageInsert> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO inbound_messages (
                id, external_id, sender_address, sender_name, subject, body_text,
                body_html, attachments, thread_id, metadata, received_at,
                processing_status, matched_rule_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (external_id) WHERE external_id IS NOT NULL DO NOTHING
            RETURNING *
            "#,
        )
        .bind(message.id)
        .bind(&message.external_id)
        .bind(&message.sender_address)
        .bind(&message.sender_name)
        .bind(&message.subject)
        .bind(&message.body_text)
        .bind(&message.body_html)
        .bind(Json(&message.attachments))
        .bind(&message.thread_id)
        .bind(&message.metadata)
        .bind(message.received_at)
        .bind(message.processing_status.as_str())
        .bind(message.matched_rule_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        if let Some(row) = row {
            return Ok(MessageInsert::Inserted(row.try_into()?));
        }

        let external_id = message.external_id.as_deref().unwrap_or_default();
        self.get_by_external_id(external_id)
            .await?
            .map(MessageInsert::Duplicate)
            .ok_or_else(|| Error::Internal("Conflicting message vanished".to_string()))
    }

    async fn get(&self, id: MessageId) -> Result<Option<InboundMessage>> {
        sqlx::query_as::<_, MessageRow>("SELECT * FROM inbound_messages WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn list(
        &self,
        status: Option<ProcessingStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InboundMessage>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT * FROM inbound_messages
            WHERE ($1::text IS NULL OR processing_status = $1)
            ORDER BY received_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn set_processing(
        &self,
        id: MessageId,
        status: ProcessingStatus,
        matched_rule_id: Option<RuleId>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE inbound_messages
            SET processing_status = $2, matched_rule_id = COALESCE($3, matched_rule_id)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(matched_rule_id)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

//! Inbound message handlers

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use lexflow_common::types::{Paginated, ProcessingStatus};
use lexflow_common::Error;
use lexflow_core::ProcessOutcome;
use lexflow_storage::models::{InboundMessage, NewMessage};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::page;
use crate::auth::AppState;
use crate::error::ApiError;

/// Query parameters for listing messages
#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub status: Option<ProcessingStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// List messages, newest first
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<Paginated<InboundMessage>>, ApiError> {
    let (limit, offset) = page(query.limit, query.offset);
    let data = state.messages.list(query.status, limit, offset).await?;
    Ok(Json(Paginated {
        data,
        limit,
        offset,
    }))
}

/// Get a message by ID
pub async fn get_message(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<Uuid>,
) -> Result<Json<InboundMessage>, ApiError> {
    let message = state
        .messages
        .get(message_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Message {} not found", message_id)))?;
    Ok(Json(message))
}

fn outcome_status(outcome: &ProcessOutcome) -> StatusCode {
    match outcome {
        ProcessOutcome::Duplicate { .. } => StatusCode::OK,
        _ => StatusCode::ACCEPTED,
    }
}

/// Submit a structured message to the pipeline
pub async fn submit_message(
    State(state): State<Arc<AppState>>,
    Json(input): Json<NewMessage>,
) -> Result<(StatusCode, Json<ProcessOutcome>), ApiError> {
    if input.sender_address.trim().is_empty() {
        return Err(ApiError::bad_request("sender_address is required"));
    }
    let outcome = state.processor.ingest(input).await?;
    info!(outcome = ?outcome, "Message submitted");
    Ok((outcome_status(&outcome), Json(outcome)))
}

/// Submit a raw RFC 822 message to the pipeline
pub async fn submit_raw_message(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<ProcessOutcome>), ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("Empty message body"));
    }
    let outcome = state.processor.ingest_raw(&body).await?;
    info!(outcome = ?outcome, "Raw message submitted");
    Ok((outcome_status(&outcome), Json(outcome)))
}

//! Approval batch handlers

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use lexflow_common::types::{BatchId, BatchStatus, MessageId, Paginated};
use lexflow_core::ApprovalOutcome;
use lexflow_storage::models::{Action, ApprovalBatch, ExecutionLogEntry};
use lexflow_storage::repository::BatchFilter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::page;
use crate::auth::{AppState, AuthContext};
use crate::error::ApiError;

/// Query parameters for listing batches
#[derive(Debug, Deserialize)]
pub struct ListBatchesQuery {
    pub status: Option<BatchStatus>,
    pub message_id: Option<MessageId>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Replacement action snapshot
#[derive(Debug, Deserialize)]
pub struct UpdateActionsRequest {
    pub actions: Vec<Action>,
}

/// Approval request; `actions`, when present, replaces the snapshot first
#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    pub actions: Option<Vec<Action>>,
}

/// Cancellation request
#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

/// Reissued quick-approval link
#[derive(Debug, Serialize)]
pub struct ReissueResponse {
    pub batch_id: BatchId,
    pub approve_url: String,
    pub expires_at: DateTime<Utc>,
}

/// List batches, newest first
pub async fn list_batches(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListBatchesQuery>,
) -> Result<Json<Paginated<ApprovalBatch>>, ApiError> {
    let (limit, offset) = page(query.limit, query.offset);
    let filter = BatchFilter {
        status: query.status,
        message_id: query.message_id,
    };
    let data = state.approvals.list_batches(filter, limit, offset).await?;
    Ok(Json(Paginated {
        data,
        limit,
        offset,
    }))
}

/// Get a batch by ID
pub async fn get_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<BatchId>,
) -> Result<Json<ApprovalBatch>, ApiError> {
    Ok(Json(state.approvals.get_batch(batch_id).await?))
}

/// Edit the action snapshot of an open batch
pub async fn update_actions(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<BatchId>,
    Json(req): Json<UpdateActionsRequest>,
) -> Result<Json<ApprovalBatch>, ApiError> {
    Ok(Json(
        state.approvals.update_actions(batch_id, req.actions).await?,
    ))
}

/// Approve and execute a batch
pub async fn approve_batch(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(batch_id): Path<BatchId>,
    body: Option<Json<ApproveRequest>>,
) -> Result<Json<ApprovalOutcome>, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let outcome = state
        .approvals
        .approve(batch_id, req.actions, Some(auth.identity))
        .await?;
    Ok(Json(outcome))
}

/// Cancel an open batch
pub async fn cancel_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<BatchId>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<ApprovalBatch>, ApiError> {
    Ok(Json(state.approvals.cancel(batch_id, &req.reason).await?))
}

/// Rotate the quick-approval link and resend the request
pub async fn reissue_token(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<BatchId>,
) -> Result<Json<ReissueResponse>, ApiError> {
    let issued = state.approvals.reissue_token(batch_id).await?;
    Ok(Json(ReissueResponse {
        batch_id,
        approve_url: state.approvals.links().approve_url(&issued.token),
        expires_at: issued.expires_at,
    }))
}

/// Per-action execution log of a batch
pub async fn execution_log(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<BatchId>,
) -> Result<Json<Vec<ExecutionLogEntry>>, ApiError> {
    Ok(Json(state.approvals.execution_log(batch_id).await?))
}

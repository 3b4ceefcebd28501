//! Quick-approval link handlers
//!
//! These routes sit outside API key authentication; the token is the
//! credential.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use lexflow_common::types::BatchId;
use lexflow_core::TokenPreview;
use lexflow_storage::models::ExecutionSummary;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::auth::AppState;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct PreviewQuery {
    pub approver: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PublicApproveRequest {
    pub approver_identity: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PublicApproveResponse {
    pub success: bool,
    pub batch_id: BatchId,
    pub execution_summary: ExecutionSummary,
}

/// Show what the link would approve without using it
pub async fn preview(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<TokenPreview>, ApiError> {
    let preview = state
        .approvals
        .preview_token(&token, query.approver.as_deref())
        .await?;
    Ok(Json(preview))
}

/// Consume the link and execute the batch
pub async fn approve(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    body: Option<Json<PublicApproveRequest>>,
) -> Result<Json<PublicApproveResponse>, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let outcome = state
        .approvals
        .approve_via_token(&token, req.approver_identity.as_deref())
        .await?;

    info!(batch_id = %outcome.batch.id, success = outcome.success, "Quick-link approval handled");
    Ok(Json(PublicApproveResponse {
        success: outcome.success,
        batch_id: outcome.batch.id,
        execution_summary: outcome.summary,
    }))
}

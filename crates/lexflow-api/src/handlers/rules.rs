//! Rule handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use lexflow_core::RuleWithWarnings;
use lexflow_storage::models::{AutomationRule, RuleInput};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AppState;
use crate::error::ApiError;

/// List all rules
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AutomationRule>>, ApiError> {
    Ok(Json(state.rules.list().await?))
}

/// Create a rule; the response carries any validation warnings
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(input): Json<RuleInput>,
) -> Result<(StatusCode, Json<RuleWithWarnings>), ApiError> {
    let saved = state.rules.create(input).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

/// Get a rule by ID
pub async fn get_rule(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<Uuid>,
) -> Result<Json<AutomationRule>, ApiError> {
    Ok(Json(state.rules.get(rule_id).await?))
}

/// Replace a rule
pub async fn update_rule(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<Uuid>,
    Json(input): Json<RuleInput>,
) -> Result<Json<RuleWithWarnings>, ApiError> {
    Ok(Json(state.rules.update(rule_id, input).await?))
}

/// Delete a rule
pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.rules.delete(rule_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Enable a rule
pub async fn enable_rule(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<Uuid>,
) -> Result<Json<AutomationRule>, ApiError> {
    Ok(Json(state.rules.enable(rule_id).await?))
}

/// Disable a rule
pub async fn disable_rule(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<Uuid>,
) -> Result<Json<AutomationRule>, ApiError> {
    Ok(Json(state.rules.disable(rule_id).await?))
}

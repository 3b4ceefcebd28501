//! Rule simulation handler

use axum::{extract::State, Json};
use lexflow_common::types::{MessageId, RuleId};
use lexflow_core::SimulationReport;
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct SimulateRequest {
    pub message_id: MessageId,
    pub rule_id: RuleId,
}

/// Dry-run a rule against a stored message
pub async fn simulate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SimulateRequest>,
) -> Result<Json<SimulationReport>, ApiError> {
    Ok(Json(
        state.simulator.simulate(req.message_id, req.rule_id).await?,
    ))
}

//! API error responses
//!
//! Every failure is rendered as JSON `{code, message}`. Refusals on the
//! quick-approval link also carry `batch_id`, `status` and `edit_url` so
//! the page can send the approver to the right place.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lexflow_common::types::{BatchId, BatchStatus};
use lexflow_core::{ApprovalError, TokenError, TokenErrorCode};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// JSON error body
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BatchStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_url: Option<String>,
}

/// API error
#[derive(Debug, Error)]
#[error("{}: {}", body.code, body.message)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: message.into(),
                batch_id: None,
                status: None,
                edit_url: None,
            },
        }
    }

    pub fn unauthorized(message: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "AUTH_ERROR", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<lexflow_common::Error> for ApiError {
    fn from(e: lexflow_common::Error) -> Self {
        let status =
            StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(code = e.code(), error = %e, "Request failed");
        }
        Self::new(status, e.code(), e.to_string())
    }
}

fn token_status(code: TokenErrorCode) -> StatusCode {
    match code {
        TokenErrorCode::InvalidToken => StatusCode::NOT_FOUND,
        TokenErrorCode::TokenAlreadyUsed | TokenErrorCode::AlreadyProcessed => StatusCode::CONFLICT,
        TokenErrorCode::BatchExpired | TokenErrorCode::TokenExpired => StatusCode::GONE,
        TokenErrorCode::ApproverMismatch => StatusCode::FORBIDDEN,
        TokenErrorCode::NoEnabledActions => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        Self {
            status: token_status(e.code),
            body: ErrorBody {
                code: e.code.as_str().to_string(),
                message: e.message,
                batch_id: e.batch_id,
                status: e.status,
                edit_url: e.edit_url,
            },
        }
    }
}

impl From<ApprovalError> for ApiError {
    fn from(e: ApprovalError) -> Self {
        let status = match &e {
            ApprovalError::NotFound(_) => StatusCode::NOT_FOUND,
            ApprovalError::NotOpen { .. } | ApprovalError::AlreadyProcessed { .. } => {
                StatusCode::CONFLICT
            }
            ApprovalError::NoEnabledActions | ApprovalError::Invalid(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApprovalError::Token(token) => return token.clone().into(),
            ApprovalError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let code = e.code();
        let message = e.to_string();
        match e {
            ApprovalError::Storage(storage) => storage.into(),
            ApprovalError::NotOpen { status: current }
            | ApprovalError::AlreadyProcessed { status: current } => {
                let mut err = Self::new(status, code, message);
                err.body.status = Some(current);
                err
            }
            _ => Self::new(status, code, message),
        }
    }
}

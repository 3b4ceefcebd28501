//! Approval batches: state machine, tokens and expiry

mod manager;
mod sweeper;
mod token;

pub use manager::{ApprovalManager, ApprovalOutcome};
pub use sweeper::ExpirySweeper;
pub use token::{IssuedToken, TokenPreview, TokenService, ValidatedToken};

use lexflow_common::types::{BatchId, BatchStatus};
use serde::Serialize;
use thiserror::Error;

/// Why a quick-approval token was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenErrorCode {
    InvalidToken,
    BatchExpired,
    TokenExpired,
    TokenAlreadyUsed,
    AlreadyProcessed,
    ApproverMismatch,
    NoEnabledActions,
}

impl TokenErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenErrorCode::InvalidToken => "INVALID_TOKEN",
            TokenErrorCode::BatchExpired => "BATCH_EXPIRED",
            TokenErrorCode::TokenExpired => "TOKEN_EXPIRED",
            TokenErrorCode::TokenAlreadyUsed => "TOKEN_ALREADY_USED",
            TokenErrorCode::AlreadyProcessed => "ALREADY_PROCESSED",
            TokenErrorCode::ApproverMismatch => "APPROVER_MISMATCH",
            TokenErrorCode::NoEnabledActions => "NO_ENABLED_ACTIONS",
        }
    }

    /// Default explanation shown on the public approval page
    fn message(&self) -> &'static str {
        match self {
            TokenErrorCode::InvalidToken => {
                "This approval link is not valid. Please contact support if you followed it from an email."
            }
            TokenErrorCode::BatchExpired => {
                "This approval link has expired. Open the batch to review and approve it manually."
            }
            TokenErrorCode::TokenExpired => {
                "This approval link has expired. Open the batch to review and approve it manually."
            }
            TokenErrorCode::TokenAlreadyUsed => {
                "This approval link has already been used. Check the approval queue for the result."
            }
            TokenErrorCode::AlreadyProcessed => {
                "These actions were already handled. Check the approval queue for the result."
            }
            TokenErrorCode::ApproverMismatch => {
                "This approval link was issued to a different approver."
            }
            TokenErrorCode::NoEnabledActions => {
                "No action is selected in this batch. Open the batch to choose what to execute."
            }
        }
    }
}

impl std::fmt::Display for TokenErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured refusal from the public approval path
#[derive(Debug, Clone, Error, Serialize)]
#[error("{code}: {message}")]
pub struct TokenError {
    pub code: TokenErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    /// Current batch status, for ALREADY_PROCESSED
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BatchStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_url: Option<String>,
}

impl TokenError {
    pub fn new(code: TokenErrorCode) -> Self {
        Self {
            code,
            message: code.message().to_string(),
            batch_id: None,
            status: None,
            edit_url: None,
        }
    }

    pub fn for_batch(code: TokenErrorCode, batch_id: BatchId) -> Self {
        Self {
            batch_id: Some(batch_id),
            ..Self::new(code)
        }
    }

    pub fn with_status(mut self, status: BatchStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Errors from batch operations
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("Batch not found: {0}")]
    NotFound(BatchId),

    #[error("Batch is {status} and can no longer be changed")]
    NotOpen { status: BatchStatus },

    #[error("Batch was already processed (status {status})")]
    AlreadyProcessed { status: BatchStatus },

    #[error("Batch has no enabled actions")]
    NoEnabledActions,

    #[error("Invalid actions: {0}")]
    Invalid(String),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Storage(#[from] lexflow_common::Error),
}

impl ApprovalError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            ApprovalError::NotFound(_) => "NOT_FOUND",
            ApprovalError::NotOpen { .. } => "BATCH_NOT_OPEN",
            ApprovalError::AlreadyProcessed { .. } => "ALREADY_PROCESSED",
            ApprovalError::NoEnabledActions => "NO_ENABLED_ACTIONS",
            ApprovalError::Invalid(_) => "VALIDATION_ERROR",
            ApprovalError::Token(e) => e.code.as_str(),
            ApprovalError::Storage(e) => e.code(),
        }
    }
}

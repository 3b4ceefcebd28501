//! Quick-approval tokens
//!
//! The raw secret only ever leaves this module inside the approval link;
//! storage sees its SHA-256 digest.

use super::{ApprovalError, TokenError, TokenErrorCode};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use lexflow_common::types::{BatchId, BatchStatus};
use lexflow_common::Error;
use lexflow_storage::models::{Action, ApprovalBatch, ApprovalToken, IssueToken};
use lexflow_storage::repository::{BatchRepository, TokenRepository};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

/// A freshly issued token; `token` is the raw secret for the link
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// A token that passed every check, with the batch it authorizes
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    pub token: ApprovalToken,
    pub batch: ApprovalBatch,
}

/// What a quick-approval link would do, without using it
#[derive(Debug, Clone, Serialize)]
pub struct TokenPreview {
    pub batch_id: BatchId,
    pub rule_name: String,
    pub mail_subject: String,
    pub mail_from: String,
    pub expires_at: DateTime<Utc>,
    pub actions: Vec<Action>,
    pub edit_url: String,
}

/// Token Service
pub struct TokenService {
    tokens: Arc<dyn TokenRepository>,
    batches: Arc<dyn BatchRepository>,
    token_bytes: usize,
}

impl TokenService {
    pub fn new(
        tokens: Arc<dyn TokenRepository>,
        batches: Arc<dyn BatchRepository>,
        token_bytes: usize,
    ) -> Self {
        Self {
            tokens,
            batches,
            token_bytes: token_bytes.max(16),
        }
    }

    /// SHA-256 hex digest of a raw token
    pub fn hash(raw: &str) -> String {
        hex::encode(Sha256::digest(raw.as_bytes()))
    }

    fn generate(&self) -> String {
        let mut bytes = vec![0u8; self.token_bytes];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Issue (or rotate) the token for a pending batch.
    ///
    /// The token expires with the batch link. A batch whose token was
    /// already used cannot get a new one.
    pub async fn issue(
        &self,
        batch: &ApprovalBatch,
        approver_identity: Option<String>,
    ) -> Result<IssuedToken, ApprovalError> {
        if batch.status != BatchStatus::Pending {
            return Err(ApprovalError::NotOpen {
                status: batch.status,
            });
        }

        let token = self.generate();
        let issued = self
            .tokens
            .issue(IssueToken {
                batch_id: batch.id,
                token_hash: Self::hash(&token),
                approver_identity,
                expires_at: batch.expires_at,
                created_at: Utc::now(),
            })
            .await?
            .ok_or_else(|| {
                Error::Conflict(format!("Token for batch {} was already used", batch.id))
            })?;

        debug!(batch_id = %batch.id, token_id = %issued.id, "Approval token issued");
        Ok(IssuedToken {
            token,
            expires_at: issued.expires_at,
        })
    }

    /// Whether a link was ever issued for the batch
    pub async fn has_token(&self, batch_id: BatchId) -> Result<bool, ApprovalError> {
        Ok(self.tokens.get_for_batch(batch_id).await?.is_some())
    }

    /// Run every check on a raw token without consuming it.
    ///
    /// Checks run in a fixed order so the caller always gets the most
    /// specific refusal: unknown, used, batch state, expiry, approver.
    pub async fn validate(
        &self,
        raw: &str,
        presenter: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ValidatedToken, ApprovalError> {
        let Some(token) = self.tokens.find_by_hash(&Self::hash(raw)).await? else {
            return Err(TokenError::new(TokenErrorCode::InvalidToken).into());
        };
        let batch_id = token.batch_id;

        if token.used_at.is_some() {
            return Err(TokenError::for_batch(TokenErrorCode::TokenAlreadyUsed, batch_id).into());
        }

        let Some(batch) = self.batches.get(batch_id).await? else {
            return Err(TokenError::new(TokenErrorCode::InvalidToken).into());
        };

        match batch.status {
            BatchStatus::Pending => {}
            BatchStatus::Expired => {
                return Err(TokenError::for_batch(TokenErrorCode::BatchExpired, batch_id)
                    .with_status(batch.status)
                    .into());
            }
            status => {
                return Err(TokenError::for_batch(TokenErrorCode::AlreadyProcessed, batch_id)
                    .with_status(status)
                    .into());
            }
        }

        if batch.link_expired(now) {
            return Err(TokenError::for_batch(TokenErrorCode::BatchExpired, batch_id).into());
        }
        if now >= token.expires_at {
            return Err(TokenError::for_batch(TokenErrorCode::TokenExpired, batch_id).into());
        }

        if let Some(bound) = token.approver_identity.as_deref() {
            let matches = presenter
                .map(|p| p.trim().eq_ignore_ascii_case(bound.trim()))
                .unwrap_or(false);
            if !matches {
                return Err(TokenError::for_batch(TokenErrorCode::ApproverMismatch, batch_id).into());
            }
        }

        if batch.enabled_action_count() == 0 {
            return Err(TokenError::for_batch(TokenErrorCode::NoEnabledActions, batch_id).into());
        }

        Ok(ValidatedToken { token, batch })
    }

    /// Validate and atomically mark the token used.
    ///
    /// Of several concurrent calls with the same token, one succeeds and the
    /// others get `TOKEN_ALREADY_USED`.
    pub async fn validate_and_consume(
        &self,
        raw: &str,
        presenter: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ValidatedToken, ApprovalError> {
        let validated = self.validate(raw, presenter, now).await?;

        if self
            .tokens
            .consume(validated.token.id, &validated.token.token_hash, now)
            .await?
        {
            info!(batch_id = %validated.batch.id, "Approval token consumed");
            let mut token = validated.token;
            token.used_at = Some(now);
            return Ok(ValidatedToken {
                token,
                batch: validated.batch,
            });
        }

        let batch_id = validated.batch.id;
        let code = match self.tokens.find_by_hash(&validated.token.token_hash).await? {
            Some(current) if current.used_at.is_some() => TokenErrorCode::TokenAlreadyUsed,
            Some(_) => TokenErrorCode::TokenExpired,
            // Rotated between validation and consumption
            None => TokenErrorCode::InvalidToken,
        };
        info!(batch_id = %batch_id, code = %code, "Token consumption refused");
        Err(TokenError::for_batch(code, batch_id).into())
    }
}

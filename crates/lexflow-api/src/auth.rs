//! Authentication module

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use lexflow_common::config::ApiKeyConfig;
use lexflow_core::{ApprovalManager, MailProcessor, RuleStore, Simulator};
use lexflow_storage::repository::MessageRepository;
use lexflow_storage::Database;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ApiError;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub approvals: Arc<ApprovalManager>,
    pub rules: Arc<RuleStore>,
    pub processor: Arc<MailProcessor>,
    pub simulator: Arc<Simulator>,
    pub messages: Arc<dyn MessageRepository>,
    pub database: Arc<dyn Database>,
    pub api_keys: Vec<ApiKeyConfig>,
}

/// Authenticated operator
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Name of the API key used
    pub key_name: String,
    /// Operator identity recorded as `approved_by`
    pub identity: String,
}

/// Extract API key from request
pub fn extract_api_key(req: &Request) -> Option<&str> {
    // Check Authorization header
    if let Some(auth) = req.headers().get("authorization") {
        if let Ok(auth_str) = auth.to_str() {
            if let Some(key) = auth_str.strip_prefix("Bearer ") {
                return Some(key.trim());
            }
        }
    }

    // Check X-API-Key header
    if let Some(key) = req.headers().get("x-api-key") {
        if let Ok(key_str) = key.to_str() {
            return Some(key_str.trim());
        }
    }

    None
}

/// Hash an API key for comparison
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Find the configured key matching a presented raw key
fn validate_api_key<'a>(keys: &'a [ApiKeyConfig], api_key: &str) -> Option<&'a ApiKeyConfig> {
    let hash = hash_api_key(api_key);
    keys.iter()
        .find(|k| k.key_sha256.eq_ignore_ascii_case(&hash))
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let api_key = extract_api_key(&request).ok_or_else(|| {
        warn!("Missing API key in request to {}", request.uri().path());
        ApiError::unauthorized("Missing API key")
    })?;

    let key = validate_api_key(&state.api_keys, api_key).ok_or_else(|| {
        warn!("Invalid API key in request to {}", request.uri().path());
        ApiError::unauthorized("Invalid API key")
    })?;

    debug!(key = %key.name, identity = %key.identity, "API key authenticated");

    let auth_context = AuthContext {
        key_name: key.name.clone(),
        identity: key.identity.clone(),
    };
    request.extensions_mut().insert(auth_context);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_api_key() {
        let keys = vec![ApiKeyConfig {
            name: "intake".to_string(),
            key_sha256: hash_api_key("lf_test_key").to_uppercase(),
            identity: "partner@firm.example".to_string(),
        }];

        let key = validate_api_key(&keys, "lf_test_key").unwrap();
        assert_eq!(key.identity, "partner@firm.example");
        assert!(validate_api_key(&keys, "wrong_key").is_none());
    }
}

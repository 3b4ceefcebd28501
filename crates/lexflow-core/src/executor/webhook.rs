//! Webhook action handler
//!
//! Posts the action as JSON to the configured target. Requests carry an
//! `Idempotency-Key` of `<batch_id>:<position>`, so repeating one is safe,
//! and an HMAC-SHA256 `X-Lexflow-Signature` when a secret is configured.

use super::handler::{ActionHandler, ActionRequest, HandlerOutcome};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use lexflow_common::config::WebhookTargetConfig;
use lexflow_common::types::ActionType;
use lexflow_common::{Error, Result};
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

#[derive(Serialize)]
struct WebhookPayload {
    batch_id: uuid::Uuid,
    position: usize,
    action_type: ActionType,
    idempotency_key: String,
    config: serde_json::Value,
}

/// Handler for one action kind delivered to an HTTP target
pub struct WebhookActionHandler {
    action_type: ActionType,
    endpoint: Url,
    secret: Option<String>,
    client: Client,
}

impl WebhookActionHandler {
    pub fn new(action_type: ActionType, target: &WebhookTargetConfig) -> Result<Self> {
        let endpoint = Url::parse(&target.endpoint)
            .map_err(|e| Error::Config(format!("Invalid endpoint for {}: {}", action_type, e)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "Endpoint for {} must use http or https",
                action_type
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            action_type,
            endpoint,
            secret: target.secret.clone().filter(|s| !s.is_empty()),
            client,
        })
    }

    fn sign(&self, body: &[u8]) -> Option<String> {
        let secret = self.secret.as_ref()?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
        mac.update(body);
        Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
    }
}

#[async_trait]
impl ActionHandler for WebhookActionHandler {
    fn action_type(&self) -> ActionType {
        self.action_type
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    async fn execute(&self, request: ActionRequest<'_>) -> HandlerOutcome {
        let payload = WebhookPayload {
            batch_id: request.batch_id,
            position: request.position,
            action_type: self.action_type,
            idempotency_key: request.idempotency_key(),
            config: request.config.to_value(),
        };
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(e) => return HandlerOutcome::failed(format!("cannot encode payload: {}", e)),
        };

        let mut http_request = self
            .client
            .post(self.endpoint.clone())
            .header("Content-Type", "application/json")
            .header("Idempotency-Key", request.idempotency_key());
        if let Some(signature) = self.sign(&body) {
            http_request = http_request.header("X-Lexflow-Signature", signature);
        }

        let response = match http_request.body(body).send().await {
            Ok(response) => response,
            Err(e) => {
                return HandlerOutcome::Failed {
                    error: format!("request failed: {}", e),
                    retryable: e.is_timeout() || e.is_connect(),
                }
            }
        };

        let status = response.status();
        debug!(action_type = %self.action_type, %status, "Webhook target responded");

        if status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let data = serde_json::from_str::<serde_json::Value>(&body).unwrap_or(serde_json::Value::Null);
            return HandlerOutcome::Success(serde_json::json!({
                "status": status.as_u16(),
                "response": data,
            }));
        }

        HandlerOutcome::Failed {
            error: format!("target returned status {}", status),
            retryable: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

use super::*;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use lexflow_common::config::{ApiKeyConfig, ExecutorConfig};
use lexflow_common::types::ActionType;
use lexflow_core::executor::ActionRequest;
use lexflow_core::{
    ActionExecutor, ActionHandler, ApprovalManager, HandlerOutcome, HandlerRegistry, Links,
    MailProcessor, MemoryCaseDirectory, RuleStore, Simulator, TokenService,
};
use lexflow_storage::models::{
    Action, ActionConfig, BillingConfig, CreateBatch, NewMessage,
};
use lexflow_storage::repository::{BatchRepository, MessageRepository};
use lexflow_storage::MemoryStore;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tower::util::ServiceExt;

const API_KEY: &str = "lf_test_key";

#[derive(Default)]
struct CountingBilling {
    calls: AtomicU32,
}

#[async_trait]
impl ActionHandler for CountingBilling {
    fn action_type(&self) -> ActionType {
        ActionType::Billing
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    async fn execute(&self, _request: ActionRequest<'_>) -> HandlerOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        HandlerOutcome::Success(json!({ "entry_id": "TE-1" }))
    }
}

struct TestApp {
    router: Router,
    store: MemoryStore,
    tokens: Arc<TokenService>,
    billing: Arc<CountingBilling>,
}

fn app() -> TestApp {
    let store = MemoryStore::new();
    let billing = Arc::new(CountingBilling::default());
    let mut registry = HandlerRegistry::new();
    registry.register(billing.clone());
    let executor = Arc::new(ActionExecutor::new(
        Arc::new(registry),
        &ExecutorConfig {
            max_retries: 0,
            retry_backoff_ms: 1,
            handler_timeout_secs: 5,
        },
    ));
    let tokens = Arc::new(TokenService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        32,
    ));
    let directory = Arc::new(MemoryCaseDirectory::default());

    let approvals = ApprovalManager::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        tokens.clone(),
        executor.clone(),
        Links::new("https://firm.example"),
    );
    let processor = MailProcessor::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        directory.clone(),
        tokens.clone(),
        60,
    );
    let simulator = Simulator::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        directory,
        executor,
    );

    let state = Arc::new(AppState {
        approvals: Arc::new(approvals),
        rules: Arc::new(RuleStore::new(Arc::new(store.clone()))),
        processor: Arc::new(processor),
        simulator: Arc::new(simulator),
        messages: Arc::new(store.clone()),
        database: Arc::new(store.clone()),
        api_keys: vec![ApiKeyConfig {
            name: "test".to_string(),
            key_sha256: auth::hash_api_key(API_KEY),
            identity: "operator@firm.example".to_string(),
        }],
    });

    TestApp {
        router: create_router(state, &[]),
        store,
        tokens,
        billing,
    }
}

impl TestApp {
    async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        authed: bool,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if authed {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", API_KEY));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn court_rule(&self) {
        let (status, _) = self
            .send(
                Method::POST,
                "/api/v1/rules",
                Some(json!({
                    "name": "Court notices",
                    "catch_config": { "senders": ["@court.gov"] },
                    "map_config": [
                        { "source": "body", "anchor_text": "Case No.", "target_field": "Case_No" }
                    ],
                    "action_bundle": [
                        {
                            "action_type": "billing",
                            "config": { "hours": 0.2, "description": "Review notice {Case_No}" }
                        }
                    ]
                })),
                true,
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    async fn submit_court_mail(&self) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/v1/messages",
                Some(json!({
                    "sender_address": "clerk@court.gov",
                    "subject": "Hearing set",
                    "body_text": "Case No. 2024-117\nHearing on 2024-09-01"
                })),
                true,
            )
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["outcome"], "batch_created");
        body["batch_id"].as_str().unwrap().to_string()
    }

    /// Rotate the link so the test learns the raw token
    async fn fresh_token(&self, batch_id: &str) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                &format!("/api/v1/batches/{}/token", batch_id),
                None,
                true,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let url = body["approve_url"].as_str().unwrap();
        url.rsplit('/').next().unwrap().to_string()
    }
}

#[tokio::test]
async fn test_health_needs_no_key() {
    let app = app();

    let (status, body) = app.send(Method::GET, "/health", None, false).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, _) = app.send(Method::GET, "/health/ready", None, false).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_api_requires_key() {
    let app = app();

    let (status, body) = app.send(Method::GET, "/api/v1/rules", None, false).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTH_ERROR");

    let (status, _) = app.send(Method::GET, "/api/v1/rules", None, true).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_create_rule_reports_warnings() {
    let app = app();

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/rules",
            Some(json!({
                "name": "Everything",
                "catch_config": { "match_all": true },
                "action_bundle": [
                    {
                        "action_type": "create_alert",
                        "config": { "message": "New mail for {Opposing_Counsel}" }
                    }
                ]
            })),
            true,
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    let kinds: Vec<&str> = body["warnings"]
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["matches_everything", "unknown_placeholder"]);
}

#[tokio::test]
async fn test_invalid_rule_rejected() {
    let app = app();

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/rules",
            Some(json!({ "name": "  " })),
            true,
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_quick_link_approves_once() {
    let app = app();
    app.court_rule().await;
    let batch_id = app.submit_court_mail().await;
    let token = app.fresh_token(&batch_id).await;

    let (status, preview) = app
        .send(Method::GET, &format!("/public/approve/{}", token), None, false)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["actions"][0]["config"]["description"], "Review notice 2024-117");

    let (status, body) = app
        .send(Method::POST, &format!("/public/approve/{}", token), None, false)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(
        body["execution_summary"],
        json!({ "total": 1, "success": 1, "failed": 0, "skipped": 0 })
    );

    let (status, body) = app
        .send(Method::POST, &format!("/public/approve/{}", token), None, false)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "TOKEN_ALREADY_USED");
    assert_eq!(
        body["edit_url"],
        format!("https://firm.example/batches/{}", batch_id)
    );
    assert_eq!(app.billing.calls.load(Ordering::SeqCst), 1);

    let (status, log) = app
        .send(Method::GET, &format!("/api/v1/batches/{}/log", batch_id), None, true)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(log.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_expired_link_falls_back_to_operator() {
    let app = app();
    let now = Utc::now();
    let message = NewMessage {
        sender_address: "clerk@court.gov".to_string(),
        subject: "Hearing set".to_string(),
        body_text: "Case No. 2024-117".to_string(),
        ..Default::default()
    }
    .into_message(now);
    let message_id = message.id;
    MessageRepository::insert(&app.store, message).await.unwrap();
    let batch = BatchRepository::create(
        &app.store,
        CreateBatch {
            message_id,
            rule_id: uuid::Uuid::new_v4(),
            rule_name: "Court notices".to_string(),
            mail_subject: "Hearing set".to_string(),
            mail_from: "clerk@court.gov".to_string(),
            actions: vec![Action::new(ActionConfig::Billing(BillingConfig {
                hours: 0.2,
                rate: None,
                description: "Review notice".to_string(),
            }))],
            expires_at: now - Duration::minutes(5),
            approver_identity: None,
            created_at: now - Duration::hours(1),
        },
    )
    .await
    .unwrap()
    .into_batch();
    let issued = app.tokens.issue(&batch, None).await.unwrap();

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/public/approve/{}", issued.token),
            None,
            false,
        )
        .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["code"], "BATCH_EXPIRED");

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/v1/batches/{}/approve", batch.id),
            None,
            true,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["batch"]["status"], "executed");
    assert_eq!(body["batch"]["approved_by"], "operator@firm.example");
}

#[tokio::test]
async fn test_unknown_token() {
    let app = app();

    let (status, body) = app
        .send(Method::POST, "/public/approve/not-a-token", None, false)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn test_cancel_then_approve_conflicts() {
    let app = app();
    app.court_rule().await;
    let batch_id = app.submit_court_mail().await;

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/v1/batches/{}/cancel", batch_id),
            Some(json!({ "reason": "" })),
            true,
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/v1/batches/{}/cancel", batch_id),
            Some(json!({ "reason": "Handled by phone" })),
            true,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/v1/batches/{}/approve", batch_id),
            None,
            true,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "cancelled");
    assert_eq!(app.billing.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_disabled_actions_refused() {
    let app = app();
    app.court_rule().await;
    let batch_id = app.submit_court_mail().await;

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/v1/batches/{}/approve", batch_id),
            Some(json!({
                "actions": [
                    {
                        "action_type": "billing",
                        "enabled": false,
                        "config": { "hours": 0.2, "description": "Review notice" }
                    }
                ]
            })),
            true,
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "NO_ENABLED_ACTIONS");

    let (_, batch) = app
        .send(Method::GET, &format!("/api/v1/batches/{}", batch_id), None, true)
        .await;
    assert_eq!(batch["status"], "pending");
}

#[tokio::test]
async fn test_raw_mail_and_duplicate() {
    let app = app();
    app.court_rule().await;
    let raw = "Message-ID: <n-1@court.gov>\r\nFrom: Clerk <clerk@court.gov>\r\nSubject: Hearing set\r\n\r\nCase No. 2024-117\r\n";

    let request = || {
        Request::builder()
            .method(Method::POST)
            .uri("/api/v1/messages/raw")
            .header(header::AUTHORIZATION, format!("Bearer {}", API_KEY))
            .body(Body::from(raw))
            .unwrap()
    };

    let response = app.router.clone().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = app.router.clone().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["outcome"], "duplicate");

    let (status, list) = app
        .send(Method::GET, "/api/v1/messages?limit=10", None, true)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["data"].as_array().unwrap().len(), 1);
    assert_eq!(list["data"][0]["processing_status"], "awaiting_approval");
}

#[tokio::test]
async fn test_simulate_rule() {
    let app = app();
    app.court_rule().await;
    let (_, rules) = app.send(Method::GET, "/api/v1/rules", None, true).await;
    let rule_id = rules[0]["id"].as_str().unwrap().to_string();

    let message = NewMessage {
        sender_address: "clerk@court.gov".to_string(),
        subject: "Hearing set".to_string(),
        body_text: "Case No. 2024-117".to_string(),
        ..Default::default()
    }
    .into_message(Utc::now());
    let message_id = message.id;
    MessageRepository::insert(&app.store, message).await.unwrap();

    let (status, report) = app
        .send(
            Method::POST,
            "/api/v1/simulate",
            Some(json!({ "message_id": message_id, "rule_id": rule_id })),
            true,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["matched"], true);
    assert_eq!(report["extracted_fields"]["Case_No"], "2024-117");
    assert_eq!(app.billing.calls.load(Ordering::SeqCst), 0);
}

//! API routes

use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::auth::{auth_middleware, AppState};
use crate::handlers::{batches, health, messages, public, rules, simulate};

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();
    layer.allow_origin(allowed)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    // Health check routes (no auth required)
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .with_state(state.clone());

    // Quick-approval links (the token is the credential)
    let public_routes = Router::new()
        .route("/approve/:token", get(public::preview).post(public::approve))
        .with_state(state.clone());

    // Rule routes
    let rule_routes = Router::new()
        .route("/", get(rules::list_rules).post(rules::create_rule))
        .route(
            "/:id",
            get(rules::get_rule)
                .put(rules::update_rule)
                .delete(rules::delete_rule),
        )
        .route("/:id/enable", post(rules::enable_rule))
        .route("/:id/disable", post(rules::disable_rule));

    // Message routes
    let message_routes = Router::new()
        .route("/", get(messages::list_messages).post(messages::submit_message))
        .route("/raw", post(messages::submit_raw_message))
        .route("/:id", get(messages::get_message));

    // Batch routes
    let batch_routes = Router::new()
        .route("/", get(batches::list_batches))
        .route("/:id", get(batches::get_batch))
        .route("/:id/actions", put(batches::update_actions))
        .route("/:id/approve", post(batches::approve_batch))
        .route("/:id/cancel", post(batches::cancel_batch))
        .route("/:id/token", post(batches::reissue_token))
        .route("/:id/log", get(batches::execution_log));

    // API v1 routes with authentication
    let api_v1 = Router::new()
        .nest("/rules", rule_routes)
        .nest("/messages", message_routes)
        .nest("/batches", batch_routes)
        .route("/simulate", post(simulate::simulate))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state);

    // Combine all routes
    Router::new()
        .nest("/health", health_routes)
        .nest("/public", public_routes)
        .nest("/api/v1", api_v1)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(cors_origins)),
        )
}

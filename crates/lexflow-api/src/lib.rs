//! Lexflow API - REST API server
//!
//! Operator endpoints for rules, messages, approval batches and simulation
//! under `/api/v1` (API-key authenticated), plus the unauthenticated
//! quick-approval link under `/public/approve`.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;

pub use auth::AppState;
pub use error::ApiError;
pub use routes::create_router;

#[cfg(test)]
mod tests;

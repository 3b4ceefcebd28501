//! Action handler trait and registry

use async_trait::async_trait;
use lexflow_common::types::{ActionType, BatchId};
use lexflow_storage::models::ActionConfig;
use std::collections::HashMap;
use std::sync::Arc;

/// One action handed to a handler
#[derive(Debug, Clone, Copy)]
pub struct ActionRequest<'a> {
    pub batch_id: BatchId,
    /// Index of the action in the batch snapshot
    pub position: usize,
    pub config: &'a ActionConfig,
}

impl ActionRequest<'_> {
    /// Stable per-action key; targets use it to drop duplicate deliveries
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.batch_id, self.position)
    }
}

/// What a handler reports for one attempt
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// Done; payload such as the created record id or an external link
    Success(serde_json::Value),
    /// Attempted and errored
    Failed { error: String, retryable: bool },
    /// Preconditions not met, nothing attempted
    Skipped(String),
}

impl HandlerOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        HandlerOutcome::Failed {
            error: error.into(),
            retryable: false,
        }
    }

    pub fn transient(error: impl Into<String>) -> Self {
        HandlerOutcome::Failed {
            error: error.into(),
            retryable: true,
        }
    }
}

/// Executes one kind of action against its external target
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn action_type(&self) -> ActionType;

    /// Whether repeating a call cannot duplicate the side effect
    fn is_idempotent(&self) -> bool;

    async fn execute(&self, request: ActionRequest<'_>) -> HandlerOutcome;
}

/// Handlers keyed by action type
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<ActionType, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same type
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(handler.action_type(), handler);
    }

    pub fn with(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, action_type: ActionType) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(&action_type)
    }

    /// Action types with a handler, in canonical order
    pub fn registered(&self) -> Vec<ActionType> {
        ActionType::ALL
            .into_iter()
            .filter(|t| self.handlers.contains_key(t))
            .collect()
    }
}

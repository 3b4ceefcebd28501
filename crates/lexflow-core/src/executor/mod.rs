//! Action Executor
//!
//! Runs the enabled actions of a batch in snapshot order. Every action is
//! attempted regardless of earlier failures, and the summary is computed
//! only once all of them have finished.

mod handler;
pub mod preconditions;
mod smtp;
mod webhook;

pub use handler::{ActionHandler, ActionRequest, HandlerOutcome, HandlerRegistry};
pub use smtp::SmtpEmailHandler;
pub use webhook::WebhookActionHandler;

use chrono::{DateTime, Utc};
use lexflow_common::config::ExecutorConfig;
use lexflow_common::types::{ActionType, BatchId, ExecutionStatus};
use lexflow_storage::models::{Action, ExecutionLogEntry, ExecutionSummary};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Status of one action in an execution report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failed,
    Skipped,
    /// Dry run: preconditions hold and the action would be attempted
    WouldExecute,
}

impl OutcomeStatus {
    /// Persisted status; dry-run outcomes are never persisted
    pub fn execution_status(&self) -> Option<ExecutionStatus> {
        match self {
            OutcomeStatus::Success => Some(ExecutionStatus::Success),
            OutcomeStatus::Failed => Some(ExecutionStatus::Failed),
            OutcomeStatus::Skipped => Some(ExecutionStatus::Skipped),
            OutcomeStatus::WouldExecute => None,
        }
    }
}

/// Outcome of one action
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub position: usize,
    pub action_type: ActionType,
    pub status: OutcomeStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempts: u32,
}

/// Outcome of one execution run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub dry_run: bool,
    pub outcomes: Vec<ActionOutcome>,
    pub summary: ExecutionSummary,
}

impl ExecutionReport {
    fn new(dry_run: bool, outcomes: Vec<ActionOutcome>) -> Self {
        let mut summary = ExecutionSummary {
            total: outcomes.len() as u32,
            ..Default::default()
        };
        for outcome in &outcomes {
            match outcome.status {
                OutcomeStatus::Success => summary.success += 1,
                OutcomeStatus::Failed => summary.failed += 1,
                OutcomeStatus::Skipped => summary.skipped += 1,
                OutcomeStatus::WouldExecute => {}
            }
        }
        Self {
            dry_run,
            outcomes,
            summary,
        }
    }

    /// Log entries for a real run, one per attempted action
    pub fn log_entries(&self, batch_id: BatchId, at: DateTime<Utc>) -> Vec<ExecutionLogEntry> {
        self.outcomes
            .iter()
            .filter_map(|outcome| {
                let status = outcome.status.execution_status()?;
                Some(ExecutionLogEntry {
                    id: uuid::Uuid::now_v7(),
                    batch_id,
                    position: outcome.position as i32,
                    action_type: outcome.action_type,
                    status,
                    result: outcome.result.clone(),
                    error: outcome.error.clone(),
                    attempts: outcome.attempts as i32,
                    created_at: at,
                })
            })
            .collect()
    }
}

/// Action Executor
pub struct ActionExecutor {
    registry: Arc<HandlerRegistry>,
    max_retries: u32,
    retry_backoff: Duration,
    handler_timeout: Duration,
}

impl ActionExecutor {
    pub fn new(registry: Arc<HandlerRegistry>, config: &ExecutorConfig) -> Self {
        Self {
            registry,
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            handler_timeout: Duration::from_secs(config.handler_timeout_secs),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Execute the enabled actions. In a dry run no handler is called.
    pub async fn execute(&self, batch_id: BatchId, actions: &[Action], dry_run: bool) -> ExecutionReport {
        let mut outcomes = Vec::new();

        for (position, action) in actions.iter().enumerate() {
            if !action.enabled {
                continue;
            }
            let request = ActionRequest {
                batch_id,
                position,
                config: &action.config,
            };
            outcomes.push(self.run_one(request, dry_run).await);
        }

        let report = ExecutionReport::new(dry_run, outcomes);
        if !dry_run {
            info!(
                batch_id = %batch_id,
                total = report.summary.total,
                success = report.summary.success,
                failed = report.summary.failed,
                skipped = report.summary.skipped,
                "Batch actions executed"
            );
        }
        report
    }

    async fn run_one(&self, request: ActionRequest<'_>, dry_run: bool) -> ActionOutcome {
        let action_type = request.config.action_type();
        let outcome = |status, result, error, attempts| ActionOutcome {
            position: request.position,
            action_type,
            status,
            result,
            error,
            attempts,
        };

        if let Err(reason) = preconditions::check(request.config) {
            debug!(batch_id = %request.batch_id, %action_type, %reason, "Action skipped");
            return outcome(OutcomeStatus::Skipped, None, Some(reason), 0);
        }

        let Some(handler) = self.registry.get(action_type) else {
            let reason = format!("no handler configured for {}", action_type);
            return outcome(OutcomeStatus::Skipped, None, Some(reason), 0);
        };

        if dry_run {
            let result = serde_json::json!({
                "would_execute": true,
                "action_type": action_type,
                "config": request.config.to_value(),
            });
            return outcome(OutcomeStatus::WouldExecute, Some(result), None, 0);
        }

        let max_attempts = if handler.is_idempotent() {
            self.max_retries + 1
        } else {
            1
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = tokio::time::timeout(self.handler_timeout, handler.execute(request))
                .await
                .unwrap_or_else(|_| {
                    HandlerOutcome::transient(format!(
                        "timed out after {}s",
                        self.handler_timeout.as_secs()
                    ))
                });

            match result {
                HandlerOutcome::Success(payload) => {
                    return outcome(OutcomeStatus::Success, Some(payload), None, attempts);
                }
                HandlerOutcome::Skipped(reason) => {
                    return outcome(OutcomeStatus::Skipped, None, Some(reason), attempts);
                }
                HandlerOutcome::Failed { error, retryable } => {
                    if retryable && attempts < max_attempts {
                        warn!(
                            batch_id = %request.batch_id,
                            %action_type,
                            attempt = attempts,
                            error = %error,
                            "Action failed, retrying"
                        );
                        tokio::time::sleep(self.retry_backoff * attempts).await;
                        continue;
                    }
                    warn!(batch_id = %request.batch_id, %action_type, error = %error, "Action failed");
                    return outcome(OutcomeStatus::Failed, None, Some(error), attempts);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted handlers for executor and manager tests

    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    pub struct ScriptedHandler {
        pub action_type: ActionType,
        pub idempotent: bool,
        pub script: Mutex<VecDeque<HandlerOutcome>>,
        pub calls: AtomicU32,
    }

    impl ScriptedHandler {
        pub fn new(action_type: ActionType, script: Vec<HandlerOutcome>) -> Arc<Self> {
            Arc::new(Self {
                action_type,
                idempotent: true,
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }

        pub fn ok(action_type: ActionType) -> Arc<Self> {
            Self::new(action_type, vec![])
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ActionHandler for ScriptedHandler {
        fn action_type(&self) -> ActionType {
            self.action_type
        }

        fn is_idempotent(&self) -> bool {
            self.idempotent
        }

        async fn execute(&self, request: ActionRequest<'_>) -> HandlerOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| HandlerOutcome::Success(serde_json::json!({"key": request.idempotency_key()})))
        }
    }

    pub fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            max_retries: 2,
            retry_backoff_ms: 1,
            handler_timeout_secs: 5,
        }
    }
}

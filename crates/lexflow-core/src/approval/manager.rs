//! Approval Batch Manager
//!
//! Every status change is a conditional transition in the repository. When
//! one is refused the batch is reloaded only to explain why; the reload
//! never feeds another write.

use super::token::{IssuedToken, TokenPreview, TokenService};
use super::{ApprovalError, TokenError, TokenErrorCode};
use crate::despatch::duplicate_action_kind;
use crate::executor::{ActionExecutor, ActionOutcome};
use crate::links::Links;
use crate::notify::Notifier;
use chrono::Utc;
use lexflow_common::types::{BatchId, BatchStatus, ProcessingStatus};
use lexflow_storage::models::{
    Action, ApprovalBatch, BatchTransition, ExecutionLogEntry, ExecutionSummary,
};
use lexflow_storage::repository::{
    BatchFilter, BatchRepository, ExecutionLogRepository, MessageRepository,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Result of a successful approval
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    /// True when the batch ran to `executed`, even if single actions failed
    pub success: bool,
    pub batch: ApprovalBatch,
    pub summary: ExecutionSummary,
    pub results: Vec<ActionOutcome>,
}

/// Approval Batch Manager
pub struct ApprovalManager {
    batches: Arc<dyn BatchRepository>,
    messages: Arc<dyn MessageRepository>,
    log: Arc<dyn ExecutionLogRepository>,
    tokens: Arc<TokenService>,
    executor: Arc<ActionExecutor>,
    links: Links,
    notifier: Option<Arc<Notifier>>,
}

impl ApprovalManager {
    pub fn new(
        batches: Arc<dyn BatchRepository>,
        messages: Arc<dyn MessageRepository>,
        log: Arc<dyn ExecutionLogRepository>,
        tokens: Arc<TokenService>,
        executor: Arc<ActionExecutor>,
        links: Links,
    ) -> Self {
        Self {
            batches,
            messages,
            log,
            tokens,
            executor,
            links,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn links(&self) -> &Links {
        &self.links
    }

    pub async fn get_batch(&self, id: BatchId) -> Result<ApprovalBatch, ApprovalError> {
        self.batches
            .get(id)
            .await?
            .ok_or(ApprovalError::NotFound(id))
    }

    pub async fn list_batches(
        &self,
        filter: BatchFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ApprovalBatch>, ApprovalError> {
        Ok(self.batches.list(filter, limit, offset).await?)
    }

    /// Replace the action snapshot of an open batch
    pub async fn update_actions(
        &self,
        id: BatchId,
        actions: Vec<Action>,
    ) -> Result<ApprovalBatch, ApprovalError> {
        check_actions(&actions)?;

        match self.batches.update_actions(id, actions, Utc::now()).await? {
            Some(batch) => {
                info!(batch_id = %id, enabled = batch.enabled_action_count(), "Batch actions updated");
                Ok(batch)
            }
            None => {
                let batch = self.get_batch(id).await?;
                Err(ApprovalError::NotOpen {
                    status: batch.status,
                })
            }
        }
    }

    /// Authenticated approval. Edited actions, if given, are saved in the
    /// same write that flips the status, then the batch is executed.
    pub async fn approve(
        &self,
        id: BatchId,
        actions: Option<Vec<Action>>,
        approved_by: Option<String>,
    ) -> Result<ApprovalOutcome, ApprovalError> {
        if let Some(actions) = &actions {
            check_actions(actions)?;
        }

        let transition = BatchTransition::approve(approved_by.clone(), actions, Utc::now());
        let Some(batch) = self.batches.transition(id, transition).await? else {
            let current = self.get_batch(id).await?;
            if current.status != BatchStatus::Pending {
                info!(batch_id = %id, status = %current.status, "Approval lost to an earlier decision");
                return Err(ApprovalError::AlreadyProcessed {
                    status: current.status,
                });
            }
            return Err(ApprovalError::NoEnabledActions);
        };

        info!(batch_id = %id, approved_by = ?approved_by, "Batch approved");
        self.project(&batch).await;
        self.run(batch).await
    }

    /// Unauthenticated approval through the quick link
    pub async fn approve_via_token(
        &self,
        raw: &str,
        presenter: Option<&str>,
    ) -> Result<ApprovalOutcome, ApprovalError> {
        let now = Utc::now();
        let validated = self
            .tokens
            .validate_and_consume(raw, presenter, now)
            .await
            .map_err(|e| self.with_edit_url(e))?;

        let id = validated.batch.id;
        let approved_by = presenter
            .map(|p| p.trim().to_string())
            .or(validated.token.approver_identity);
        let transition = BatchTransition::approve_via_link(approved_by, now);

        let Some(batch) = self.batches.transition(id, transition).await? else {
            let current = self.get_batch(id).await?;
            let err = match current.status {
                BatchStatus::Pending if current.link_expired(now) => {
                    TokenError::for_batch(TokenErrorCode::BatchExpired, id)
                }
                BatchStatus::Pending => TokenError::for_batch(TokenErrorCode::NoEnabledActions, id),
                BatchStatus::Expired => TokenError::for_batch(TokenErrorCode::BatchExpired, id)
                    .with_status(current.status),
                status => {
                    TokenError::for_batch(TokenErrorCode::AlreadyProcessed, id).with_status(status)
                }
            };
            info!(batch_id = %id, code = %err.code, "Quick-link approval refused after consumption");
            return Err(self.with_edit_url(err.into()));
        };

        info!(batch_id = %id, "Batch approved via quick link");
        self.project(&batch).await;
        self.run(batch).await
    }

    /// Describe what a token would approve, without consuming it
    pub async fn preview_token(
        &self,
        raw: &str,
        presenter: Option<&str>,
    ) -> Result<TokenPreview, ApprovalError> {
        let validated = self
            .tokens
            .validate(raw, presenter, Utc::now())
            .await
            .map_err(|e| self.with_edit_url(e))?;
        let batch = validated.batch;

        Ok(TokenPreview {
            batch_id: batch.id,
            edit_url: self.links.edit_url(batch.id),
            rule_name: batch.rule_name,
            mail_subject: batch.mail_subject,
            mail_from: batch.mail_from,
            expires_at: batch.expires_at,
            actions: batch.actions_current,
        })
    }

    /// Rotate the quick-link secret of a pending batch and resend the request
    pub async fn reissue_token(&self, id: BatchId) -> Result<IssuedToken, ApprovalError> {
        let batch = self.get_batch(id).await?;
        if batch.status != BatchStatus::Pending {
            return Err(ApprovalError::NotOpen {
                status: batch.status,
            });
        }
        if batch.link_expired(Utc::now()) {
            return Err(ApprovalError::Invalid(
                "The quick-approval window has passed; approve from the batch page".to_string(),
            ));
        }

        let issued = self
            .tokens
            .issue(&batch, batch.approver_identity.clone())
            .await?;
        info!(batch_id = %id, "Approval token reissued");

        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.send_approval_request(&batch, &issued.token).await {
                warn!(batch_id = %id, error = %e, "Failed to resend approval request");
            }
        }
        Ok(issued)
    }

    /// Cancel an open batch
    pub async fn cancel(&self, id: BatchId, reason: &str) -> Result<ApprovalBatch, ApprovalError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ApprovalError::Invalid(
                "A cancellation reason is required".to_string(),
            ));
        }

        let transition = BatchTransition::cancel(reason, Utc::now());
        match self.batches.transition(id, transition).await? {
            Some(batch) => {
                info!(batch_id = %id, reason, "Batch cancelled");
                self.project(&batch).await;
                Ok(batch)
            }
            None => {
                let batch = self.get_batch(id).await?;
                Err(ApprovalError::NotOpen {
                    status: batch.status,
                })
            }
        }
    }

    pub async fn execution_log(&self, id: BatchId) -> Result<Vec<ExecutionLogEntry>, ApprovalError> {
        self.get_batch(id).await?;
        Ok(self.log.list_for_batch(id).await?)
    }

    /// approved -> executing -> executed, or failed if the run cannot be
    /// started or recorded
    async fn run(&self, batch: ApprovalBatch) -> Result<ApprovalOutcome, ApprovalError> {
        let id = batch.id;

        let started = match self
            .batches
            .transition(id, BatchTransition::start_execution(Utc::now()))
            .await
        {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                let current = self.get_batch(id).await?;
                return Err(ApprovalError::AlreadyProcessed {
                    status: current.status,
                });
            }
            Err(e) => {
                error!(batch_id = %id, error = %e, "Could not start execution");
                self.fail(id, format!("could not start execution: {}", e), None)
                    .await;
                return Err(e.into());
            }
        };
        self.project(&started).await;

        let report = self
            .executor
            .execute(id, &started.actions_current, false)
            .await;
        let entries = report.log_entries(id, Utc::now());

        let finished = match self.log.append(&entries).await {
            Ok(()) => match self
                .batches
                .transition(id, BatchTransition::complete(report.summary, Utc::now()))
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    error!(batch_id = %id, error = %e, "Could not record completion");
                    self.fail(
                        id,
                        format!("could not record completion: {}", e),
                        Some(report.summary),
                    )
                    .await
                }
            },
            Err(e) => {
                error!(batch_id = %id, error = %e, "Could not record execution log");
                self.fail(
                    id,
                    format!("could not record execution log: {}", e),
                    Some(report.summary),
                )
                .await
            }
        };
        let finished = match finished {
            Some(batch) => batch,
            None => self.get_batch(id).await?,
        };
        self.project(&finished).await;

        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.send_execution_report(&finished, &entries).await {
                warn!(batch_id = %id, error = %e, "Failed to send execution report");
            }
        }

        Ok(ApprovalOutcome {
            success: finished.status == BatchStatus::Executed,
            summary: report.summary,
            results: report.outcomes,
            batch: finished,
        })
    }

    async fn fail(
        &self,
        id: BatchId,
        reason: String,
        summary: Option<ExecutionSummary>,
    ) -> Option<ApprovalBatch> {
        let mut transition = BatchTransition::fail(reason, Utc::now());
        transition.execution_summary = summary;
        match self.batches.transition(id, transition).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(batch_id = %id, error = %e, "Could not mark batch failed");
                None
            }
        }
    }

    /// Mirror the batch status onto its message for display
    async fn project(&self, batch: &ApprovalBatch) {
        let status = ProcessingStatus::from(batch.status);
        if let Err(e) = self
            .messages
            .set_processing(batch.message_id, status, Some(batch.rule_id))
            .await
        {
            warn!(message_id = %batch.message_id, error = %e, "Failed to update processing status");
        }
    }

    fn with_edit_url(&self, err: ApprovalError) -> ApprovalError {
        match err {
            ApprovalError::Token(mut e) => {
                if let Some(id) = e.batch_id {
                    e.edit_url = Some(self.links.edit_url(id));
                }
                ApprovalError::Token(e)
            }
            other => other,
        }
    }
}

fn check_actions(actions: &[Action]) -> Result<(), ApprovalError> {
    match duplicate_action_kind(actions) {
        Some(kind) => Err(ApprovalError::Invalid(format!(
            "Action '{}' appears more than once",
            kind
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{fast_config, ScriptedHandler};
    use crate::executor::{HandlerOutcome, HandlerRegistry};
    use crate::notify::testing::RecordingChannel;
    use crate::notify::NotificationRenderer;
    use chrono::Duration;
    use lexflow_common::types::ActionType;
    use lexflow_storage::models::{
        ActionConfig, BillingConfig, CreateAlertConfig, CreateBatch, CreateTaskConfig, NewMessage,
    };
    use lexflow_storage::repository::TokenRepository;
    use lexflow_storage::MemoryStore;
    use pretty_assertions::assert_eq;

    fn task() -> Action {
        Action::new(ActionConfig::CreateTask(CreateTaskConfig {
            title: "Prepare hearing".to_string(),
            description: None,
            assignee: None,
            due_in_days: Some(3),
        }))
    }

    fn billing() -> Action {
        Action::new(ActionConfig::Billing(BillingConfig {
            hours: 0.3,
            rate: None,
            description: "Review notice".to_string(),
        }))
    }

    fn alert() -> Action {
        Action::new(ActionConfig::CreateAlert(CreateAlertConfig {
            message: "Hearing scheduled".to_string(),
            recipients: vec![],
        }))
    }

    struct Fixture {
        store: MemoryStore,
        manager: Arc<ApprovalManager>,
        tokens: Arc<TokenService>,
        handlers: Vec<Arc<ScriptedHandler>>,
        channel: Arc<RecordingChannel>,
    }

    fn fixture(handlers: Vec<Arc<ScriptedHandler>>) -> Fixture {
        let store = MemoryStore::new();
        let mut registry = HandlerRegistry::new();
        for handler in &handlers {
            registry.register(handler.clone());
        }
        let executor = Arc::new(ActionExecutor::new(Arc::new(registry), &fast_config()));
        let tokens = Arc::new(TokenService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            32,
        ));
        let links = Links::new("https://firm.example");
        let channel = Arc::new(RecordingChannel::default());
        let notifier = Arc::new(Notifier::new(
            NotificationRenderer::new(links.clone(), 60),
            channel.clone(),
            Some("partner@firm.example".to_string()),
        ));
        let manager = ApprovalManager::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            tokens.clone(),
            executor,
            links,
        )
        .with_notifier(notifier);

        Fixture {
            store,
            manager: Arc::new(manager),
            tokens,
            handlers,
            channel,
        }
    }

    fn default_fixture() -> Fixture {
        fixture(vec![
            ScriptedHandler::ok(ActionType::CreateTask),
            ScriptedHandler::ok(ActionType::Billing),
            ScriptedHandler::ok(ActionType::CreateAlert),
        ])
    }

    impl Fixture {
        async fn batch(&self, actions: Vec<Action>, expires_in: Duration) -> ApprovalBatch {
            let now = Utc::now();
            let message = NewMessage {
                sender_address: "clerk@court.gov".to_string(),
                subject: "Hearing set".to_string(),
                body_text: "Case No. 2024-117".to_string(),
                ..Default::default()
            }
            .into_message(now);
            let message_id = message.id;
            MessageRepository::insert(&self.store, message).await.unwrap();

            BatchRepository::create(
                &self.store,
                CreateBatch {
                    message_id,
                    rule_id: uuid::Uuid::new_v4(),
                    rule_name: "Court notices".to_string(),
                    mail_subject: "Hearing set".to_string(),
                    mail_from: "clerk@court.gov".to_string(),
                    actions,
                    expires_at: now + expires_in,
                    approver_identity: None,
                    created_at: now,
                },
            )
            .await
            .unwrap()
            .into_batch()
        }

        fn total_calls(&self) -> u32 {
            self.handlers.iter().map(|h| h.calls()).sum()
        }
    }

    fn token_code(err: ApprovalError) -> TokenErrorCode {
        match err {
            ApprovalError::Token(e) => e.code,
            other => panic!("expected token error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_partial_failure_still_executed() {
        let f = fixture(vec![
            ScriptedHandler::ok(ActionType::CreateTask),
            ScriptedHandler::new(
                ActionType::Billing,
                vec![HandlerOutcome::failed("ledger rejected entry")],
            ),
            ScriptedHandler::ok(ActionType::CreateAlert),
        ]);
        let batch = f
            .batch(vec![task(), billing(), alert()], Duration::minutes(60))
            .await;

        let outcome = f
            .manager
            .approve(batch.id, None, Some("partner@firm.example".to_string()))
            .await
            .unwrap();

        assert_eq!(
            outcome.summary,
            ExecutionSummary {
                total: 3,
                success: 2,
                failed: 1,
                skipped: 0
            }
        );
        assert!(outcome.success);
        assert_eq!(outcome.batch.status, BatchStatus::Executed);
        assert_eq!(outcome.batch.execution_summary, Some(outcome.summary));
        assert_eq!(f.manager.execution_log(batch.id).await.unwrap().len(), 3);

        let message = MessageRepository::get(&f.store, batch.message_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.processing_status, ProcessingStatus::Executed);
    }

    #[tokio::test]
    async fn test_zero_enabled_actions_rejected_before_execution() {
        let f = default_fixture();
        let batch = f
            .batch(vec![task().disabled(), billing().disabled()], Duration::minutes(60))
            .await;

        let err = f.manager.approve(batch.id, None, None).await.unwrap_err();
        assert!(matches!(err, ApprovalError::NoEnabledActions));
        assert_eq!(f.total_calls(), 0);
        assert_eq!(
            f.manager.get_batch(batch.id).await.unwrap().status,
            BatchStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_edits_saved_with_approval() {
        let f = default_fixture();
        let batch = f
            .batch(vec![task().disabled(), billing()], Duration::minutes(60))
            .await;

        let outcome = f
            .manager
            .approve(batch.id, Some(vec![task(), billing().disabled()]), None)
            .await
            .unwrap();
        assert_eq!(outcome.summary.total, 1);
        assert_eq!(outcome.results[0].action_type, ActionType::CreateTask);
        assert!(!outcome.batch.actions_current[1].enabled);
    }

    #[tokio::test]
    async fn test_concurrent_approvals_execute_once() {
        let f = default_fixture();
        let batch = f.batch(vec![task(), billing()], Duration::minutes(60)).await;

        let (a, b) = tokio::join!(
            f.manager.approve(batch.id, None, Some("a@firm.example".to_string())),
            f.manager.approve(batch.id, None, Some("b@firm.example".to_string())),
        );

        let results = [a, b];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ApprovalError::AlreadyProcessed { .. }))));
        assert_eq!(f.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_ui_approval_racing_token_approval() {
        let f = default_fixture();
        let batch = f.batch(vec![task()], Duration::minutes(60)).await;
        let issued = f.tokens.issue(&batch, None).await.unwrap();

        let (ui, link) = tokio::join!(
            f.manager.approve(batch.id, None, None),
            f.manager.approve_via_token(&issued.token, None),
        );

        assert_eq!([ui.is_ok(), link.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert_eq!(f.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_token_reuse_reports_already_used() {
        let f = default_fixture();
        let batch = f.batch(vec![task()], Duration::minutes(60)).await;
        let issued = f.tokens.issue(&batch, None).await.unwrap();

        let outcome = f.manager.approve_via_token(&issued.token, None).await.unwrap();
        assert_eq!(outcome.batch.status, BatchStatus::Executed);

        for _ in 0..2 {
            let err = f
                .manager
                .approve_via_token(&issued.token, None)
                .await
                .unwrap_err();
            match err {
                ApprovalError::Token(e) => {
                    assert_eq!(e.code, TokenErrorCode::TokenAlreadyUsed);
                    assert_eq!(
                        e.edit_url.as_deref(),
                        Some(format!("https://firm.example/batches/{}", batch.id).as_str())
                    );
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(f.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_link_but_operator_can_approve() {
        let f = default_fixture();
        let batch = f.batch(vec![task()], Duration::minutes(-1)).await;
        let issued = f.tokens.issue(&batch, None).await.unwrap();

        let err = f
            .manager
            .approve_via_token(&issued.token, None)
            .await
            .unwrap_err();
        assert_eq!(token_code(err), TokenErrorCode::BatchExpired);
        let token = f.store.get_for_batch(batch.id).await.unwrap().unwrap();
        assert!(token.used_at.is_none());

        let outcome = f.manager.approve(batch.id, None, None).await.unwrap();
        assert_eq!(outcome.batch.status, BatchStatus::Executed);
    }

    #[tokio::test]
    async fn test_preview_does_not_consume() {
        let f = default_fixture();
        let batch = f.batch(vec![task()], Duration::minutes(60)).await;
        let issued = f.tokens.issue(&batch, None).await.unwrap();

        let preview = f.manager.preview_token(&issued.token, None).await.unwrap();
        assert_eq!(preview.batch_id, batch.id);
        assert_eq!(preview.actions.len(), 1);
        f.manager.approve_via_token(&issued.token, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_then_edit_refused() {
        let f = default_fixture();
        let batch = f.batch(vec![task()], Duration::minutes(60)).await;

        let cancelled = f.manager.cancel(batch.id, "handled by phone").await.unwrap();
        assert_eq!(cancelled.status, BatchStatus::Cancelled);
        assert_eq!(cancelled.cancel_reason.as_deref(), Some("handled by phone"));

        let err = f
            .manager
            .update_actions(batch.id, vec![billing()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApprovalError::NotOpen {
                status: BatchStatus::Cancelled
            }
        ));
        let err = f.manager.cancel(batch.id, "again").await.unwrap_err();
        assert!(matches!(err, ApprovalError::NotOpen { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_action_kind_rejected() {
        let f = default_fixture();
        let batch = f.batch(vec![task()], Duration::minutes(60)).await;
        let err = f
            .manager
            .update_actions(batch.id, vec![task(), task()])
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_missing_batch() {
        let f = default_fixture();
        let err = f
            .manager
            .approve(uuid::Uuid::new_v4(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reissue_rotates_and_notifies() {
        let f = default_fixture();
        let batch = f.batch(vec![task()], Duration::minutes(60)).await;
        let first = f.tokens.issue(&batch, None).await.unwrap();

        let second = f.manager.reissue_token(batch.id).await.unwrap();
        let err = f
            .manager
            .approve_via_token(&first.token, None)
            .await
            .unwrap_err();
        assert_eq!(token_code(err), TokenErrorCode::InvalidToken);
        assert_eq!(f.channel.sent.lock().await.len(), 1);

        f.manager.approve_via_token(&second.token, None).await.unwrap();
    }

    /// Batch store whose executing -> executed write errors
    struct CompletionFails {
        store: MemoryStore,
    }

    #[async_trait::async_trait]
    impl BatchRepository for CompletionFails {
        async fn create(
            &self,
            input: CreateBatch,
        ) -> lexflow_common::Result<lexflow_storage::models::CreateBatchOutcome> {
            BatchRepository::create(&self.store, input).await
        }

        async fn get(&self, id: BatchId) -> lexflow_common::Result<Option<ApprovalBatch>> {
            BatchRepository::get(&self.store, id).await
        }

        async fn find_active_for_message(
            &self,
            message_id: lexflow_common::types::MessageId,
        ) -> lexflow_common::Result<Option<ApprovalBatch>> {
            BatchRepository::find_active_for_message(&self.store, message_id).await
        }

        async fn list(
            &self,
            filter: BatchFilter,
            limit: i64,
            offset: i64,
        ) -> lexflow_common::Result<Vec<ApprovalBatch>> {
            BatchRepository::list(&self.store, filter, limit, offset).await
        }

        async fn update_actions(
            &self,
            id: BatchId,
            actions: Vec<Action>,
            at: chrono::DateTime<Utc>,
        ) -> lexflow_common::Result<Option<ApprovalBatch>> {
            BatchRepository::update_actions(&self.store, id, actions, at).await
        }

        async fn transition(
            &self,
            id: BatchId,
            transition: BatchTransition,
        ) -> lexflow_common::Result<Option<ApprovalBatch>> {
            if transition.to == BatchStatus::Executed {
                return Err(lexflow_common::Error::Database("connection reset".to_string()));
            }
            BatchRepository::transition(&self.store, id, transition).await
        }

        async fn list_stale(
            &self,
            cutoff: chrono::DateTime<Utc>,
            limit: i64,
        ) -> lexflow_common::Result<Vec<ApprovalBatch>> {
            BatchRepository::list_stale(&self.store, cutoff, limit).await
        }
    }

    #[tokio::test]
    async fn test_completion_write_error_marks_batch_failed() {
        let f = default_fixture();
        let batch = f.batch(vec![task(), billing()], Duration::minutes(60)).await;

        let mut registry = HandlerRegistry::new();
        for handler in &f.handlers {
            registry.register(handler.clone());
        }
        let manager = ApprovalManager::new(
            Arc::new(CompletionFails {
                store: f.store.clone(),
            }),
            Arc::new(f.store.clone()),
            Arc::new(f.store.clone()),
            f.tokens.clone(),
            Arc::new(ActionExecutor::new(Arc::new(registry), &fast_config())),
            Links::new("https://firm.example"),
        );

        let outcome = manager.approve(batch.id, None, None).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.batch.status, BatchStatus::Failed);
        assert_eq!(f.total_calls(), 2);

        let stored = f.manager.get_batch(batch.id).await.unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);
        assert_eq!(stored.execution_summary, Some(outcome.summary));
        assert!(stored
            .failure_reason
            .as_deref()
            .unwrap_or_default()
            .contains("could not record completion"));
        assert_eq!(f.manager.execution_log(batch.id).await.unwrap().len(), 2);

        let message = MessageRepository::get(&f.store, batch.message_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.processing_status, ProcessingStatus::Failed);
    }

    #[tokio::test]
    async fn test_execution_report_sent() {
        let f = default_fixture();
        let batch = f.batch(vec![task()], Duration::minutes(60)).await;
        f.manager.approve(batch.id, None, None).await.unwrap();

        let sent = f.channel.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "partner@firm.example");
    }
}

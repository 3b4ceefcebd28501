//! Mail Processor - turns an inbound message into at most one approval batch

use super::build_bundle;
use super::ingest::parse_rfc822;
use crate::approval::TokenService;
use crate::catch::CatchMatcher;
use crate::directory::CaseDirectory;
use crate::extract::FieldExtractor;
use crate::notify::Notifier;
use chrono::{DateTime, Duration, Utc};
use lexflow_common::types::{BatchId, BatchStatus, MessageId, ProcessingStatus, RuleId};
use lexflow_common::{Error, Result};
use lexflow_storage::models::{
    ApprovalBatch, AutomationRule, CreateBatch, CreateBatchOutcome, InboundMessage, NewMessage,
};
use lexflow_storage::repository::{BatchRepository, MessageInsert, MessageRepository, RuleRepository};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What processing a message produced
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// No active rule matched
    NoMatch { message_id: MessageId },
    /// A new pending batch was created and its approval request sent
    BatchCreated {
        message_id: MessageId,
        batch_id: BatchId,
        rule_id: RuleId,
    },
    /// The message already had an active batch
    BatchReused {
        message_id: MessageId,
        batch_id: BatchId,
    },
    /// The message was already ingested; nothing was done
    Duplicate { message_id: MessageId },
}

/// Mail Processor
pub struct MailProcessor {
    rules: Arc<dyn RuleRepository>,
    messages: Arc<dyn MessageRepository>,
    batches: Arc<dyn BatchRepository>,
    directory: Arc<dyn CaseDirectory>,
    tokens: Arc<TokenService>,
    notifier: Option<Arc<Notifier>>,
    matcher: CatchMatcher,
    extractor: FieldExtractor,
    /// Quick-approval window
    window: Duration,
}

impl MailProcessor {
    pub fn new(
        rules: Arc<dyn RuleRepository>,
        messages: Arc<dyn MessageRepository>,
        batches: Arc<dyn BatchRepository>,
        directory: Arc<dyn CaseDirectory>,
        tokens: Arc<TokenService>,
        window_minutes: i64,
    ) -> Self {
        Self {
            rules,
            messages,
            batches,
            directory,
            tokens,
            notifier: None,
            matcher: CatchMatcher::new(),
            extractor: FieldExtractor::new(),
            window: Duration::minutes(window_minutes),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Parse, store and process a raw RFC 822 message
    pub async fn ingest_raw(&self, data: &[u8]) -> Result<ProcessOutcome> {
        self.ingest(parse_rfc822(data)?).await
    }

    /// Store and process a message; a repeated `external_id` is ignored
    pub async fn ingest(&self, input: NewMessage) -> Result<ProcessOutcome> {
        match self.messages.insert(input.into_message(Utc::now())).await? {
            MessageInsert::Duplicate(existing) => {
                debug!(message_id = %existing.id, "Duplicate message ignored");
                Ok(ProcessOutcome::Duplicate {
                    message_id: existing.id,
                })
            }
            MessageInsert::Inserted(message) => self.process(&message).await,
        }
    }

    /// Match a stored message against the active rules and create its batch
    pub async fn process(&self, message: &InboundMessage) -> Result<ProcessOutcome> {
        match self.process_inner(message).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(message_id = %message.id, error = %e, "Message processing failed");
                self.project(message.id, ProcessingStatus::Error, None).await;
                Err(e)
            }
        }
    }

    async fn process_inner(&self, message: &InboundMessage) -> Result<ProcessOutcome> {
        let rules = self.rules.list_active().await?;

        for rule in &rules {
            let trace = self.matcher.evaluate(&rule.catch_config, message);
            if !trace.matched {
                continue;
            }
            if trace.unconditional && !rule.catch_config.match_all {
                warn!(
                    rule_id = %rule.id,
                    message_id = %message.id,
                    "Rule has no catch condition and match_all is not set; skipping"
                );
                continue;
            }
            return self.dispatch(message, rule).await;
        }

        debug!(message_id = %message.id, rules = rules.len(), "No rule matched");
        self.project(message.id, ProcessingStatus::NoMatch, None).await;
        Ok(ProcessOutcome::NoMatch {
            message_id: message.id,
        })
    }

    async fn dispatch(&self, message: &InboundMessage, rule: &AutomationRule) -> Result<ProcessOutcome> {
        let now = Utc::now();
        let extraction = self.extractor.extract(message, &rule.map_config);
        let bundle = build_bundle(self.directory.as_ref(), message, rule, &extraction.fields, now).await;
        for unresolved in &bundle.unresolved {
            debug!(
                rule_id = %rule.id,
                action_type = %unresolved.action_type,
                placeholder = %unresolved.placeholder,
                "Unresolved placeholder"
            );
        }

        let outcome = self
            .batches
            .create(CreateBatch {
                message_id: message.id,
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                mail_subject: message.subject.clone(),
                mail_from: message.sender_address.clone(),
                actions: bundle.actions,
                expires_at: now + self.window,
                approver_identity: rule.approver_identity.clone(),
                created_at: now,
            })
            .await?;

        let batch = match outcome {
            CreateBatchOutcome::Existing(batch) => {
                info!(batch_id = %batch.id, message_id = %message.id, "Active batch already exists");
                if self.lacks_link(&batch, now).await? {
                    info!(batch_id = %batch.id, "Pending batch has no approval link; issuing one");
                    self.request_approval(&batch).await?;
                    self.project(message.id, ProcessingStatus::AwaitingApproval, Some(batch.rule_id))
                        .await;
                }
                return Ok(ProcessOutcome::BatchReused {
                    message_id: message.id,
                    batch_id: batch.id,
                });
            }
            CreateBatchOutcome::Created(batch) => batch,
        };

        info!(
            batch_id = %batch.id,
            rule_id = %rule.id,
            message_id = %message.id,
            actions = batch.actions_current.len(),
            "Approval batch created"
        );

        self.request_approval(&batch).await?;
        self.project(message.id, ProcessingStatus::AwaitingApproval, Some(rule.id))
            .await;

        Ok(ProcessOutcome::BatchCreated {
            message_id: message.id,
            batch_id: batch.id,
            rule_id: rule.id,
        })
    }

    /// A pending batch whose link is still open but was never issued
    async fn lacks_link(&self, batch: &ApprovalBatch, now: DateTime<Utc>) -> Result<bool> {
        if batch.status != BatchStatus::Pending || batch.link_expired(now) {
            return Ok(false);
        }
        let issued = self
            .tokens
            .has_token(batch.id)
            .await
            .map_err(|e| Error::Internal(format!("Failed to look up approval token: {}", e)))?;
        Ok(!issued)
    }

    /// Issue the quick-approval token and send the request
    async fn request_approval(&self, batch: &ApprovalBatch) -> Result<()> {
        let issued = self
            .tokens
            .issue(batch, batch.approver_identity.clone())
            .await
            .map_err(|e| Error::Internal(format!("Failed to issue approval token: {}", e)))?;

        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.send_approval_request(batch, &issued.token).await {
                warn!(batch_id = %batch.id, error = %e, "Failed to send approval request");
            }
        }
        Ok(())
    }

    async fn project(&self, id: MessageId, status: ProcessingStatus, rule_id: Option<RuleId>) {
        if let Err(e) = self.messages.set_processing(id, status, rule_id).await {
            warn!(message_id = %id, error = %e, "Failed to update processing status");
        }
    }
}

//! In-memory storage
//!
//! A single mutex guards all tables, so every conditional update is atomic
//! exactly like its SQL counterpart. Used by tests and by embedders that
//! run without PostgreSQL.

use crate::db::Database;
use crate::models::{
    Action, ApprovalBatch, ApprovalToken, AutomationRule, BatchTransition, CreateBatch,
    CreateBatchOutcome, ExecutionLogEntry, InboundMessage, IssueToken, RuleInput,
};
use crate::repository::{
    BatchFilter, BatchRepository, ExecutionLogRepository, MessageInsert, MessageRepository,
    RuleRepository, TokenRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lexflow_common::types::{BatchId, MessageId, ProcessingStatus, RuleId, TokenId};
use lexflow_common::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    rules: HashMap<RuleId, AutomationRule>,
    messages: HashMap<MessageId, InboundMessage>,
    batches: HashMap<BatchId, ApprovalBatch>,
    tokens: HashMap<TokenId, ApprovalToken>,
    log: Vec<ExecutionLogEntry>,
}

/// In-memory implementation of every repository trait
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page<T>(items: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

fn sort_rules(rules: &mut [AutomationRule]) {
    rules.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
    });
}

#[async_trait]
impl Database for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl RuleRepository for MemoryStore {
    async fn create(&self, input: RuleInput) -> Result<AutomationRule> {
        let now = Utc::now();
        let rule = AutomationRule {
            id: Uuid::now_v7(),
            name: input.name,
            description: input.description,
            is_active: input.is_active,
            priority: input.priority,
            approver_identity: input.approver_identity,
            catch_config: input.catch_config,
            map_config: input.map_config,
            action_bundle: input.action_bundle,
            created_at: now,
            updated_at: now,
        };
        self.tables.lock().await.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn get(&self, id: RuleId) -> Result<Option<AutomationRule>> {
        Ok(self.tables.lock().await.rules.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<AutomationRule>> {
        let mut rules: Vec<_> = self.tables.lock().await.rules.values().cloned().collect();
        sort_rules(&mut rules);
        Ok(rules)
    }

    async fn list_active(&self) -> Result<Vec<AutomationRule>> {
        let mut rules: Vec<_> = self
            .tables
            .lock()
            .await
            .rules
            .values()
            .filter(|r| r.is_active)
            .cloned()
            .collect();
        sort_rules(&mut rules);
        Ok(rules)
    }

    async fn update(&self, id: RuleId, input: RuleInput) -> Result<Option<AutomationRule>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.rules.get_mut(&id).map(|rule| {
            rule.name = input.name;
            rule.description = input.description;
            rule.is_active = input.is_active;
            rule.priority = input.priority;
            rule.approver_identity = input.approver_identity;
            rule.catch_config = input.catch_config;
            rule.map_config = input.map_config;
            rule.action_bundle = input.action_bundle;
            rule.updated_at = Utc::now();
            rule.clone()
        }))
    }

    async fn set_active(&self, id: RuleId, is_active: bool) -> Result<Option<AutomationRule>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.rules.get_mut(&id).map(|rule| {
            rule.is_active = is_active;
            rule.updated_at = Utc::now();
            rule.clone()
        }))
    }

    async fn delete(&self, id: RuleId) -> Result<bool> {
        Ok(self.tables.lock().await.rules.remove(&id).is_some())
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn insert(&self, message: InboundMessage) -> Result<MessageInsert> {
        let mut tables = self.tables.lock().await;
        if let Some(external_id) = &message.external_id {
            if let Some(existing) = tables
                .messages
                .values()
                .find(|m| m.external_id.as_ref() == Some(external_id))
            {
                return Ok(MessageInsert::Duplicate(existing.clone()));
            }
        }
        tables.messages.insert(message.id, message.clone());
        Ok(MessageInsert::Inserted(message))
    }

    async fn get(&self, id: MessageId) -> Result<Option<InboundMessage>> {
        Ok(self.tables.lock().await.messages.get(&id).cloned())
    }

    async fn list(
        &self,
        status: Option<ProcessingStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InboundMessage>> {
        let mut messages: Vec<_> = self
            .tables
            .lock()
            .await
            .messages
            .values()
            .filter(|m| status.map_or(true, |s| m.processing_status == s))
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(page(messages, limit, offset))
    }

    async fn set_processing(
        &self,
        id: MessageId,
        status: ProcessingStatus,
        matched_rule_id: Option<RuleId>,
    ) -> Result<()> {
        if let Some(message) = self.tables.lock().await.messages.get_mut(&id) {
            message.processing_status = status;
            if matched_rule_id.is_some() {
                message.matched_rule_id = matched_rule_id;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BatchRepository for MemoryStore {
    async fn create(&self, input: CreateBatch) -> Result<CreateBatchOutcome> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables
            .batches
            .values()
            .find(|b| b.message_id == input.message_id && b.status.is_active())
        {
            return Ok(CreateBatchOutcome::Existing(existing.clone()));
        }
        let batch = input.into_batch();
        tables.batches.insert(batch.id, batch.clone());
        Ok(CreateBatchOutcome::Created(batch))
    }

    async fn get(&self, id: BatchId) -> Result<Option<ApprovalBatch>> {
        Ok(self.tables.lock().await.batches.get(&id).cloned())
    }

    async fn find_active_for_message(
        &self,
        message_id: MessageId,
    ) -> Result<Option<ApprovalBatch>> {
        Ok(self
            .tables
            .lock()
            .await
            .batches
            .values()
            .find(|b| b.message_id == message_id && b.status.is_active())
            .cloned())
    }

    async fn list(
        &self,
        filter: BatchFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ApprovalBatch>> {
        let mut batches: Vec<_> = self
            .tables
            .lock()
            .await
            .batches
            .values()
            .filter(|b| filter.status.map_or(true, |s| b.status == s))
            .filter(|b| filter.message_id.map_or(true, |m| b.message_id == m))
            .cloned()
            .collect();
        batches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(batches, limit, offset))
    }

    async fn update_actions(
        &self,
        id: BatchId,
        actions: Vec<Action>,
        at: DateTime<Utc>,
    ) -> Result<Option<ApprovalBatch>> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .batches
            .get_mut(&id)
            .filter(|b| b.status.is_open())
            .map(|batch| {
                batch.actions_current = actions;
                batch.updated_at = at;
                batch.clone()
            }))
    }

    async fn transition(
        &self,
        id: BatchId,
        transition: BatchTransition,
    ) -> Result<Option<ApprovalBatch>> {
        let mut tables = self.tables.lock().await;
        match tables.batches.get_mut(&id) {
            Some(batch) => Ok(transition.apply(batch).then(|| batch.clone())),
            None => Ok(None),
        }
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<ApprovalBatch>> {
        let mut stale: Vec<_> = self
            .tables
            .lock()
            .await
            .batches
            .values()
            .filter(|b| b.status.is_open() && b.expires_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        Ok(page(stale, limit, 0))
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn issue(&self, input: IssueToken) -> Result<Option<ApprovalToken>> {
        let mut tables = self.tables.lock().await;
        let existing = tables
            .tokens
            .values()
            .find(|t| t.batch_id == input.batch_id)
            .map(|t| (t.id, t.used_at.is_some()));

        match existing {
            Some((_, true)) => Ok(None),
            Some((id, false)) => {
                let token = tables.tokens.get_mut(&id).map(|token| {
                    token.token_hash = input.token_hash;
                    token.approver_identity = input.approver_identity;
                    token.expires_at = input.expires_at;
                    token.created_at = input.created_at;
                    token.clone()
                });
                Ok(token)
            }
            None => {
                let token = ApprovalToken {
                    id: Uuid::now_v7(),
                    batch_id: input.batch_id,
                    token_hash: input.token_hash,
                    approver_identity: input.approver_identity,
                    expires_at: input.expires_at,
                    used_at: None,
                    created_at: input.created_at,
                };
                tables.tokens.insert(token.id, token.clone());
                Ok(Some(token))
            }
        }
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<ApprovalToken>> {
        Ok(self
            .tables
            .lock()
            .await
            .tokens
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn get_for_batch(&self, batch_id: BatchId) -> Result<Option<ApprovalToken>> {
        Ok(self
            .tables
            .lock()
            .await
            .tokens
            .values()
            .find(|t| t.batch_id == batch_id)
            .cloned())
    }

    async fn consume(&self, id: TokenId, token_hash: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.tokens.get_mut(&id) {
            Some(token)
                if token.token_hash == token_hash
                    && token.used_at.is_none()
                    && token.expires_at > at =>
            {
                token.used_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl ExecutionLogRepository for MemoryStore {
    async fn append(&self, entries: &[ExecutionLogEntry]) -> Result<()> {
        self.tables.lock().await.log.extend_from_slice(entries);
        Ok(())
    }

    async fn list_for_batch(&self, batch_id: BatchId) -> Result<Vec<ExecutionLogEntry>> {
        let mut entries: Vec<_> = self
            .tables
            .lock()
            .await
            .log
            .iter()
            .filter(|e| e.batch_id == batch_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.position);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionConfig, CreateAlertConfig, NewMessage};
    use chrono::Duration;
    use lexflow_common::types::BatchStatus;

    fn alert() -> Action {
        Action::new(ActionConfig::CreateAlert(CreateAlertConfig {
            message: "New filing".to_string(),
            recipients: vec![],
        }))
    }

    fn create_batch(message_id: MessageId) -> CreateBatch {
        let now = Utc::now();
        CreateBatch {
            message_id,
            rule_id: Uuid::new_v4(),
            rule_name: "Filings".to_string(),
            mail_subject: "Filing".to_string(),
            mail_from: "clerk@court.gov".to_string(),
            actions: vec![alert()],
            expires_at: now + Duration::minutes(60),
            approver_identity: None,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_one_active_batch_per_message() {
        let store = MemoryStore::new();
        let message_id = Uuid::new_v4();

        let first = BatchRepository::create(&store, create_batch(message_id)).await.unwrap();
        let second = BatchRepository::create(&store, create_batch(message_id)).await.unwrap();
        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.batch().id, second.batch().id);

        let cancelled = store
            .transition(first.batch().id, BatchTransition::cancel("dup", Utc::now()))
            .await
            .unwrap();
        assert_eq!(cancelled.unwrap().status, BatchStatus::Cancelled);

        let third = BatchRepository::create(&store, create_batch(message_id)).await.unwrap();
        assert!(third.is_new());
    }

    #[tokio::test]
    async fn test_concurrent_transitions_single_winner() {
        let store = MemoryStore::new();
        let batch = BatchRepository::create(&store, create_batch(Uuid::new_v4()))
            .await
            .unwrap()
            .into_batch();

        let (a, b) = tokio::join!(
            store.transition(batch.id, BatchTransition::approve(None, None, Utc::now())),
            store.transition(batch.id, BatchTransition::approve(None, None, Utc::now())),
        );
        let winners = [a.unwrap(), b.unwrap()].iter().filter(|r| r.is_some()).count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_token_consumed_once() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let token = store
            .issue(IssueToken {
                batch_id: Uuid::new_v4(),
                token_hash: "abc".to_string(),
                approver_identity: None,
                expires_at: now + Duration::minutes(5),
                created_at: now,
            })
            .await
            .unwrap()
            .unwrap();

        assert!(store.consume(token.id, &token.token_hash, now).await.unwrap());
        assert!(!store.consume(token.id, &token.token_hash, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_token_not_reissued_after_use() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let input = IssueToken {
            batch_id: Uuid::new_v4(),
            token_hash: "first".to_string(),
            approver_identity: None,
            expires_at: now + Duration::minutes(5),
            created_at: now,
        };
        let token = store.issue(input.clone()).await.unwrap().unwrap();

        let rotated = store
            .issue(IssueToken {
                token_hash: "second".to_string(),
                ..input.clone()
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rotated.id, token.id);
        assert!(store.find_by_hash("first").await.unwrap().is_none());

        // The rotated-out secret no longer consumes the row
        assert!(!store.consume(token.id, "first", now).await.unwrap());
        assert!(store.consume(rotated.id, &rotated.token_hash, now).await.unwrap());
        assert!(store.issue(input).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_message_dedup_by_external_id() {
        let store = MemoryStore::new();
        let new = NewMessage {
            external_id: Some("<abc@court.gov>".to_string()),
            sender_address: "clerk@court.gov".to_string(),
            sender_name: None,
            subject: "Notice".to_string(),
            body_text: String::new(),
            body_html: None,
            attachments: vec![],
            thread_id: None,
            metadata: serde_json::Value::Null,
        };
        let first = store.insert(new.clone().into_message(Utc::now())).await.unwrap();
        let second = store.insert(new.into_message(Utc::now())).await.unwrap();
        assert!(!first.is_duplicate());
        assert!(second.is_duplicate());
        assert_eq!(first.message().id, second.message().id);
    }
}

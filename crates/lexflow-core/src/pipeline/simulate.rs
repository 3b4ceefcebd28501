//! Simulator - dry-run of one rule against one stored message
//!
//! Runs the same matching, extraction and template expansion as the real
//! pipeline and asks the executor for a dry run. Nothing is persisted and no
//! handler is called.

use super::build_bundle;
use crate::catch::{CatchMatcher, MatchTrace};
use crate::despatch::UnresolvedPlaceholder;
use crate::directory::CaseDirectory;
use crate::executor::{ActionExecutor, ActionOutcome};
use crate::extract::FieldExtractor;
use crate::rules::{RuleStore, RuleWarning};
use chrono::Utc;
use lexflow_common::types::{MessageId, RuleId};
use lexflow_common::{Error, Result};
use lexflow_storage::models::{Action, AutomationRule, InboundMessage};
use lexflow_storage::repository::{MessageRepository, RuleRepository};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Simulation result
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub message_id: MessageId,
    pub rule_id: RuleId,
    pub matched: bool,
    pub trace: MatchTrace,
    pub warnings: Vec<RuleWarning>,
    pub extracted_fields: BTreeMap<String, String>,
    pub missing_fields: Vec<String>,
    pub unresolved: Vec<UnresolvedPlaceholder>,
    /// Expanded actions as a batch would hold them
    pub actions: Vec<Action>,
    pub execution_time_ms: u64,
    /// Dry-run outcome per enabled action; empty when the rule does not match
    pub results: Vec<ActionOutcome>,
}

/// Simulator
pub struct Simulator {
    rules: Arc<dyn RuleRepository>,
    messages: Arc<dyn MessageRepository>,
    directory: Arc<dyn CaseDirectory>,
    executor: Arc<ActionExecutor>,
}

impl Simulator {
    pub fn new(
        rules: Arc<dyn RuleRepository>,
        messages: Arc<dyn MessageRepository>,
        directory: Arc<dyn CaseDirectory>,
        executor: Arc<ActionExecutor>,
    ) -> Self {
        Self {
            rules,
            messages,
            directory,
            executor,
        }
    }

    pub async fn simulate(&self, message_id: MessageId, rule_id: RuleId) -> Result<SimulationReport> {
        let message = self
            .messages
            .get(message_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Message {} not found", message_id)))?;
        let rule = self
            .rules
            .get(rule_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Rule {} not found", rule_id)))?;

        Ok(self.simulate_rule(&message, &rule).await)
    }

    /// Simulate any rule, stored or not, against a message
    pub async fn simulate_rule(&self, message: &InboundMessage, rule: &AutomationRule) -> SimulationReport {
        let started = Instant::now();

        let trace = CatchMatcher::new().evaluate(&rule.catch_config, message);
        let extraction = FieldExtractor::new().extract(message, &rule.map_config);
        let bundle = build_bundle(
            self.directory.as_ref(),
            message,
            rule,
            &extraction.fields,
            Utc::now(),
        )
        .await;

        let results = if trace.matched {
            self.executor
                .execute(rule.id, &bundle.actions, true)
                .await
                .outcomes
        } else {
            Vec::new()
        };

        let execution_time_ms = started.elapsed().as_millis() as u64;
        debug!(
            rule_id = %rule.id,
            message_id = %message.id,
            matched = trace.matched,
            execution_time_ms,
            "Simulation finished"
        );

        SimulationReport {
            message_id: message.id,
            rule_id: rule.id,
            matched: trace.matched,
            trace,
            warnings: RuleStore::warnings(rule),
            extracted_fields: extraction.fields,
            missing_fields: extraction.misses,
            unresolved: bundle.unresolved,
            actions: bundle.actions,
            execution_time_ms,
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryCaseDirectory;
    use crate::executor::testing::{fast_config, ScriptedHandler};
    use crate::executor::{HandlerRegistry, OutcomeStatus};
    use lexflow_common::types::{ActionType, MessageSource, ProcessingStatus};
    use lexflow_storage::models::{
        ActionConfig, CatchConfig, CreateTaskConfig, MapDirective, NewMessage, RuleInput,
    };
    use lexflow_storage::repository::{BatchFilter, BatchRepository, ExecutionLogRepository};
    use lexflow_storage::MemoryStore;
    use pretty_assertions::assert_eq;

    async fn setup(catch_config: CatchConfig) -> (MemoryStore, Simulator, Arc<ScriptedHandler>, MessageId, RuleId) {
        let store = MemoryStore::new();
        let handler = ScriptedHandler::ok(ActionType::CreateTask);
        let executor = Arc::new(ActionExecutor::new(
            Arc::new(HandlerRegistry::new().with(handler.clone())),
            &fast_config(),
        ));
        let simulator = Simulator::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(MemoryCaseDirectory::default()),
            executor,
        );

        let message = NewMessage {
            sender_address: "clerk@court.gov".to_string(),
            subject: "Notice of hearing".to_string(),
            body_text: "Case No. 2024-117 set for 2024-06-03".to_string(),
            ..Default::default()
        }
        .into_message(Utc::now());
        let message_id = message.id;
        MessageRepository::insert(&store, message).await.unwrap();

        let rule_id = RuleRepository::create(
            &store,
            RuleInput {
                name: "Hearings".to_string(),
                description: None,
                is_active: false,
                priority: 0,
                approver_identity: None,
                catch_config,
                map_config: vec![
                    MapDirective {
                        source: MessageSource::Body,
                        anchor_text: "Case No.".to_string(),
                        target_field: "Case_No".to_string(),
                    },
                    MapDirective {
                        source: MessageSource::Subject,
                        anchor_text: "Ref:".to_string(),
                        target_field: "Reference".to_string(),
                    },
                ],
                action_bundle: vec![Action::new(ActionConfig::CreateTask(CreateTaskConfig {
                    title: "Prepare {Case_No}".to_string(),
                    description: None,
                    assignee: None,
                    due_in_days: None,
                }))],
            },
        )
        .await
        .unwrap()
        .id;

        (store, simulator, handler, message_id, rule_id)
    }

    #[tokio::test]
    async fn test_simulation_has_no_side_effects() {
        let (store, simulator, handler, message_id, rule_id) = setup(CatchConfig {
            subject_contains: Some("hearing".to_string()),
            ..Default::default()
        })
        .await;

        let report = simulator.simulate(message_id, rule_id).await.unwrap();

        assert!(report.matched);
        assert_eq!(report.extracted_fields.get("Case_No").map(String::as_str), Some("2024-117"));
        assert_eq!(report.missing_fields, vec!["Reference".to_string()]);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].status, OutcomeStatus::WouldExecute);
        assert!(report.warnings.is_empty());

        assert_eq!(handler.calls(), 0);
        let batches = BatchRepository::list(&store, BatchFilter::default(), 10, 0)
            .await
            .unwrap();
        assert!(batches.is_empty());
        let message = MessageRepository::get(&store, message_id).await.unwrap().unwrap();
        assert_eq!(message.processing_status, ProcessingStatus::Received);
        assert!(store.list_for_batch(rule_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unconditional_rule_reports_warning() {
        let (_, simulator, _, message_id, rule_id) = setup(CatchConfig::default()).await;
        let report = simulator.simulate(message_id, rule_id).await.unwrap();
        assert!(report.matched);
        assert!(report.trace.unconditional);
        assert_eq!(
            report.warnings,
            vec![RuleWarning::MatchesEverything { match_all: false }]
        );
    }

    #[tokio::test]
    async fn test_non_matching_rule_runs_nothing() {
        let (_, simulator, _, message_id, rule_id) = setup(CatchConfig {
            senders: vec!["@agency.gov".to_string()],
            ..Default::default()
        })
        .await;
        let report = simulator.simulate(message_id, rule_id).await.unwrap();
        assert!(!report.matched);
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn test_missing_rule() {
        let (_, simulator, _, message_id, _) = setup(CatchConfig::default()).await;
        let err = simulator
            .simulate(message_id, uuid::Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}

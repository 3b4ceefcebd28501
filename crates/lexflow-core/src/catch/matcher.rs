//! Catch Matcher
//!
//! Each condition category is evaluated independently. An absent condition
//! is vacuously satisfied; the rule matches when every configured category
//! passes. Within the sender list any single pattern is enough.

use crate::text::message_body;
use lexflow_storage::models::{CatchConfig, InboundMessage};
use serde::Serialize;
use tracing::debug;

/// Condition category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Sender,
    Subject,
    Body,
}

/// Evaluation of one condition category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionTrace {
    pub condition: ConditionKind,
    /// False when the category was not configured (vacuously satisfied)
    pub configured: bool,
    pub matched: bool,
    pub debug_info: Option<String>,
}

/// Outcome of matching one rule against one message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchTrace {
    pub matched: bool,
    /// No condition configured at all: the rule matches every message
    pub unconditional: bool,
    pub conditions: Vec<ConditionTrace>,
}

/// Catch Matcher
#[derive(Debug, Clone, Copy, Default)]
pub struct CatchMatcher;

impl CatchMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a rule's catch conditions against a message
    pub fn evaluate(&self, config: &CatchConfig, message: &InboundMessage) -> MatchTrace {
        let body = message_body(message);
        let conditions = vec![
            self.evaluate_senders(config, &message.sender_address),
            Self::evaluate_contains(ConditionKind::Subject, config.subject_condition(), &message.subject),
            Self::evaluate_contains(ConditionKind::Body, config.body_condition(), &body),
        ];

        let matched = conditions.iter().all(|c| c.matched);
        let unconditional = config.is_unconditional();

        debug!(
            message_id = %message.id,
            matched,
            unconditional,
            "Evaluated catch conditions"
        );

        MatchTrace {
            matched,
            unconditional,
            conditions,
        }
    }

    /// OR over sender patterns, bidirectional case-insensitive containment
    fn evaluate_senders(&self, config: &CatchConfig, sender: &str) -> ConditionTrace {
        let patterns: Vec<&str> = config.sender_patterns().collect();
        if patterns.is_empty() {
            return ConditionTrace::vacuous(ConditionKind::Sender);
        }

        let sender = sender.trim().to_lowercase();
        let hit = patterns.iter().find(|pattern| {
            let pattern = pattern.to_lowercase();
            !sender.is_empty() && (sender.contains(&pattern) || pattern.contains(&sender))
        });

        ConditionTrace {
            condition: ConditionKind::Sender,
            configured: true,
            matched: hit.is_some(),
            debug_info: Some(match hit {
                Some(pattern) => format!("sender matched pattern '{}'", pattern),
                None => format!("sender '{}' matched none of {} patterns", sender, patterns.len()),
            }),
        }
    }

    fn evaluate_contains(kind: ConditionKind, needle: Option<&str>, haystack: &str) -> ConditionTrace {
        let Some(needle) = needle else {
            return ConditionTrace::vacuous(kind);
        };

        let matched = haystack.to_lowercase().contains(&needle.to_lowercase());
        ConditionTrace {
            condition: kind,
            configured: true,
            matched,
            debug_info: Some(if matched {
                format!("contains '{}'", needle)
            } else {
                format!("does not contain '{}'", needle)
            }),
        }
    }
}

impl ConditionTrace {
    fn vacuous(condition: ConditionKind) -> Self {
        Self {
            condition,
            configured: false,
            matched: true,
            debug_info: None,
        }
    }
}

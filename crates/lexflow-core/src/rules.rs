//! Rule Store - validated access to automation rules

use crate::despatch::{duplicate_action_kind, DIRECTORY_PLACEHOLDERS, MESSAGE_PLACEHOLDERS};
use crate::text::placeholders;
use lexflow_common::types::{ActionType, MessageSource, RuleId};
use lexflow_common::{Error, Result};
use lexflow_storage::models::{Action, AutomationRule, CatchConfig, MapDirective, RuleInput};
use lexflow_storage::repository::RuleRepository;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Non-fatal problems reported alongside a saved rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleWarning {
    /// No catch condition is configured, so every message matches.
    /// The pipeline ignores such a rule unless `match_all` is set.
    MatchesEverything { match_all: bool },
    /// A template refers to a field nothing provides; it will stay unresolved
    UnknownPlaceholder {
        action_type: ActionType,
        placeholder: String,
    },
    /// Attachment extraction is accepted but never yields a value
    InertAttachmentSource { target_field: String },
}

/// A rule together with the warnings raised when it was saved
#[derive(Debug, Clone, Serialize)]
pub struct RuleWithWarnings {
    pub rule: AutomationRule,
    pub warnings: Vec<RuleWarning>,
}

/// Rule Store
pub struct RuleStore {
    rules: Arc<dyn RuleRepository>,
}

impl RuleStore {
    pub fn new(rules: Arc<dyn RuleRepository>) -> Self {
        Self { rules }
    }

    pub async fn create(&self, input: RuleInput) -> Result<RuleWithWarnings> {
        let warnings = validate(&input)?;
        let rule = self.rules.create(input).await?;
        info!(rule_id = %rule.id, name = %rule.name, "Rule created");
        Ok(with_warnings(rule, warnings))
    }

    pub async fn get(&self, id: RuleId) -> Result<AutomationRule> {
        self.rules
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Rule {} not found", id)))
    }

    pub async fn list(&self) -> Result<Vec<AutomationRule>> {
        self.rules.list().await
    }

    pub async fn update(&self, id: RuleId, input: RuleInput) -> Result<RuleWithWarnings> {
        let warnings = validate(&input)?;
        let rule = self
            .rules
            .update(id, input)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Rule {} not found", id)))?;
        info!(rule_id = %id, "Rule updated");
        Ok(with_warnings(rule, warnings))
    }

    pub async fn enable(&self, id: RuleId) -> Result<AutomationRule> {
        self.set_active(id, true).await
    }

    pub async fn disable(&self, id: RuleId) -> Result<AutomationRule> {
        self.set_active(id, false).await
    }

    async fn set_active(&self, id: RuleId, is_active: bool) -> Result<AutomationRule> {
        let rule = self
            .rules
            .set_active(id, is_active)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Rule {} not found", id)))?;
        info!(rule_id = %id, is_active, "Rule activation changed");
        Ok(rule)
    }

    pub async fn delete(&self, id: RuleId) -> Result<()> {
        if !self.rules.delete(id).await? {
            return Err(Error::NotFound(format!("Rule {} not found", id)));
        }
        info!(rule_id = %id, "Rule deleted");
        Ok(())
    }

    /// Warnings for a stored rule, as `simulate` reports them
    pub fn warnings(rule: &AutomationRule) -> Vec<RuleWarning> {
        collect_warnings(&rule.catch_config, &rule.map_config, &rule.action_bundle)
    }
}

fn with_warnings(rule: AutomationRule, warnings: Vec<RuleWarning>) -> RuleWithWarnings {
    for warning in &warnings {
        warn!(rule_id = %rule.id, warning = ?warning, "Rule saved with warning");
    }
    RuleWithWarnings { rule, warnings }
}

fn is_field_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Reject malformed input; return warnings for the rest
fn validate(input: &RuleInput) -> Result<Vec<RuleWarning>> {
    if input.name.trim().is_empty() {
        return Err(Error::Validation("Rule name must not be empty".to_string()));
    }

    for (i, directive) in input.map_config.iter().enumerate() {
        if directive.anchor_text.trim().is_empty() {
            return Err(Error::Validation(format!(
                "Map directive {} has an empty anchor text",
                i + 1
            )));
        }
        if !is_field_name(&directive.target_field) {
            return Err(Error::Validation(format!(
                "Map directive {} has an invalid target field '{}' (letters, digits and '_' only)",
                i + 1,
                directive.target_field
            )));
        }
    }

    if let Some(kind) = duplicate_action_kind(&input.action_bundle) {
        return Err(Error::Validation(format!(
            "Action '{}' appears more than once",
            kind
        )));
    }

    for action in &input.action_bundle {
        for text in action.config.text_fields() {
            if text.matches('{').count() != text.matches('}').count() {
                return Err(Error::Validation(format!(
                    "Unbalanced braces in {} template: {}",
                    action.action_type(),
                    text
                )));
            }
        }
    }

    Ok(collect_warnings(
        &input.catch_config,
        &input.map_config,
        &input.action_bundle,
    ))
}

fn collect_warnings(
    catch_config: &CatchConfig,
    map_config: &[MapDirective],
    actions: &[Action],
) -> Vec<RuleWarning> {
    let mut warnings = Vec::new();

    if catch_config.is_unconditional() {
        warnings.push(RuleWarning::MatchesEverything {
            match_all: catch_config.match_all,
        });
    }

    for directive in map_config {
        if directive.source == MessageSource::Attachment {
            warnings.push(RuleWarning::InertAttachmentSource {
                target_field: directive.target_field.clone(),
            });
        }
    }

    let known = |name: &str| {
        DIRECTORY_PLACEHOLDERS.contains(&name)
            || MESSAGE_PLACEHOLDERS.contains(&name)
            || map_config.iter().any(|d| d.target_field == name)
    };
    for action in actions {
        for text in action.config.text_fields() {
            for placeholder in placeholders(text) {
                let warning = RuleWarning::UnknownPlaceholder {
                    action_type: action.action_type(),
                    placeholder: placeholder.to_string(),
                };
                if !known(placeholder) && !warnings.contains(&warning) {
                    warnings.push(warning);
                }
            }
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexflow_storage::models::{ActionConfig, BillingConfig, CreateTaskConfig};
    use lexflow_storage::MemoryStore;
    use pretty_assertions::assert_eq;

    fn input() -> RuleInput {
        RuleInput {
            name: "Court notices".to_string(),
            description: None,
            is_active: true,
            priority: 10,
            approver_identity: None,
            catch_config: CatchConfig {
                senders: vec!["@court.gov".to_string()],
                ..Default::default()
            },
            map_config: vec![MapDirective {
                source: MessageSource::Body,
                anchor_text: "Case No.".to_string(),
                target_field: "Case_No".to_string(),
            }],
            action_bundle: vec![Action::new(ActionConfig::CreateTask(CreateTaskConfig {
                title: "Review {Case_No} for {Client_Name}".to_string(),
                description: None,
                assignee: None,
                due_in_days: None,
            }))],
        }
    }

    fn store() -> RuleStore {
        RuleStore::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_valid_rule_has_no_warnings() {
        let saved = store().create(input()).await.unwrap();
        assert!(saved.warnings.is_empty());
        assert_eq!(saved.rule.name, "Court notices");
    }

    #[tokio::test]
    async fn test_unconditional_rule_flagged() {
        let mut rule = input();
        rule.catch_config = CatchConfig::default();
        let saved = store().create(rule).await.unwrap();
        assert_eq!(
            saved.warnings,
            vec![RuleWarning::MatchesEverything { match_all: false }]
        );
    }

    #[tokio::test]
    async fn test_unknown_placeholder_and_attachment_source() {
        let mut rule = input();
        rule.map_config.push(MapDirective {
            source: MessageSource::Attachment,
            anchor_text: "Invoice".to_string(),
            target_field: "Invoice_No".to_string(),
        });
        rule.action_bundle.push(Action::new(ActionConfig::Billing(BillingConfig {
            hours: 0.1,
            rate: None,
            description: "{Matter_Code}".to_string(),
        })));

        let saved = store().create(rule).await.unwrap();
        assert_eq!(
            saved.warnings,
            vec![
                RuleWarning::InertAttachmentSource {
                    target_field: "Invoice_No".to_string()
                },
                RuleWarning::UnknownPlaceholder {
                    action_type: ActionType::Billing,
                    placeholder: "Matter_Code".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_rules_rejected() {
        let rules = store();

        let mut blank = input();
        blank.name = "  ".to_string();
        assert!(matches!(rules.create(blank).await, Err(Error::Validation(_))));

        let mut bad_target = input();
        bad_target.map_config[0].target_field = "Case No".to_string();
        assert!(matches!(rules.create(bad_target).await, Err(Error::Validation(_))));

        let mut duplicate = input();
        duplicate.action_bundle.push(duplicate.action_bundle[0].clone());
        assert!(matches!(rules.create(duplicate).await, Err(Error::Validation(_))));

        let mut braces = input();
        braces.action_bundle[0] = Action::new(ActionConfig::CreateTask(CreateTaskConfig {
            title: "Review {Case_No".to_string(),
            description: None,
            assignee: None,
            due_in_days: None,
        }));
        assert!(matches!(rules.create(braces).await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_enable_disable_delete() {
        let rules = store();
        let id = rules.create(input()).await.unwrap().rule.id;

        assert!(!rules.disable(id).await.unwrap().is_active);
        assert!(rules.enable(id).await.unwrap().is_active);
        rules.delete(id).await.unwrap();
        assert!(matches!(rules.get(id).await, Err(Error::NotFound(_))));
        assert!(matches!(rules.delete(id).await, Err(Error::NotFound(_))));
    }
}

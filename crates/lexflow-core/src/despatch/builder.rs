//! Action Bundle Builder

use super::template::TemplateContext;
use lexflow_common::types::ActionType;
use lexflow_storage::models::Action;
use serde::Serialize;
use tracing::debug;

/// A placeholder that could not be resolved for one action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnresolvedPlaceholder {
    pub action_type: ActionType,
    pub placeholder: String,
}

/// Concrete per-message action list
#[derive(Debug, Clone, Serialize)]
pub struct BuiltBundle {
    pub actions: Vec<Action>,
    pub unresolved: Vec<UnresolvedPlaceholder>,
}

/// Expands rule action templates into a batch snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionBundleBuilder;

impl ActionBundleBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Render every template field of every action, keeping order and
    /// `enabled` flags. Unresolved placeholders stay in the text and are
    /// reported; the executor skips actions that still depend on them.
    pub fn build(&self, templates: &[Action], context: &TemplateContext) -> BuiltBundle {
        let mut unresolved = Vec::new();
        let actions = templates
            .iter()
            .map(|template| {
                let action_type = template.action_type();
                let config = template.config.map_text(|text| {
                    let rendered = context.render(text);
                    for placeholder in rendered.unresolved {
                        let entry = UnresolvedPlaceholder {
                            action_type,
                            placeholder,
                        };
                        if !unresolved.contains(&entry) {
                            unresolved.push(entry);
                        }
                    }
                    rendered.text
                });
                Action {
                    enabled: template.enabled,
                    config,
                }
            })
            .collect::<Vec<_>>();

        if !unresolved.is_empty() {
            debug!(count = unresolved.len(), "Bundle has unresolved placeholders");
        }

        BuiltBundle {
            actions,
            unresolved,
        }
    }
}

/// First action kind that appears more than once in a bundle
pub fn duplicate_action_kind(actions: &[Action]) -> Option<ActionType> {
    let mut seen = Vec::with_capacity(actions.len());
    for action in actions {
        let kind = action.action_type();
        if seen.contains(&kind) {
            return Some(kind);
        }
        seen.push(kind);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexflow_storage::models::{ActionConfig, BillingConfig, SendEmailConfig};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_renders_and_flags() {
        let templates = vec![
            Action::new(ActionConfig::SendEmail(SendEmailConfig {
                to: "{Client_Email}".to_string(),
                cc: None,
                subject: "Your case {Case_No}".to_string(),
                body: "Hearing on {Hearing_Date}".to_string(),
            })),
            Action::new(ActionConfig::Billing(BillingConfig {
                hours: 0.2,
                rate: None,
                description: "Review notice for {Case_No}".to_string(),
            }))
            .disabled(),
        ];
        let mut context = TemplateContext::new();
        context.insert("Case_No", "2024-117");
        context.insert("Hearing_Date", "2024-05-02");

        let built = ActionBundleBuilder::new().build(&templates, &context);
        assert_eq!(built.actions.len(), 2);
        assert!(!built.actions[1].enabled);
        match &built.actions[0].config {
            ActionConfig::SendEmail(c) => {
                assert_eq!(c.to, "{Client_Email}");
                assert_eq!(c.subject, "Your case 2024-117");
                assert_eq!(c.body, "Hearing on 2024-05-02");
            }
            other => panic!("unexpected config {:?}", other),
        }
        assert_eq!(
            built.unresolved,
            vec![UnresolvedPlaceholder {
                action_type: ActionType::SendEmail,
                placeholder: "Client_Email".to_string(),
            }]
        );
    }
}

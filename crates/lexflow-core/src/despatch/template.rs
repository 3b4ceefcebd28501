//! Placeholder resolution for action templates

use crate::directory::CaseRecord;
use crate::text::placeholder_regex;
use chrono::{DateTime, Utc};
use lexflow_storage::models::InboundMessage;
use regex::Captures;
use std::collections::BTreeMap;

/// Placeholders filled from the case directory
pub const DIRECTORY_PLACEHOLDERS: [&str; 5] = [
    "Client_Name",
    "Client_Email",
    "Case_No",
    "Case_Title",
    "Responsible_Lawyer",
];

/// Placeholders filled from the message and the clock
pub const MESSAGE_PLACEHOLDERS: [&str; 4] = ["Mail_Subject", "Mail_From", "Mail_Date", "Today"];

/// Result of rendering one template string
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub text: String,
    /// Placeholders left in place because nothing resolved them
    pub unresolved: Vec<String>,
}

/// Values available to `{Field}` placeholders
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    values: BTreeMap<String, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the context for a message. Precedence, lowest first: case
    /// directory, message/clock tokens, extracted fields.
    pub fn for_message(
        message: &InboundMessage,
        case: Option<&CaseRecord>,
        fields: &BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut context = Self::new();
        if let Some(case) = case {
            context.values.extend(case.placeholders());
        }

        let from = match &message.sender_name {
            Some(name) if !name.is_empty() => format!("{} <{}>", name, message.sender_address),
            _ => message.sender_address.clone(),
        };
        context.insert("Mail_Subject", &message.subject);
        context.insert("Mail_From", &from);
        context.insert("Mail_Date", &message.received_at.format("%Y-%m-%d").to_string());
        context.insert("Today", &now.format("%Y-%m-%d").to_string());

        context
            .values
            .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        context
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Replace every known placeholder; unknown ones pass through unchanged
    pub fn render(&self, template: &str) -> Rendered {
        let mut unresolved = Vec::new();
        let text = placeholder_regex()
            .replace_all(template, |caps: &Captures| {
                let name = &caps[1];
                match self.values.get(name) {
                    Some(value) => value.clone(),
                    None => {
                        if !unresolved.iter().any(|u| u == name) {
                            unresolved.push(name.to_string());
                        }
                        caps[0].to_string()
                    }
                }
            })
            .into_owned();

        Rendered { text, unresolved }
    }
}

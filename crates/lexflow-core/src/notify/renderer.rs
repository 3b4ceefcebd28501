//! Notification Renderer
//!
//! Human-readable action labels live here and nowhere else.

use crate::links::Links;
use lexflow_common::types::{ActionType, ExecutionStatus};
use lexflow_storage::models::{Action, ActionConfig, ApprovalBatch, ExecutionLogEntry};
use serde::Serialize;
use std::fmt::Write;

/// A rendered plain-text message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedNotification {
    pub subject: String,
    pub body: String,
}

/// Display name of an action kind
pub fn action_label(action_type: ActionType) -> &'static str {
    match action_type {
        ActionType::SendEmail => "Send email",
        ActionType::CreateTask => "Create task",
        ActionType::Billing => "Record billable time",
        ActionType::CalendarEvent => "Add calendar event",
        ActionType::SaveFile => "File documents",
        ActionType::CreateAlert => "Raise alert",
    }
}

fn describe(action: &Action) -> String {
    match &action.config {
        ActionConfig::SendEmail(c) => format!("to {}: \"{}\"", c.to, c.subject),
        ActionConfig::CreateTask(c) => match &c.assignee {
            Some(assignee) => format!("\"{}\" for {}", c.title, assignee),
            None => format!("\"{}\"", c.title),
        },
        ActionConfig::Billing(c) => match c.rate {
            Some(rate) => format!("{:.2} h at {:.2}: {}", c.hours, rate, c.description),
            None => format!("{:.2} h: {}", c.hours, c.description),
        },
        ActionConfig::CalendarEvent(c) => format!("\"{}\" on {}", c.title, c.date),
        ActionConfig::SaveFile(c) => format!("into {}", c.folder),
        ActionConfig::CreateAlert(c) => c.message.clone(),
    }
}

/// Notification Renderer
#[derive(Debug, Clone)]
pub struct NotificationRenderer {
    links: Links,
    window_minutes: i64,
}

impl NotificationRenderer {
    pub fn new(links: Links, window_minutes: i64) -> Self {
        Self {
            links,
            window_minutes,
        }
    }

    /// Approval request with the quick link and the edit link
    pub fn approval_request(&self, batch: &ApprovalBatch, token: &str) -> RenderedNotification {
        let mut body = String::new();
        let _ = writeln!(body, "A message matched the rule \"{}\".", batch.rule_name);
        let _ = writeln!(body);
        let _ = writeln!(body, "From:    {}", batch.mail_from);
        let _ = writeln!(body, "Subject: {}", batch.mail_subject);
        let _ = writeln!(body);
        let _ = writeln!(body, "Proposed actions:");

        let mut enabled = 0;
        for action in &batch.actions_current {
            let marker = if action.enabled {
                enabled += 1;
                "[x]"
            } else {
                "[ ]"
            };
            let _ = writeln!(
                body,
                "  {} {}: {}",
                marker,
                action_label(action.action_type()),
                describe(action)
            );
        }

        let _ = writeln!(body);
        if enabled > 0 {
            let _ = writeln!(
                body,
                "Approve all checked actions (link valid for {} minutes, single use):",
                self.window_minutes
            );
            let _ = writeln!(body, "  {}", self.links.approve_url(token));
            let _ = writeln!(body);
        }
        let _ = writeln!(body, "Review or edit before approving:");
        let _ = writeln!(body, "  {}", self.links.edit_url(batch.id));

        RenderedNotification {
            subject: format!("[Approval needed] {}: {}", batch.rule_name, batch.mail_subject),
            body,
        }
    }

    /// Confirmation after execution
    pub fn execution_report(&self, batch: &ApprovalBatch, entries: &[ExecutionLogEntry]) -> RenderedNotification {
        let mut body = String::new();
        let _ = writeln!(body, "Actions for \"{}\" were executed.", batch.mail_subject);
        if let Some(summary) = batch.execution_summary {
            let _ = writeln!(
                body,
                "{} total, {} succeeded, {} failed, {} skipped.",
                summary.total, summary.success, summary.failed, summary.skipped
            );
        }
        let _ = writeln!(body);

        for entry in entries {
            let status = match entry.status {
                ExecutionStatus::Success => "done",
                ExecutionStatus::Failed => "FAILED",
                ExecutionStatus::Skipped => "skipped",
            };
            let _ = write!(body, "  {} - {}", action_label(entry.action_type), status);
            if let Some(error) = &entry.error {
                let _ = write!(body, " ({})", error);
            }
            let _ = writeln!(body);
        }

        let _ = writeln!(body);
        let _ = writeln!(body, "Details: {}", self.links.edit_url(batch.id));

        RenderedNotification {
            subject: format!("[Executed] {}: {}", batch.rule_name, batch.mail_subject),
            body,
        }
    }
}

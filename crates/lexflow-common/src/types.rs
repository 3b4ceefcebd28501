//! Common types for Lexflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for automation rules
pub type RuleId = Uuid;

/// Unique identifier for inbound messages
pub type MessageId = Uuid;

/// Unique identifier for approval batches
pub type BatchId = Uuid;

/// Unique identifier for approval tokens (the row, not the secret)
pub type TokenId = Uuid;

/// Unique identifier for execution log entries
pub type LogEntryId = Uuid;

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;

/// The closed set of side-effecting action kinds a rule can propose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SendEmail,
    CreateTask,
    Billing,
    CalendarEvent,
    SaveFile,
    CreateAlert,
}

impl ActionType {
    /// All action kinds, in canonical order
    pub const ALL: [ActionType; 6] = [
        ActionType::SendEmail,
        ActionType::CreateTask,
        ActionType::Billing,
        ActionType::CalendarEvent,
        ActionType::SaveFile,
        ActionType::CreateAlert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::SendEmail => "send_email",
            ActionType::CreateTask => "create_task",
            ActionType::Billing => "billing",
            ActionType::CalendarEvent => "calendar_event",
            ActionType::SaveFile => "save_file",
            ActionType::CreateAlert => "create_alert",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| crate::Error::Validation(format!("Unknown action type: {}", s)))
    }
}

/// Approval batch lifecycle status
///
/// `Pending` is the single open state: the UI "editing" annotation carries
/// no behaviour and is not modelled. Every other state is terminal with
/// respect to editing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Approved,
    Executing,
    Executed,
    Cancelled,
    Failed,
    Expired,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Approved => "approved",
            BatchStatus::Executing => "executing",
            BatchStatus::Executed => "executed",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Failed => "failed",
            BatchStatus::Expired => "expired",
        }
    }

    /// Whether actions may still be edited, approved or cancelled
    pub fn is_open(&self) -> bool {
        matches!(self, BatchStatus::Pending)
    }

    /// Whether the batch still occupies the "one active batch per message" slot
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            BatchStatus::Pending | BatchStatus::Approved | BatchStatus::Executing
        )
    }

    /// Statuses that count as active, for storage guards
    pub const ACTIVE: [BatchStatus; 3] = [
        BatchStatus::Pending,
        BatchStatus::Approved,
        BatchStatus::Executing,
    ];
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "approved" => Ok(BatchStatus::Approved),
            "executing" => Ok(BatchStatus::Executing),
            "executed" => Ok(BatchStatus::Executed),
            "cancelled" => Ok(BatchStatus::Cancelled),
            "failed" => Ok(BatchStatus::Failed),
            "expired" => Ok(BatchStatus::Expired),
            _ => Err(crate::Error::Validation(format!(
                "Invalid batch status: {}",
                s
            ))),
        }
    }
}

/// Outcome of one executed action, as recorded in the execution log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            "skipped" => Ok(ExecutionStatus::Skipped),
            _ => Err(crate::Error::Validation(format!(
                "Invalid execution status: {}",
                s
            ))),
        }
    }
}

/// Display-only projection of pipeline/batch state onto a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Received,
    NoMatch,
    AwaitingApproval,
    Approved,
    Executing,
    Executed,
    Cancelled,
    Expired,
    Failed,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Received => "received",
            ProcessingStatus::NoMatch => "no_match",
            ProcessingStatus::AwaitingApproval => "awaiting_approval",
            ProcessingStatus::Approved => "approved",
            ProcessingStatus::Executing => "executing",
            ProcessingStatus::Executed => "executed",
            ProcessingStatus::Cancelled => "cancelled",
            ProcessingStatus::Expired => "expired",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Error => "error",
        }
    }
}

impl From<BatchStatus> for ProcessingStatus {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Pending => ProcessingStatus::AwaitingApproval,
            BatchStatus::Approved => ProcessingStatus::Approved,
            BatchStatus::Executing => ProcessingStatus::Executing,
            BatchStatus::Executed => ProcessingStatus::Executed,
            BatchStatus::Cancelled => ProcessingStatus::Cancelled,
            BatchStatus::Failed => ProcessingStatus::Failed,
            BatchStatus::Expired => ProcessingStatus::Expired,
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(ProcessingStatus::Received),
            "no_match" => Ok(ProcessingStatus::NoMatch),
            "awaiting_approval" => Ok(ProcessingStatus::AwaitingApproval),
            "approved" => Ok(ProcessingStatus::Approved),
            "executing" => Ok(ProcessingStatus::Executing),
            "executed" => Ok(ProcessingStatus::Executed),
            "cancelled" => Ok(ProcessingStatus::Cancelled),
            "expired" => Ok(ProcessingStatus::Expired),
            "failed" => Ok(ProcessingStatus::Failed),
            "error" => Ok(ProcessingStatus::Error),
            _ => Err(crate::Error::Validation(format!(
                "Invalid processing status: {}",
                s
            ))),
        }
    }
}

/// Which part of a message a map directive reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    Subject,
    Body,
    /// Reserved; extraction from attachments always yields nothing
    Attachment,
}

/// Paginated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub limit: i64,
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_roundtrip_names() {
        for action_type in ActionType::ALL {
            let parsed: ActionType = action_type.as_str().parse().unwrap();
            assert_eq!(parsed, action_type);
        }
        assert!("fax".parse::<ActionType>().is_err());
    }

    #[test]
    fn test_action_type_serde_tag() {
        let json = serde_json::to_string(&ActionType::CalendarEvent).unwrap();
        assert_eq!(json, "\"calendar_event\"");
    }

    #[test]
    fn test_batch_status_classes() {
        assert!(BatchStatus::Pending.is_open());
        assert!(!BatchStatus::Approved.is_open());
        assert!(BatchStatus::Executing.is_active());
        assert!(!BatchStatus::Executed.is_active());
        assert!(!BatchStatus::Expired.is_active());
        assert_eq!("cancelled".parse::<BatchStatus>().unwrap(), BatchStatus::Cancelled);
    }

    #[test]
    fn test_processing_status_projection() {
        assert_eq!(
            ProcessingStatus::from(BatchStatus::Pending),
            ProcessingStatus::AwaitingApproval
        );
        assert_eq!(ProcessingStatus::from(BatchStatus::Failed).to_string(), "failed");
    }
}

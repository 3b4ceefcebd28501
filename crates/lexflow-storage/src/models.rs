//! Domain models
//!
//! These are the persisted shapes of rules, messages, approval batches,
//! tokens and execution log entries. Database row types live next to the
//! PostgreSQL repositories and convert into these.

use chrono::{DateTime, Utc};
use lexflow_common::types::{
    ActionType, BatchId, BatchStatus, ExecutionStatus, LogEntryId, MessageId, MessageSource,
    ProcessingStatus, RuleId, TokenId,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Rules
// ============================================================================

/// Catch conditions of a rule
///
/// Senders are OR-combined; the three categories are AND-combined. A blank
/// or missing condition is vacuously satisfied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatchConfig {
    #[serde(default)]
    pub senders: Vec<String>,
    #[serde(default)]
    pub subject_contains: Option<String>,
    #[serde(default)]
    pub body_contains: Option<String>,
    /// Explicit opt-in for rules with no condition at all
    #[serde(default)]
    pub match_all: bool,
}

impl CatchConfig {
    /// Sender patterns that are not blank
    pub fn sender_patterns(&self) -> impl Iterator<Item = &str> {
        self.senders
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    pub fn subject_condition(&self) -> Option<&str> {
        non_blank(self.subject_contains.as_deref())
    }

    pub fn body_condition(&self) -> Option<&str> {
        non_blank(self.body_contains.as_deref())
    }

    /// True when no condition is configured, so every message matches
    pub fn is_unconditional(&self) -> bool {
        self.sender_patterns().next().is_none()
            && self.subject_condition().is_none()
            && self.body_condition().is_none()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// One anchor-text extraction directive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapDirective {
    pub source: MessageSource,
    pub anchor_text: String,
    pub target_field: String,
}

/// Automation rule model (Catch / Map / Despatch)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: RuleId,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    /// Higher priority rules are evaluated first
    pub priority: i32,
    /// Who may use the quick-approval link for batches of this rule
    pub approver_identity: Option<String>,
    pub catch_config: CatchConfig,
    pub map_config: Vec<MapDirective>,
    /// Action templates, at most one per action kind
    pub action_bundle: Vec<Action>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create/update rule input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub approver_identity: Option<String>,
    #[serde(default)]
    pub catch_config: CatchConfig,
    #[serde(default)]
    pub map_config: Vec<MapDirective>,
    #[serde(default)]
    pub action_bundle: Vec<Action>,
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Messages
// ============================================================================

/// Attachment metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub filename: Option<String>,
    pub content_type: String,
    pub size: usize,
}

/// Inbound message model
///
/// Immutable once received apart from `processing_status` and
/// `matched_rule_id`, which are a display projection of batch state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: MessageId,
    /// `Message-ID` header, used for deduplication
    pub external_id: Option<String>,
    pub sender_address: String,
    pub sender_name: Option<String>,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentMeta>,
    pub thread_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub processing_status: ProcessingStatus,
    pub matched_rule_id: Option<RuleId>,
}

/// Inbound message input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMessage {
    #[serde(default)]
    pub external_id: Option<String>,
    pub sender_address: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body_text: String,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentMeta>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl NewMessage {
    /// Materialize into a freshly received message
    pub fn into_message(self, received_at: DateTime<Utc>) -> InboundMessage {
        InboundMessage {
            id: uuid::Uuid::now_v7(),
            external_id: self.external_id,
            sender_address: self.sender_address,
            sender_name: self.sender_name,
            subject: self.subject,
            body_text: self.body_text,
            body_html: self.body_html,
            attachments: self.attachments,
            thread_id: self.thread_id,
            metadata: if self.metadata.is_null() {
                serde_json::json!({})
            } else {
                self.metadata
            },
            received_at,
            processing_status: ProcessingStatus::Received,
            matched_rule_id: None,
        }
    }
}

// ============================================================================
// Actions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEmailConfig {
    pub to: String,
    #[serde(default)]
    pub cc: Option<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTaskConfig {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub due_in_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingConfig {
    pub hours: f64,
    #[serde(default)]
    pub rate: Option<f64>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEventConfig {
    pub title: String,
    /// Date text, usually a placeholder such as `{Hearing_Date}`
    pub date: String,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveFileConfig {
    pub folder: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default = "default_true")]
    pub include_attachments: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAlertConfig {
    pub message: String,
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// Type-specific action configuration, one variant per action kind
#[derive(Debug, Clone, PartialEq)]
pub enum ActionConfig {
    SendEmail(SendEmailConfig),
    CreateTask(CreateTaskConfig),
    Billing(BillingConfig),
    CalendarEvent(CalendarEventConfig),
    SaveFile(SaveFileConfig),
    CreateAlert(CreateAlertConfig),
}

impl ActionConfig {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionConfig::SendEmail(_) => ActionType::SendEmail,
            ActionConfig::CreateTask(_) => ActionType::CreateTask,
            ActionConfig::Billing(_) => ActionType::Billing,
            ActionConfig::CalendarEvent(_) => ActionType::CalendarEvent,
            ActionConfig::SaveFile(_) => ActionType::SaveFile,
            ActionConfig::CreateAlert(_) => ActionType::CreateAlert,
        }
    }

    /// Decode a config object for the given kind
    pub fn from_value(
        action_type: ActionType,
        value: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match action_type {
            ActionType::SendEmail => ActionConfig::SendEmail(serde_json::from_value(value)?),
            ActionType::CreateTask => ActionConfig::CreateTask(serde_json::from_value(value)?),
            ActionType::Billing => ActionConfig::Billing(serde_json::from_value(value)?),
            ActionType::CalendarEvent => {
                ActionConfig::CalendarEvent(serde_json::from_value(value)?)
            }
            ActionType::SaveFile => ActionConfig::SaveFile(serde_json::from_value(value)?),
            ActionType::CreateAlert => ActionConfig::CreateAlert(serde_json::from_value(value)?),
        })
    }

    /// Encode the inner config object
    pub fn to_value(&self) -> serde_json::Value {
        let encoded = match self {
            ActionConfig::SendEmail(c) => serde_json::to_value(c),
            ActionConfig::CreateTask(c) => serde_json::to_value(c),
            ActionConfig::Billing(c) => serde_json::to_value(c),
            ActionConfig::CalendarEvent(c) => serde_json::to_value(c),
            ActionConfig::SaveFile(c) => serde_json::to_value(c),
            ActionConfig::CreateAlert(c) => serde_json::to_value(c),
        };
        encoded.unwrap_or(serde_json::Value::Null)
    }

    /// Every templated text field
    pub fn text_fields(&self) -> Vec<&str> {
        match self {
            ActionConfig::SendEmail(c) => {
                let mut fields = vec![c.to.as_str(), c.subject.as_str(), c.body.as_str()];
                fields.extend(c.cc.as_deref());
                fields
            }
            ActionConfig::CreateTask(c) => {
                let mut fields = vec![c.title.as_str()];
                fields.extend(c.description.as_deref());
                fields.extend(c.assignee.as_deref());
                fields
            }
            ActionConfig::Billing(c) => vec![c.description.as_str()],
            ActionConfig::CalendarEvent(c) => {
                let mut fields = vec![c.title.as_str(), c.date.as_str()];
                fields.extend(c.location.as_deref());
                fields
            }
            ActionConfig::SaveFile(c) => {
                let mut fields = vec![c.folder.as_str()];
                fields.extend(c.file_name.as_deref());
                fields
            }
            ActionConfig::CreateAlert(c) => {
                let mut fields = vec![c.message.as_str()];
                fields.extend(c.recipients.iter().map(String::as_str));
                fields
            }
        }
    }

    /// Rewrite every templated text field through `f`
    pub fn map_text<F>(&self, mut f: F) -> ActionConfig
    where
        F: FnMut(&str) -> String,
    {
        match self {
            ActionConfig::SendEmail(c) => ActionConfig::SendEmail(SendEmailConfig {
                to: f(&c.to),
                cc: c.cc.as_deref().map(&mut f),
                subject: f(&c.subject),
                body: f(&c.body),
            }),
            ActionConfig::CreateTask(c) => ActionConfig::CreateTask(CreateTaskConfig {
                title: f(&c.title),
                description: c.description.as_deref().map(&mut f),
                assignee: c.assignee.as_deref().map(&mut f),
                due_in_days: c.due_in_days,
            }),
            ActionConfig::Billing(c) => ActionConfig::Billing(BillingConfig {
                hours: c.hours,
                rate: c.rate,
                description: f(&c.description),
            }),
            ActionConfig::CalendarEvent(c) => ActionConfig::CalendarEvent(CalendarEventConfig {
                title: f(&c.title),
                date: f(&c.date),
                duration_minutes: c.duration_minutes,
                location: c.location.as_deref().map(&mut f),
            }),
            ActionConfig::SaveFile(c) => ActionConfig::SaveFile(SaveFileConfig {
                folder: f(&c.folder),
                file_name: c.file_name.as_deref().map(&mut f),
                include_attachments: c.include_attachments,
            }),
            ActionConfig::CreateAlert(c) => ActionConfig::CreateAlert(CreateAlertConfig {
                message: f(&c.message),
                recipients: c.recipients.iter().map(|r| f(r.as_str())).collect(),
            }),
        }
    }
}

/// Wire shape of an action: `{action_type, enabled, config}`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawAction {
    action_type: ActionType,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    config: serde_json::Value,
}

/// One proposed side effect inside a rule bundle or batch snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAction", into = "RawAction")]
pub struct Action {
    pub enabled: bool,
    pub config: ActionConfig,
}

impl Action {
    pub fn new(config: ActionConfig) -> Self {
        Self {
            enabled: true,
            config,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn action_type(&self) -> ActionType {
        self.config.action_type()
    }
}

impl TryFrom<RawAction> for Action {
    type Error = String;

    fn try_from(raw: RawAction) -> Result<Self, Self::Error> {
        let config = ActionConfig::from_value(raw.action_type, raw.config)
            .map_err(|e| format!("invalid {} config: {}", raw.action_type, e))?;
        Ok(Action {
            enabled: raw.enabled,
            config,
        })
    }
}

impl From<Action> for RawAction {
    fn from(action: Action) -> Self {
        RawAction {
            action_type: action.action_type(),
            enabled: action.enabled,
            config: action.config.to_value(),
        }
    }
}

/// Number of enabled actions in a list
pub fn enabled_count(actions: &[Action]) -> u32 {
    actions.iter().filter(|a| a.enabled).count() as u32
}

// ============================================================================
// Approval batches
// ============================================================================

/// Aggregate outcome of one execution run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total: u32,
    pub success: u32,
    pub failed: u32,
    pub skipped: u32,
}

/// Approval batch model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalBatch {
    pub id: BatchId,
    pub message_id: MessageId,
    pub rule_id: RuleId,
    pub rule_name: String,
    pub mail_subject: String,
    pub mail_from: String,
    pub actions_current: Vec<Action>,
    pub status: BatchStatus,
    /// Quick-link expiry; immutable after creation
    pub expires_at: DateTime<Utc>,
    pub approver_identity: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub failure_reason: Option<String>,
    pub execution_summary: Option<ExecutionSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ApprovalBatch {
    pub fn enabled_action_count(&self) -> u32 {
        enabled_count(&self.actions_current)
    }

    /// Whether the quick-approval window has passed
    pub fn link_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Create batch input
#[derive(Debug, Clone)]
pub struct CreateBatch {
    pub message_id: MessageId,
    pub rule_id: RuleId,
    pub rule_name: String,
    pub mail_subject: String,
    pub mail_from: String,
    pub actions: Vec<Action>,
    pub expires_at: DateTime<Utc>,
    pub approver_identity: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CreateBatch {
    pub fn into_batch(self) -> ApprovalBatch {
        ApprovalBatch {
            id: uuid::Uuid::now_v7(),
            message_id: self.message_id,
            rule_id: self.rule_id,
            rule_name: self.rule_name,
            mail_subject: self.mail_subject,
            mail_from: self.mail_from,
            actions_current: self.actions,
            status: BatchStatus::Pending,
            expires_at: self.expires_at,
            approver_identity: self.approver_identity,
            approved_by: None,
            approved_at: None,
            cancel_reason: None,
            failure_reason: None,
            execution_summary: None,
            created_at: self.created_at,
            updated_at: self.created_at,
            finished_at: None,
        }
    }
}

/// Result of creating a batch for a message
#[derive(Debug, Clone)]
pub enum CreateBatchOutcome {
    /// A new pending batch was stored
    Created(ApprovalBatch),
    /// The message already had an active batch, which is returned instead
    Existing(ApprovalBatch),
}

impl CreateBatchOutcome {
    pub fn batch(&self) -> &ApprovalBatch {
        match self {
            CreateBatchOutcome::Created(b) | CreateBatchOutcome::Existing(b) => b,
        }
    }

    pub fn into_batch(self) -> ApprovalBatch {
        match self {
            CreateBatchOutcome::Created(b) | CreateBatchOutcome::Existing(b) => b,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, CreateBatchOutcome::Created(_))
    }
}

/// A conditional status change, applied atomically by the repository
///
/// The change happens only if the current status is in `from` and every
/// guard holds; otherwise nothing is written.
#[derive(Debug, Clone)]
pub struct BatchTransition {
    pub from: Vec<BatchStatus>,
    pub to: BatchStatus,
    /// Replacement action snapshot, saved in the same write
    pub actions: Option<Vec<Action>>,
    pub approved_by: Option<String>,
    pub cancel_reason: Option<String>,
    pub failure_reason: Option<String>,
    pub execution_summary: Option<ExecutionSummary>,
    /// Refuse unless the resulting snapshot has an enabled action
    pub require_enabled_action: bool,
    /// Refuse unless `expires_at` is after this instant
    pub link_valid_at: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

impl BatchTransition {
    fn new(from: &[BatchStatus], to: BatchStatus, at: DateTime<Utc>) -> Self {
        Self {
            from: from.to_vec(),
            to,
            actions: None,
            approved_by: None,
            cancel_reason: None,
            failure_reason: None,
            execution_summary: None,
            require_enabled_action: false,
            link_valid_at: None,
            at,
        }
    }

    /// pending -> approved, optionally saving edited actions first
    pub fn approve(approved_by: Option<String>, actions: Option<Vec<Action>>, at: DateTime<Utc>) -> Self {
        let mut t = Self::new(&[BatchStatus::Pending], BatchStatus::Approved, at);
        t.approved_by = approved_by;
        t.actions = actions;
        t.require_enabled_action = true;
        t
    }

    /// pending -> approved through the quick link, which must still be valid
    pub fn approve_via_link(approved_by: Option<String>, at: DateTime<Utc>) -> Self {
        let mut t = Self::approve(approved_by, None, at);
        t.link_valid_at = Some(at);
        t
    }

    /// approved -> executing
    pub fn start_execution(at: DateTime<Utc>) -> Self {
        let mut t = Self::new(&[BatchStatus::Approved], BatchStatus::Executing, at);
        t.require_enabled_action = true;
        t
    }

    /// executing -> executed
    pub fn complete(summary: ExecutionSummary, at: DateTime<Utc>) -> Self {
        let mut t = Self::new(&[BatchStatus::Executing], BatchStatus::Executed, at);
        t.execution_summary = Some(summary);
        t
    }

    /// approved/executing -> failed, for executor-level failures only
    pub fn fail(reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        let mut t = Self::new(
            &[BatchStatus::Approved, BatchStatus::Executing],
            BatchStatus::Failed,
            at,
        );
        t.failure_reason = Some(reason.into());
        t
    }

    /// pending -> cancelled
    pub fn cancel(reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        let mut t = Self::new(&[BatchStatus::Pending], BatchStatus::Cancelled, at);
        t.cancel_reason = Some(reason.into());
        t
    }

    /// pending -> expired
    pub fn expire(at: DateTime<Utc>) -> Self {
        Self::new(&[BatchStatus::Pending], BatchStatus::Expired, at)
    }

    /// Check guards and, if they hold, mutate `batch`. Returns whether it applied.
    pub fn apply(&self, batch: &mut ApprovalBatch) -> bool {
        if !self.from.contains(&batch.status) {
            return false;
        }
        if let Some(at) = self.link_valid_at {
            if batch.expires_at <= at {
                return false;
            }
        }
        let actions = self.actions.as_ref().unwrap_or(&batch.actions_current);
        if self.require_enabled_action && enabled_count(actions) == 0 {
            return false;
        }

        if let Some(actions) = &self.actions {
            batch.actions_current = actions.clone();
        }
        batch.status = self.to;
        if self.to == BatchStatus::Approved {
            batch.approved_at = Some(self.at);
            if self.approved_by.is_some() {
                batch.approved_by = self.approved_by.clone();
            }
        }
        if self.cancel_reason.is_some() {
            batch.cancel_reason = self.cancel_reason.clone();
        }
        if self.failure_reason.is_some() {
            batch.failure_reason = self.failure_reason.clone();
        }
        if self.execution_summary.is_some() {
            batch.execution_summary = self.execution_summary;
        }
        if matches!(self.to, BatchStatus::Executed | BatchStatus::Failed) {
            batch.finished_at = Some(self.at);
        }
        batch.updated_at = self.at;
        true
    }
}

// ============================================================================
// Tokens and execution log
// ============================================================================

/// Quick-approval token model; only the SHA-256 digest of the secret is kept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalToken {
    pub id: TokenId,
    pub batch_id: BatchId,
    pub token_hash: String,
    pub approver_identity: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Issue token input
#[derive(Debug, Clone)]
pub struct IssueToken {
    pub batch_id: BatchId,
    pub token_hash: String,
    pub approver_identity: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Execution log entry model; append-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: LogEntryId,
    pub batch_id: BatchId,
    /// Index of the action in `actions_current`
    pub position: i32,
    pub action_type: ActionType,
    pub status: ExecutionStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}

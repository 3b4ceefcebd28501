//! Lexflow Core - mail automation and approval engine
//!
//! Inbound mail flows through the Catch matcher, the Map extractor and the
//! Despatch builder into an approval batch. Batches are approved by an
//! operator or through a single-use link, then handed to the action executor.

pub mod approval;
pub mod catch;
pub mod despatch;
pub mod directory;
pub mod executor;
pub mod extract;
pub mod links;
pub mod notify;
pub mod pipeline;
pub mod rules;
mod text;

pub use approval::{
    ApprovalError, ApprovalManager, ApprovalOutcome, ExpirySweeper, IssuedToken, TokenError,
    TokenErrorCode, TokenPreview, TokenService,
};
pub use catch::{CatchMatcher, ConditionKind, ConditionTrace, MatchTrace};
pub use despatch::{ActionBundleBuilder, BuiltBundle, TemplateContext};
pub use directory::{CaseDirectory, CaseRecord, HttpCaseDirectory, MemoryCaseDirectory};
pub use executor::{
    ActionExecutor, ActionHandler, ActionOutcome, ExecutionReport, HandlerOutcome,
    HandlerRegistry, OutcomeStatus,
};
pub use extract::{ExtractionResult, FieldExtractor};
pub use links::Links;
pub use notify::{NotificationChannel, NotificationRenderer, Notifier, SmtpNotificationChannel};
pub use pipeline::{
    IngestionWorker, MailProcessor, MailProvider, ProcessOutcome, SimulationReport, Simulator,
    SpoolDirProvider,
};
pub use rules::{RuleStore, RuleWarning, RuleWithWarnings};

//! Mail pipeline
//!
//! message -> Catch -> Map -> directory lookup -> Despatch -> approval batch

mod ingest;
mod processor;
mod simulate;

pub use ingest::{parse_rfc822, IngestionWorker, MailProvider, RawMail, SpoolDirProvider};
pub use processor::{MailProcessor, ProcessOutcome};
pub use simulate::{SimulationReport, Simulator};

use crate::despatch::{ActionBundleBuilder, BuiltBundle, TemplateContext};
use crate::directory::{CaseDirectory, CaseQuery, CaseRecord};
use chrono::{DateTime, Utc};
use lexflow_storage::models::{AutomationRule, InboundMessage};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Field whose extracted value selects the case in the directory
const CASE_NO_FIELD: &str = "Case_No";

/// Look up the case for a message, by extracted case number first and then
/// by sender address. Directory failures leave placeholders unresolved.
async fn resolve_case(
    directory: &dyn CaseDirectory,
    message: &InboundMessage,
    fields: &BTreeMap<String, String>,
) -> Option<CaseRecord> {
    let query = CaseQuery {
        case_no: fields.get(CASE_NO_FIELD).cloned(),
        client_email: Some(message.sender_address.clone()).filter(|s| !s.is_empty()),
    };
    match directory.lookup(&query).await {
        Ok(case) => {
            if case.is_none() {
                debug!(message_id = %message.id, "No case found for message");
            }
            case
        }
        Err(e) => {
            warn!(message_id = %message.id, error = %e, "Case directory lookup failed");
            None
        }
    }
}

/// Expand a rule's action templates for a message
async fn build_bundle(
    directory: &dyn CaseDirectory,
    message: &InboundMessage,
    rule: &AutomationRule,
    fields: &BTreeMap<String, String>,
    now: DateTime<Utc>,
) -> BuiltBundle {
    let case = resolve_case(directory, message, fields).await;
    let context = TemplateContext::for_message(message, case.as_ref(), fields, now);
    ActionBundleBuilder::new().build(&rule.action_bundle, &context)
}

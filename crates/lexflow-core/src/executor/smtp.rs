//! `send_email` handler over SMTP

use super::handler::{ActionHandler, ActionRequest, HandlerOutcome};
use crate::notify::smtp_transport;
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use lexflow_common::config::NotificationConfig;
use lexflow_common::types::ActionType;
use lexflow_common::{Error, Result};
use lexflow_storage::models::{ActionConfig, SendEmailConfig};
use tracing::debug;

/// Sends `send_email` actions through the configured relay
///
/// Mail delivery cannot be deduplicated by the receiver, so this handler
/// is not idempotent and is never retried.
pub struct SmtpEmailHandler {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailHandler {
    pub fn new(config: &NotificationConfig) -> Result<Self> {
        let from = config
            .from_address
            .parse::<Mailbox>()
            .map_err(|e| Error::Config(format!("Invalid from address: {}", e)))?;
        Ok(Self {
            transport: smtp_transport(config)?,
            from,
        })
    }

    fn build_message(&self, config: &SendEmailConfig, message_id: String) -> std::result::Result<Message, String> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(config.subject.clone())
            .message_id(Some(message_id));

        for to in parse_list(&config.to)? {
            builder = builder.to(to);
        }
        if let Some(cc) = config.cc.as_deref().filter(|cc| !cc.trim().is_empty()) {
            for cc in parse_list(cc)? {
                builder = builder.cc(cc);
            }
        }

        builder
            .header(ContentType::TEXT_PLAIN)
            .body(config.body.clone())
            .map_err(|e| format!("Failed to build email: {}", e))
    }
}

fn parse_list(list: &str) -> std::result::Result<Vec<Mailbox>, String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Mailbox>()
                .map_err(|e| format!("Invalid address '{}': {}", s, e))
        })
        .collect()
}

#[async_trait]
impl ActionHandler for SmtpEmailHandler {
    fn action_type(&self) -> ActionType {
        ActionType::SendEmail
    }

    fn is_idempotent(&self) -> bool {
        false
    }

    async fn execute(&self, request: ActionRequest<'_>) -> HandlerOutcome {
        let ActionConfig::SendEmail(config) = request.config else {
            return HandlerOutcome::failed("send_email handler received another action kind");
        };

        let message_id = format!("<{}.{}@lexflow>", request.batch_id, request.position);
        let email = match self.build_message(config, message_id.clone()) {
            Ok(email) => email,
            Err(error) => return HandlerOutcome::Skipped(error),
        };

        match self.transport.send(email).await {
            Ok(response) => {
                debug!(batch_id = %request.batch_id, code = %response.code(), "Email sent");
                HandlerOutcome::Success(serde_json::json!({
                    "message_id": message_id,
                    "to": config.to,
                }))
            }
            Err(e) => HandlerOutcome::Failed {
                error: e.to_string(),
                retryable: e.is_transient(),
            },
        }
    }
}

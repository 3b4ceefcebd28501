//! Notification delivery

use super::renderer::RenderedNotification;
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use lexflow_common::config::NotificationConfig;
use lexflow_common::{Error, Result};
use std::time::Duration;

/// Delivery channel for rendered notifications
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, to: &str, notification: &RenderedNotification) -> Result<()>;
}

/// Build the SMTP transport shared by notifications and `send_email` actions
pub fn smtp_transport(config: &NotificationConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
    let builder = if config.starttls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| Error::Config(format!("Failed to create SMTP transport: {}", e)))?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
    };
    let mut transport = builder.port(config.smtp_port);

    if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
        transport = transport.credentials(Credentials::new(username.clone(), password.clone()));
    }

    Ok(transport.timeout(Some(Duration::from_secs(30))).build())
}

/// Plain-text email notifications
pub struct SmtpNotificationChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotificationChannel {
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
}

#[async_trait]
impl NotificationChannel for SmtpNotificationChannel {
    async fn send(&self, to: &str, notification: &RenderedNotification) -> Result<()> {
        let to = to
            .parse::<Mailbox>()
            .map_err(|e| Error::Validation(format!("Invalid recipient '{}': {}", to, e)))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(notification.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())
            .map_err(|e| Error::Internal(format!("Failed to build email: {}", e)))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| Error::External(format!("SMTP delivery failed: {}", e)))?;
        Ok(())
    }
}

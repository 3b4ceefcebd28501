//! Approval notifications
//!
//! Rendering is a pure projection of a batch; delivery goes through a
//! [`NotificationChannel`].

mod channel;
mod renderer;

pub use channel::{smtp_transport, NotificationChannel, SmtpNotificationChannel};
pub use renderer::{action_label, NotificationRenderer, RenderedNotification};

use lexflow_common::Result;
use lexflow_storage::models::{ApprovalBatch, ExecutionLogEntry};
use std::sync::Arc;
use tracing::{debug, info};

/// Renders and delivers notifications for batches
pub struct Notifier {
    renderer: NotificationRenderer,
    channel: Arc<dyn NotificationChannel>,
    default_approver: Option<String>,
}

impl Notifier {
    pub fn new(
        renderer: NotificationRenderer,
        channel: Arc<dyn NotificationChannel>,
        default_approver: Option<String>,
    ) -> Self {
        Self {
            renderer,
            channel,
            default_approver,
        }
    }

    fn recipient<'a>(&'a self, batch: &'a ApprovalBatch) -> Option<&'a str> {
        batch
            .approver_identity
            .as_deref()
            .or(self.default_approver.as_deref())
    }

    /// Send the approval request carrying the raw token
    pub async fn send_approval_request(&self, batch: &ApprovalBatch, token: &str) -> Result<()> {
        let Some(to) = self.recipient(batch) else {
            debug!(batch_id = %batch.id, "No approver to notify");
            return Ok(());
        };
        let notification = self.renderer.approval_request(batch, token);
        self.channel.send(to, &notification).await?;
        info!(batch_id = %batch.id, "Approval request sent");
        Ok(())
    }

    /// Send the confirmation after execution
    pub async fn send_execution_report(
        &self,
        batch: &ApprovalBatch,
        entries: &[ExecutionLogEntry],
    ) -> Result<()> {
        let Some(to) = self.recipient(batch) else {
            return Ok(());
        };
        let notification = self.renderer.execution_report(batch, entries);
        self.channel.send(to, &notification).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    /// Channel that records what it was asked to send
    #[derive(Default)]
    pub struct RecordingChannel {
        pub sent: Mutex<Vec<(String, RenderedNotification)>>,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        async fn send(&self, to: &str, notification: &RenderedNotification) -> Result<()> {
            self.sent
                .lock()
                .await
                .push((to.to_string(), notification.clone()));
            Ok(())
        }
    }
}

//! Expiry Sweeper - moves long-abandoned pending batches to `expired`
//!
//! Link expiry is enforced at validation time; this only tidies up batches
//! nobody acted on long after their link expired.

use chrono::{DateTime, Duration, Utc};
use lexflow_common::types::ProcessingStatus;
use lexflow_common::Result;
use lexflow_storage::models::BatchTransition;
use lexflow_storage::repository::{BatchRepository, MessageRepository};
use std::sync::Arc;
use tokio::time::{interval, Duration as TokioDuration};
use tracing::{debug, error, info, warn};

/// Expiry Sweeper
pub struct ExpirySweeper {
    batches: Arc<dyn BatchRepository>,
    messages: Arc<dyn MessageRepository>,
    /// Grace period after `expires_at`
    stale_after: Duration,
    /// Batches handled per cycle
    batch_size: i64,
    /// Seconds between cycles
    interval_secs: u64,
}

impl ExpirySweeper {
    pub fn new(
        batches: Arc<dyn BatchRepository>,
        messages: Arc<dyn MessageRepository>,
        stale_after: Duration,
    ) -> Self {
        Self {
            batches,
            messages,
            stale_after,
            batch_size: 100,
            interval_secs: 300,
        }
    }

    /// Set sweep interval
    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval_secs = secs.max(1);
        self
    }

    /// Set batch size
    pub fn with_batch_size(mut self, size: i64) -> Self {
        self.batch_size = size;
        self
    }

    /// Run the sweeper
    pub async fn run(&self) {
        let mut ticker = interval(TokioDuration::from_secs(self.interval_secs));

        info!(
            "Expiry sweeper started (grace: {}h, interval: {}s)",
            self.stale_after.num_hours(),
            self.interval_secs
        );

        loop {
            ticker.tick().await;

            if let Err(e) = self.sweep_once(Utc::now()).await {
                error!("Error sweeping stale batches: {}", e);
            }
        }
    }

    /// Expire every pending batch whose link expired more than the grace
    /// period before `now`. Returns how many were expired.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.stale_after;
        let stale = self.batches.list_stale(cutoff, self.batch_size).await?;
        if stale.is_empty() {
            return Ok(0);
        }

        debug!("Found {} stale batches", stale.len());

        let mut expired = 0;
        for batch in stale {
            // Approved or cancelled since the listing
            let Some(batch) = self
                .batches
                .transition(batch.id, BatchTransition::expire(now))
                .await?
            else {
                continue;
            };

            expired += 1;
            info!(batch_id = %batch.id, expires_at = %batch.expires_at, "Batch expired");

            if let Err(e) = self
                .messages
                .set_processing(batch.message_id, ProcessingStatus::Expired, Some(batch.rule_id))
                .await
            {
                warn!(message_id = %batch.message_id, error = %e, "Failed to update processing status");
            }
        }

        Ok(expired)
    }
}

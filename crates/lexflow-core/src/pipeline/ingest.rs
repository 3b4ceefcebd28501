//! Message ingestion: RFC 822 parsing, mail providers and the polling worker

use super::processor::MailProcessor;
use async_trait::async_trait;
use lexflow_common::{Error, Result};
use lexflow_storage::models::{AttachmentMeta, NewMessage};
use mail_parser::{MessageParser, MimeHeaders};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, Duration as TokioDuration};
use tracing::{debug, error, info, warn};

/// Build a message from raw RFC 822 bytes. The `Message-ID` header becomes
/// the deduplication key.
pub fn parse_rfc822(data: &[u8]) -> Result<NewMessage> {
    let parsed = MessageParser::default()
        .parse(data)
        .ok_or_else(|| Error::Validation("Failed to parse message".to_string()))?;

    let from = parsed.from().and_then(|a| a.first());
    let sender_address = from
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_default();
    let sender_name = from.and_then(|a| a.name()).map(|s| s.to_string());

    let attachments = parsed
        .attachments()
        .map(|part| AttachmentMeta {
            filename: part.attachment_name().map(|s| s.to_string()),
            content_type: part
                .content_type()
                .map(|ct| match ct.subtype() {
                    Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            size: part.contents().len(),
        })
        .collect();

    let mut metadata = serde_json::Map::new();
    if let Some(date) = parsed.date() {
        metadata.insert("date".to_string(), date.to_rfc3339().into());
    }

    Ok(NewMessage {
        external_id: parsed.message_id().map(|s| s.to_string()),
        sender_address,
        sender_name,
        subject: parsed.subject().unwrap_or_default().to_string(),
        body_text: parsed
            .body_text(0)
            .map(|s| s.into_owned())
            .unwrap_or_default(),
        body_html: parsed.body_html(0).map(|s| s.into_owned()),
        attachments,
        thread_id: parsed.in_reply_to().as_text().map(|s| s.to_string()),
        metadata: serde_json::Value::Object(metadata),
    })
}

/// One raw message from a provider
#[derive(Debug, Clone)]
pub struct RawMail {
    /// Provider-specific handle used to acknowledge the message
    pub id: String,
    pub data: Vec<u8>,
}

/// Source of inbound mail
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Messages not yet acknowledged
    async fn fetch(&self) -> Result<Vec<RawMail>>;
    /// Mark a message as handled so it is not fetched again
    async fn acknowledge(&self, mail: &RawMail) -> Result<()>;
}

/// Reads `*.eml` files from a directory and moves them to `processed/`
pub struct SpoolDirProvider {
    dir: PathBuf,
    processed_dir: PathBuf,
}

impl SpoolDirProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let processed_dir = dir.join("processed");
        Self { dir, processed_dir }
    }
}

#[async_trait]
impl MailProvider for SpoolDirProvider {
    async fn fetch(&self) -> Result<Vec<RawMail>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::Internal(format!("Failed to read spool {}: {}", self.dir.display(), e)))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Internal(format!("Failed to read spool entry: {}", e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("eml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut mails = Vec::with_capacity(paths.len());
        for path in paths {
            let data = tokio::fs::read(&path)
                .await
                .map_err(|e| Error::Internal(format!("Failed to read {}: {}", path.display(), e)))?;
            mails.push(RawMail {
                id: path.to_string_lossy().into_owned(),
                data,
            });
        }
        Ok(mails)
    }

    async fn acknowledge(&self, mail: &RawMail) -> Result<()> {
        let path = PathBuf::from(&mail.id);
        let Some(name) = path.file_name() else {
            return Err(Error::Validation(format!("Not a spool file: {}", mail.id)));
        };
        tokio::fs::create_dir_all(&self.processed_dir)
            .await
            .map_err(|e| Error::Internal(format!("Failed to create processed dir: {}", e)))?;
        tokio::fs::rename(&path, self.processed_dir.join(name))
            .await
            .map_err(|e| Error::Internal(format!("Failed to move {}: {}", path.display(), e)))
    }
}

/// Ingestion Worker - polls a provider and feeds the pipeline
pub struct IngestionWorker {
    provider: Arc<dyn MailProvider>,
    processor: Arc<MailProcessor>,
    /// Interval between polls (seconds)
    poll_interval_secs: u64,
}

impl IngestionWorker {
    pub fn new(provider: Arc<dyn MailProvider>, processor: Arc<MailProcessor>) -> Self {
        Self {
            provider,
            processor,
            poll_interval_secs: 30,
        }
    }

    /// Set poll interval
    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs.max(1);
        self
    }

    /// Run the ingestion worker
    pub async fn run(&self) {
        let mut ticker = interval(TokioDuration::from_secs(self.poll_interval_secs));

        info!(
            "Ingestion worker started (interval: {}s)",
            self.poll_interval_secs
        );

        loop {
            ticker.tick().await;

            if let Err(e) = self.poll_once().await {
                error!("Error polling mail provider: {}", e);
            }
        }
    }

    /// Fetch and process everything available. Returns the number of
    /// messages acknowledged.
    pub async fn poll_once(&self) -> Result<usize> {
        let mails = self.provider.fetch().await?;
        if mails.is_empty() {
            return Ok(0);
        }

        debug!("Fetched {} messages", mails.len());

        let mut handled = 0;
        for mail in mails {
            match self.processor.ingest_raw(&mail.data).await {
                Ok(outcome) => debug!(mail = %mail.id, outcome = ?outcome, "Message ingested"),
                // Malformed input will never succeed, so it is acknowledged anyway
                Err(Error::Validation(reason)) => {
                    warn!(mail = %mail.id, %reason, "Rejected malformed message")
                }
                Err(e) => {
                    warn!(mail = %mail.id, error = %e, "Message left for retry");
                    continue;
                }
            }

            match self.provider.acknowledge(&mail).await {
                Ok(()) => handled += 1,
                Err(e) => warn!(mail = %mail.id, error = %e, "Failed to acknowledge message"),
            }
        }

        Ok(handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::TokenService;
    use crate::directory::MemoryCaseDirectory;
    use crate::pipeline::ProcessOutcome;
    use lexflow_storage::repository::MessageRepository;
    use lexflow_storage::MemoryStore;
    use pretty_assertions::assert_eq;

    const NOTICE: &[u8] = b"From: Court Clerk <clerk@court.gov>\r\n\
To: intake@firm.example\r\n\
Subject: Notice of hearing\r\n\
Message-ID: <n-1@court.gov>\r\n\
In-Reply-To: <q-9@firm.example>\r\n\
Date: Mon, 3 Jun 2024 09:30:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Case No. 2024-117 is set for hearing.\r\n";

    #[test]
    fn test_parse_rfc822() {
        let message = parse_rfc822(NOTICE).unwrap();
        assert_eq!(message.external_id.as_deref(), Some("n-1@court.gov"));
        assert_eq!(message.sender_address, "clerk@court.gov");
        assert_eq!(message.sender_name.as_deref(), Some("Court Clerk"));
        assert_eq!(message.subject, "Notice of hearing");
        assert!(message.body_text.contains("Case No. 2024-117"));
        assert_eq!(message.thread_id.as_deref(), Some("q-9@firm.example"));
        assert!(message.attachments.is_empty());
        assert!(message.metadata.get("date").is_some());
    }

    #[tokio::test]
    async fn test_spool_worker_ingests_and_acknowledges() {
        let dir = std::env::temp_dir().join(format!("lexflow-spool-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("001.eml"), NOTICE).await.unwrap();
        tokio::fs::write(dir.join("notes.txt"), b"ignored").await.unwrap();

        let store = MemoryStore::new();
        let tokens = Arc::new(TokenService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            32,
        ));
        let processor = Arc::new(MailProcessor::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(MemoryCaseDirectory::default()),
            tokens,
            60,
        ));
        let provider = Arc::new(SpoolDirProvider::new(&dir));
        let worker = IngestionWorker::new(provider.clone(), processor.clone());

        assert_eq!(worker.poll_once().await.unwrap(), 1);
        assert!(dir.join("processed").join("001.eml").exists());
        assert!(provider.fetch().await.unwrap().is_empty());

        let stored = store.list(None, 10, 0).await.unwrap();
        assert_eq!(stored.len(), 1);

        // Redelivery of the same Message-ID is ignored
        let outcome = processor.ingest_raw(NOTICE).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Duplicate { .. }));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}

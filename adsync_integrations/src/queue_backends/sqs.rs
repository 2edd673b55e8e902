//! AWS SQS-backed job queue.
//!
//! Message bodies are `QueuedMessage` JSON; a bare `SyncJob` body (as sent by
//! other producers) is wrapped on receipt. Retries are re-sends with a delivery
//! delay, so the attempt counter travels inside the body. Dead letters are
//! parked on a second queue as `DeadLetter` JSON.

use adsync_core::queue::QueuedMessage;
use adsync_core::{DeadLetter, Delivery, Error, JobQueue, Result, SyncJob};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::instrument;

/// SQS caps `DelaySeconds` at 15 minutes.
pub const MAX_DELAY_SECS: u64 = 900;

/// SQS caps a single receive at 10 messages.
const RECEIVE_MAX: usize = 10;

#[async_trait]
pub trait SqsApi: Send + Sync {
    async fn send_message(&self, queue_url: &str, body: String, delay_secs: i32)
        -> Result<String>;
    async fn receive_messages(&self, queue_url: &str, max: i32) -> Result<Vec<(String, String)>>; // (body, receipt)
    async fn delete_message(&self, queue_url: &str, receipt: &str) -> Result<()>;
    async fn change_visibility(&self, queue_url: &str, receipt: &str, timeout: i32) -> Result<()>;
}

#[derive(Clone)]
pub struct SqsJobQueue<C: SqsApi> {
    client: C,
    queue_url: String,
    dlq_url: String,
}

impl<C: SqsApi> SqsJobQueue<C> {
    pub fn new(client: C, queue_url: impl Into<String>, dlq_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            dlq_url: dlq_url.into(),
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    pub fn dlq_url(&self) -> &str {
        &self.dlq_url
    }

    async fn send_message(&self, message: &QueuedMessage, delay: Duration) -> Result<()> {
        let body = serde_json::to_string(message)
            .map_err(|e| Error::backend("serialize queued message", e))?;
        let delay_secs = delay.as_secs().min(MAX_DELAY_SECS) as i32;
        self.client
            .send_message(&self.queue_url, body, delay_secs)
            .await?;
        Ok(())
    }

    /// Drain up to `limit` dead letters, returning them with their receipts.
    /// The caller must release or delete every receipt.
    ///
    /// Undecodable bodies stay hidden until the drain ends so a receive
    /// never hands them back inside the same loop.
    async fn take_dead_letters(&self, limit: usize) -> Result<Vec<(DeadLetter, String)>> {
        let mut out = Vec::new();
        let mut skipped = Vec::new();
        while out.len() < limit {
            let want = (limit - out.len()).min(RECEIVE_MAX) as i32;
            let batch = self.client.receive_messages(&self.dlq_url, want).await?;
            if batch.is_empty() {
                break;
            }
            for (body, receipt) in batch {
                match serde_json::from_str::<DeadLetter>(&body) {
                    Ok(dl) => out.push((dl, receipt)),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping undecodable dead letter");
                        skipped.push(receipt);
                    }
                }
            }
        }
        self.release_all(skipped).await?;
        Ok(out)
    }

    async fn release_all(&self, receipts: impl IntoIterator<Item = String>) -> Result<()> {
        for receipt in receipts {
            self.client
                .change_visibility(&self.dlq_url, &receipt, 0)
                .await?;
        }
        Ok(())
    }
}

/// Decode a queue body; bare jobs get a fresh envelope.
fn decode_body(body: &str) -> Option<QueuedMessage> {
    if let Ok(message) = serde_json::from_str::<QueuedMessage>(body) {
        return Some(message);
    }
    serde_json::from_str::<SyncJob>(body)
        .ok()
        .map(QueuedMessage::new)
}

#[async_trait]
impl<C: SqsApi> JobQueue for SqsJobQueue<C> {
    #[instrument(level = "info", skip(self, job), fields(kind = job.kind()))]
    async fn send(&self, job: SyncJob) -> Result<String> {
        let message = QueuedMessage::new(job);
        self.send_message(&message, Duration::ZERO).await?;
        Ok(message.id)
    }

    #[instrument(level = "debug", skip(self))]
    async fn receive(&self, max: usize) -> Result<Vec<Delivery>> {
        let want = max.clamp(1, RECEIVE_MAX) as i32;
        let raw = self.client.receive_messages(&self.queue_url, want).await?;
        let mut out = Vec::with_capacity(raw.len());
        for (body, receipt) in raw {
            let Some(mut message) = decode_body(&body) else {
                // Left invisible; the queue's redrive policy takes it from here.
                tracing::warn!("skipping undecodable queue message");
                continue;
            };
            message.attempts += 1;
            out.push(Delivery { message, receipt });
        }
        Ok(out)
    }

    #[instrument(level = "debug", skip(self, delivery), fields(message_id = %delivery.message.id))]
    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.client
            .delete_message(&self.queue_url, &delivery.receipt)
            .await
    }

    #[instrument(level = "debug", skip(self, delivery, reason), fields(message_id = %delivery.message.id))]
    async fn retry(&self, delivery: &Delivery, delay: Duration, reason: &str) -> Result<()> {
        let mut message = delivery.message.clone();
        message.last_error = Some(reason.to_string());
        self.send_message(&message, delay).await?;
        self.client
            .delete_message(&self.queue_url, &delivery.receipt)
            .await
    }

    #[instrument(level = "info", skip(self, delivery, reason), fields(message_id = %delivery.message.id))]
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<()> {
        let mut message = delivery.message.clone();
        message.last_error = Some(reason.to_string());
        let dl = DeadLetter {
            message,
            reason: reason.to_string(),
            dead_lettered_at: Utc::now(),
        };
        let body =
            serde_json::to_string(&dl).map_err(|e| Error::backend("serialize dead letter", e))?;
        self.client.send_message(&self.dlq_url, body, 0).await?;
        self.client
            .delete_message(&self.queue_url, &delivery.receipt)
            .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let taken = self.take_dead_letters(limit).await?;
        let (letters, receipts): (Vec<_>, Vec<_>) = taken.into_iter().unzip();
        self.release_all(receipts).await?;
        Ok(letters)
    }

    #[instrument(level = "info", skip(self))]
    async fn replay(&self, message_id: &str) -> Result<()> {
        let taken = self.take_dead_letters(usize::MAX).await?;
        let mut found = None;
        let mut others = Vec::with_capacity(taken.len());
        for (dl, receipt) in taken {
            if found.is_none() && dl.message.id == message_id {
                found = Some((dl, receipt));
            } else {
                others.push(receipt);
            }
        }
        self.release_all(others).await?;

        let Some((dl, receipt)) = found else {
            return Err(Error::NotFound(format!("dead letter {message_id}")));
        };
        let mut message = dl.message;
        message.attempts = 0;
        message.last_error = None;
        self.send_message(&message, Duration::ZERO).await?;
        self.client.delete_message(&self.dlq_url, &receipt).await
    }
}

/// Real SQS client adapter (only compiled when the `sqs` feature is enabled).
#[cfg(feature = "sqs")]
pub mod real {
    use super::SqsApi;
    use adsync_core::{Error, Result};
    use aws_sdk_sqs::Client as SqsClient;
    use tracing::instrument;

    #[derive(Clone)]
    pub struct AwsSqsApi {
        inner: SqsClient,
    }

    impl AwsSqsApi {
        pub fn new(inner: SqsClient) -> Self {
            Self { inner }
        }

        /// Client from the ambient AWS configuration (env, profile, IMDS).
        pub async fn from_env() -> Self {
            let cfg = aws_config::load_from_env().await;
            Self::new(SqsClient::new(&cfg))
        }
    }

    #[async_trait::async_trait]
    impl SqsApi for AwsSqsApi {
        #[instrument(level = "debug", skip(self, body))]
        async fn send_message(
            &self,
            queue_url: &str,
            body: String,
            delay_secs: i32,
        ) -> Result<String> {
            let resp = self
                .inner
                .send_message()
                .queue_url(queue_url)
                .message_body(body)
                .delay_seconds(delay_secs)
                .send()
                .await
                .map_err(|e| Error::Queue(format!("sqs send: {e}")))?;
            Ok(resp.message_id.unwrap_or_default())
        }

        #[instrument(level = "debug", skip(self))]
        async fn receive_messages(
            &self,
            queue_url: &str,
            max: i32,
        ) -> Result<Vec<(String, String)>> {
            let resp = self
                .inner
                .receive_message()
                .queue_url(queue_url)
                .max_number_of_messages(max)
                .wait_time_seconds(1)
                .send()
                .await
                .map_err(|e| Error::Queue(format!("sqs receive: {e}")))?;
            let mut out = Vec::new();
            if let Some(msgs) = resp.messages {
                for m in msgs {
                    if let (Some(body), Some(receipt)) = (m.body, m.receipt_handle) {
                        out.push((body, receipt));
                    }
                }
            }
            Ok(out)
        }

        #[instrument(level = "debug", skip(self))]
        async fn delete_message(&self, queue_url: &str, receipt: &str) -> Result<()> {
            self.inner
                .delete_message()
                .queue_url(queue_url)
                .receipt_handle(receipt)
                .send()
                .await
                .map_err(|e| Error::Queue(format!("sqs delete: {e}")))?;
            Ok(())
        }

        #[instrument(level = "debug", skip(self))]
        async fn change_visibility(
            &self,
            queue_url: &str,
            receipt: &str,
            timeout: i32,
        ) -> Result<()> {
            self.inner
                .change_message_visibility()
                .queue_url(queue_url)
                .receipt_handle(receipt)
                .visibility_timeout(timeout)
                .send()
                .await
                .map_err(|e| Error::Queue(format!("sqs visibility: {e}")))?;
            Ok(())
        }
    }
}

use super::config::RetryPolicy;
use super::models::{Delivery, MessageStatus, SyncJob};
use super::traits::JobQueue;
use crate::Result;
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Executes one job. Implemented by the sync engine.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &SyncJob) -> Result<()>;
}

/// Tally of one received batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub received: usize,
    pub acked: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// Deliveries whose settlement call itself failed; the transport will redeliver them.
    pub unsettled: usize,
}

/// Pulls batches from a `JobQueue` and runs them through a `JobHandler`.
///
/// Jobs within a batch run concurrently and settle independently: success
/// acks, permanent failures dead-letter at once, anything else is retried
/// with exponential backoff until `max_attempts` is reached.
pub struct JobConsumer {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    policy: RetryPolicy,
}

impl JobConsumer {
    #[tracing::instrument(level = "debug", skip(queue, handler))]
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            queue,
            handler,
            policy,
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run until `cancel` fires. Receive errors are logged and retried after the idle delay.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn run_loop(&self, cancel: CancellationToken) {
        tracing::info!(
            batch_size = self.policy.batch_size,
            max_attempts = self.policy.max_attempts,
            "job consumer started"
        );
        loop {
            let idle = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("job consumer cancelled");
                    return;
                }
                res = self.poll_once() => match res {
                    Ok(outcome) => outcome.received == 0,
                    Err(e) => {
                        tracing::warn!(error = %e, "job consumer receive failed");
                        true
                    }
                },
            };

            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("job consumer cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(self.policy.idle_poll()) => {}
                }
            }
        }
    }

    /// Receive one batch and settle every delivery in it.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn poll_once(&self) -> Result<BatchOutcome> {
        let deliveries = self.queue.receive(self.policy.batch_size).await?;
        let mut outcome = BatchOutcome {
            received: deliveries.len(),
            ..Default::default()
        };
        if deliveries.is_empty() {
            return Ok(outcome);
        }

        let settled = join_all(deliveries.into_iter().map(|d| self.process(d))).await;
        for status in settled {
            match status {
                Some(MessageStatus::Acked) => outcome.acked += 1,
                Some(MessageStatus::Retried) => outcome.retried += 1,
                Some(MessageStatus::DeadLettered) => outcome.dead_lettered += 1,
                None => outcome.unsettled += 1,
            }
        }
        tracing::info!(
            received = outcome.received,
            acked = outcome.acked,
            retried = outcome.retried,
            dead_lettered = outcome.dead_lettered,
            unsettled = outcome.unsettled,
            "job batch settled"
        );
        Ok(outcome)
    }

    #[tracing::instrument(
        level = "info",
        skip(self, delivery),
        fields(
            message_id = %delivery.message.id,
            job = delivery.message.job.kind(),
            attempt = delivery.message.attempts,
        )
    )]
    async fn process(&self, delivery: Delivery) -> Option<MessageStatus> {
        let result = self.handler.handle(&delivery.message.job).await;
        let attempt = delivery.message.attempts;

        let (status, settle) = match result {
            Ok(()) => (MessageStatus::Acked, self.queue.ack(&delivery).await),
            Err(e) if e.is_permanent() => {
                tracing::error!(error = %e, "job failed permanently; dead-lettering");
                (
                    MessageStatus::DeadLettered,
                    self.queue.dead_letter(&delivery, &e.to_string()).await,
                )
            }
            Err(e) if self.policy.exhausted(attempt) => {
                tracing::error!(error = %e, "job failed on final attempt; dead-lettering");
                let reason = format!("failed after {attempt} attempts: {e}");
                (
                    MessageStatus::DeadLettered,
                    self.queue.dead_letter(&delivery, &reason).await,
                )
            }
            Err(e) => {
                let delay = self.policy.backoff(attempt);
                tracing::warn!(error = %e, delay_ms = delay.as_millis() as u64, "job failed; retrying");
                (
                    MessageStatus::Retried,
                    self.queue.retry(&delivery, delay, &e.to_string()).await,
                )
            }
        };

        match settle {
            Ok(()) => Some(status),
            Err(e) => {
                tracing::error!(error = %e, ?status, "failed to settle delivery");
                None
            }
        }
    }
}

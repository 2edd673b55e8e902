use super::models::{DeadLetter, Delivery, SyncJob};
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// At-least-once job transport.
///
/// Every received delivery must be settled exactly once with `ack`, `retry`
/// or `dead_letter`.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job; returns the message id.
    async fn send(&self, job: SyncJob) -> Result<String>;

    /// Receive up to `max` visible messages. `attempts` is incremented per delivery.
    async fn receive(&self, max: usize) -> Result<Vec<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Make the message visible again after `delay`.
    async fn retry(&self, delivery: &Delivery, delay: Duration, reason: &str) -> Result<()>;

    /// Park the message for inspection; it is not redelivered until replayed.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<()>;

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>>;

    /// Move a dead-lettered message back to the queue with a fresh attempt budget.
    async fn replay(&self, message_id: &str) -> Result<()>;
}

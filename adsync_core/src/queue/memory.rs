use super::models::{DeadLetter, Delivery, QueuedMessage, SyncJob};
use super::traits::JobQueue;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct Pending {
    message: QueuedMessage,
    visible_at: Instant,
}

#[derive(Default)]
struct State {
    ready: VecDeque<Pending>,
    in_flight: HashMap<String, QueuedMessage>,
    dead: Vec<DeadLetter>,
}

/// In-process `JobQueue` for single-node deployments and tests.
///
/// Delays use tokio's clock, so paused-time tests can advance through backoff.
#[derive(Clone, Default)]
pub struct MemoryJobQueue {
    state: Arc<Mutex<State>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting for delivery, visible or delayed.
    pub async fn pending(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    /// Jobs of all waiting messages in queue order (primarily for tests).
    pub async fn pending_jobs(&self) -> Vec<SyncJob> {
        self.state
            .lock()
            .await
            .ready
            .iter()
            .map(|p| p.message.job.clone())
            .collect()
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    fn take_in_flight(state: &mut State, delivery: &Delivery) -> Result<QueuedMessage> {
        state.in_flight.remove(&delivery.receipt).ok_or_else(|| {
            Error::NotFound(format!(
                "no in-flight delivery for message {}",
                delivery.message.id
            ))
        })
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    #[tracing::instrument(level = "debug", skip(self, job), fields(job = job.kind()))]
    async fn send(&self, job: SyncJob) -> Result<String> {
        let message = QueuedMessage::new(job);
        let id = message.id.clone();
        self.state.lock().await.ready.push_back(Pending {
            message,
            visible_at: Instant::now(),
        });
        Ok(id)
    }

    async fn receive(&self, max: usize) -> Result<Vec<Delivery>> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let mut out = Vec::new();
        let mut waiting = VecDeque::with_capacity(state.ready.len());

        while let Some(p) = state.ready.pop_front() {
            if out.len() < max && p.visible_at <= now {
                let mut message = p.message;
                message.attempts += 1;
                let receipt = ulid::Ulid::new().to_string();
                state.in_flight.insert(receipt.clone(), message.clone());
                out.push(Delivery { message, receipt });
            } else {
                waiting.push_back(p);
            }
        }
        state.ready = waiting;
        Ok(out)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::take_in_flight(&mut state, delivery)?;
        Ok(())
    }

    async fn retry(&self, delivery: &Delivery, delay: Duration, reason: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut message = Self::take_in_flight(&mut state, delivery)?;
        message.last_error = Some(reason.to_string());
        state.ready.push_back(Pending {
            message,
            visible_at: Instant::now() + delay,
        });
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut message = Self::take_in_flight(&mut state, delivery)?;
        message.last_error = Some(reason.to_string());
        state.dead.push(DeadLetter {
            message,
            reason: reason.to_string(),
            dead_lettered_at: Utc::now(),
        });
        Ok(())
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let state = self.state.lock().await;
        // Newest first.
        Ok(state.dead.iter().rev().take(limit).cloned().collect())
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn replay(&self, message_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let pos = state
            .dead
            .iter()
            .position(|d| d.message.id == message_id)
            .ok_or_else(|| Error::NotFound(format!("dead letter '{message_id}' not found")))?;
        let mut message = state.dead.remove(pos).message;
        message.attempts = 0;
        message.last_error = None;
        state.ready.push_back(Pending {
            message,
            visible_at: Instant::now(),
        });
        Ok(())
    }
}

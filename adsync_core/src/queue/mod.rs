//! Sync job transport: message schema, queue abstraction, in-memory backend
//! and the batch consumer.

pub mod config;
pub mod consumer;
pub mod memory;
pub mod models;
pub mod traits;

pub use config::RetryPolicy;
pub use consumer::{BatchOutcome, JobConsumer, JobHandler};
pub use memory::MemoryJobQueue;
pub use models::{DeadLetter, Delivery, MessageStatus, QueuedMessage, SyncJob};
pub use traits::JobQueue;

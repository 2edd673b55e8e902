//! adsync core: models, normalizer, sync engine and job queue for mirroring
//! Facebook Ads data into a relational store.

pub mod config;
pub mod error;
pub mod models;
pub mod normalize;
pub mod o11y;
pub mod queue;
pub mod source;
pub mod store;
pub mod sync;

pub use config::SyncSettings;
pub use error::{Error, Result};
pub use models::{
    AccountState, AdAccountRow, AdRow, AdSetRow, CampaignRow, DateWindow, EntityKind,
    InsightLevel, InsightRow,
};
pub use normalize::{ActionMapping, GraphRecord, Normalizer};
pub use queue::{
    DeadLetter, Delivery, JobConsumer, JobHandler, JobQueue, MemoryJobQueue, RetryPolicy, SyncJob,
};
pub use source::{AdsSource, DEFAULT_METRICS};
pub use store::{MemoryStore, MirrorStore, UpsertBatch};
pub use sync::{CronExpr, SyncEngine, SyncReport, SyncScheduler};

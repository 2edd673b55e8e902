pub mod engine;
pub mod schedule;

pub use engine::{AccountReport, SyncEngine, SyncReport};
pub use schedule::{CronExpr, SyncScheduler};

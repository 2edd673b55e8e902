use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Queue message body.
///
/// Wire form: `{"type":"sync_all"}` or
/// `{"type":"sync_account","accountId":"act_1","startDate":"2024-01-01","endDate":"2024-01-31"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncJob {
    SyncAll {
        #[serde(rename = "startDate", default, skip_serializing_if = "Option::is_none")]
        start_date: Option<String>,
        #[serde(rename = "endDate", default, skip_serializing_if = "Option::is_none")]
        end_date: Option<String>,
    },
    SyncAccount {
        /// Optional on the wire so a job missing it can be dead-lettered
        /// instead of failing to decode.
        #[serde(rename = "accountId", default, skip_serializing_if = "Option::is_none")]
        account_id: Option<String>,
        #[serde(rename = "startDate", default, skip_serializing_if = "Option::is_none")]
        start_date: Option<String>,
        #[serde(rename = "endDate", default, skip_serializing_if = "Option::is_none")]
        end_date: Option<String>,
    },
}

impl SyncJob {
    pub fn sync_all() -> Self {
        SyncJob::SyncAll {
            start_date: None,
            end_date: None,
        }
    }

    pub fn sync_account(account_id: impl Into<String>) -> Self {
        SyncJob::SyncAccount {
            account_id: Some(account_id.into()),
            start_date: None,
            end_date: None,
        }
    }

    pub fn with_dates(mut self, start: Option<String>, end: Option<String>) -> Self {
        match &mut self {
            SyncJob::SyncAll {
                start_date,
                end_date,
            }
            | SyncJob::SyncAccount {
                start_date,
                end_date,
                ..
            } => {
                *start_date = start;
                *end_date = end;
            }
        }
        self
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncJob::SyncAll { .. } => "sync_all",
            SyncJob::SyncAccount { .. } => "sync_account",
        }
    }

    pub fn account_id(&self) -> Option<&str> {
        match self {
            SyncJob::SyncAll { .. } => None,
            SyncJob::SyncAccount { account_id, .. } => account_id.as_deref(),
        }
    }

    pub fn dates(&self) -> (Option<&str>, Option<&str>) {
        match self {
            SyncJob::SyncAll {
                start_date,
                end_date,
            }
            | SyncJob::SyncAccount {
                start_date,
                end_date,
                ..
            } => (start_date.as_deref(), end_date.as_deref()),
        }
    }
}

/// A job plus its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: String,
    pub job: SyncJob,
    /// Deliveries so far, including the current one.
    #[serde(default)]
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueuedMessage {
    pub fn new(job: SyncJob) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            job,
            attempts: 0,
            enqueued_at: Utc::now(),
            last_error: None,
        }
    }
}

/// A received message and the handle needed to settle it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message: QueuedMessage,
    pub receipt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub message: QueuedMessage,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Final state of one delivery after the consumer settled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Acked,
    Retried,
    DeadLettered,
}

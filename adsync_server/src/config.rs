use adsync_core::{Error, Result};

/// Which `JobQueue` implementation the server runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueBackend {
    /// In-process queue; jobs are lost on restart.
    Memory,
    Sqs { queue_url: String, dlq_url: String },
}

impl QueueBackend {
    pub fn name(&self) -> &'static str {
        match self {
            QueueBackend::Memory => "memory",
            QueueBackend::Sqs { .. } => "sqs",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub queue: QueueBackend,
    /// Run the job consumer inside the server process.
    pub consumer_enabled: bool,
    /// Run the cron scheduler inside the server process (needs a schedule).
    pub scheduler_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            queue: QueueBackend::Memory,
            consumer_enabled: true,
            scheduler_enabled: true,
        }
    }
}

impl ServerConfig {
    /// `ADSYNC_QUEUE` (`memory` | `sqs`), `ADSYNC_SQS_QUEUE_URL`, `ADSYNC_SQS_DLQ_URL`,
    /// `ADSYNC_CONSUMER_ENABLED`, `ADSYNC_SCHEDULER_ENABLED`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();

        let queue_url = get("ADSYNC_SQS_QUEUE_URL");
        let implied = if queue_url.is_some() { "sqs" } else { "memory" };
        let backend = get("ADSYNC_QUEUE").unwrap_or_else(|| implied.to_string());
        cfg.queue = match backend.to_ascii_lowercase().as_str() {
            "memory" => QueueBackend::Memory,
            "sqs" => QueueBackend::Sqs {
                queue_url: queue_url.ok_or_else(|| {
                    Error::InvalidInput("ADSYNC_SQS_QUEUE_URL is required for the sqs queue".into())
                })?,
                dlq_url: get("ADSYNC_SQS_DLQ_URL").ok_or_else(|| {
                    Error::InvalidInput("ADSYNC_SQS_DLQ_URL is required for the sqs queue".into())
                })?,
            },
            other => {
                return Err(Error::InvalidInput(format!(
                    "ADSYNC_QUEUE: unknown backend '{other}' (expected memory or sqs)"
                )))
            }
        };
        if let Some(v) = get("ADSYNC_CONSUMER_ENABLED") {
            cfg.consumer_enabled = parse_flag("ADSYNC_CONSUMER_ENABLED", &v)?;
        }
        if let Some(v) = get("ADSYNC_SCHEDULER_ENABLED") {
            cfg.scheduler_enabled = parse_flag("ADSYNC_SCHEDULER_ENABLED", &v)?;
        }
        Ok(cfg)
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidInput(format!("{key}: '{raw}' is not a boolean"))),
    }
}

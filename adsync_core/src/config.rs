use crate::models::InsightLevel;
use crate::normalize::ActionMapping;
use crate::queue::RetryPolicy;
use crate::source::DEFAULT_METRICS;
use crate::sync::schedule::CronExpr;
use crate::{Error, Result};
use std::time::Duration;

/// Upper bound for `default_window_days` (about ten years).
pub const MAX_WINDOW_DAYS: u32 = 3650;

/// Pipeline settings shared by every entry point (server, CLI, tests).
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Accounts covered by `sync_all`; empty means every account the token can see.
    pub account_ids: Vec<String>,
    pub insight_levels: Vec<InsightLevel>,
    pub metrics: Vec<String>,
    /// Days before today covered when a job names no dates (1 = yesterday..today).
    pub default_window_days: u32,
    /// `sync_all` enqueues one `sync_account` job per account instead of syncing inline.
    pub fan_out: bool,
    pub action_mapping: ActionMapping,

    /// Cron expression (`min hour dom month dow`, UTC) for scheduled `sync_all`.
    pub schedule: Option<String>,
    pub scheduler_poll_ms: u64,

    pub retry: RetryPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            account_ids: Vec::new(),
            insight_levels: vec![InsightLevel::Ad],
            metrics: DEFAULT_METRICS.iter().map(|m| m.to_string()).collect(),
            default_window_days: 1,
            fan_out: false,
            action_mapping: ActionMapping::default(),
            schedule: Some("0 */6 * * *".to_string()),
            scheduler_poll_ms: 30_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncSettings {
    /// Read `ADSYNC_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build settings from an arbitrary variable source; unset or blank values keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut s = Self::default();

        if let Some(v) = get("ADSYNC_ACCOUNT_IDS") {
            s.account_ids = split_list(&v);
        }
        if let Some(v) = get("ADSYNC_INSIGHT_LEVELS") {
            s.insight_levels = split_list(&v)
                .iter()
                .map(|l| l.parse::<InsightLevel>())
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(v) = get("ADSYNC_INSIGHT_METRICS") {
            s.metrics = split_list(&v);
        }
        if let Some(v) = get("ADSYNC_DEFAULT_WINDOW_DAYS") {
            s.default_window_days = parse_num("ADSYNC_DEFAULT_WINDOW_DAYS", &v)?;
        }
        if let Some(v) = get("ADSYNC_FAN_OUT") {
            s.fan_out = parse_bool("ADSYNC_FAN_OUT", &v)?;
        }
        if let Some(v) = get("ADSYNC_ACTION_MAPPING_JSON") {
            s.action_mapping = ActionMapping::from_json(&v)?;
        }
        if let Some(v) = get("ADSYNC_SCHEDULE") {
            s.schedule = match v.to_ascii_lowercase().as_str() {
                "off" | "none" | "disabled" => None,
                _ => Some(v),
            };
        }
        if let Some(v) = get("ADSYNC_SCHEDULER_POLL_MS") {
            s.scheduler_poll_ms = parse_num("ADSYNC_SCHEDULER_POLL_MS", &v)?;
        }
        if let Some(v) = get("ADSYNC_MAX_ATTEMPTS") {
            s.retry.max_attempts = parse_num("ADSYNC_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("ADSYNC_BACKOFF_BASE_MS") {
            s.retry.backoff_base_ms = parse_num("ADSYNC_BACKOFF_BASE_MS", &v)?;
        }
        if let Some(v) = get("ADSYNC_BACKOFF_MAX_MS") {
            s.retry.backoff_max_ms = parse_num("ADSYNC_BACKOFF_MAX_MS", &v)?;
        }
        if let Some(v) = get("ADSYNC_BATCH_SIZE") {
            s.retry.batch_size = parse_num("ADSYNC_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("ADSYNC_IDLE_POLL_MS") {
            s.retry.idle_poll_ms = parse_num("ADSYNC_IDLE_POLL_MS", &v)?;
        }

        s.validate()?;
        Ok(s)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn validate(&self) -> Result<()> {
        if self.insight_levels.is_empty() {
            return Err(Error::InvalidInput(
                "at least one insight level is required".to_string(),
            ));
        }
        if self.metrics.is_empty() {
            return Err(Error::InvalidInput(
                "insight metric list is empty".to_string(),
            ));
        }
        if self.account_ids.iter().any(|a| !a.starts_with("act_")) {
            return Err(Error::InvalidInput(
                "account ids must use the 'act_<id>' form".to_string(),
            ));
        }
        if let Some(expr) = &self.schedule {
            CronExpr::parse(expr)?;
        }
        if self.default_window_days > MAX_WINDOW_DAYS {
            return Err(Error::InvalidInput(format!(
                "default_window_days must be <= {MAX_WINDOW_DAYS}"
            )));
        }
        if self.scheduler_poll_ms == 0 {
            return Err(Error::InvalidInput(
                "scheduler_poll_ms must be > 0".to_string(),
            ));
        }
        self.action_mapping.validate()?;
        self.retry.validate()
    }

    pub fn scheduler_poll(&self) -> Duration {
        Duration::from_millis(self.scheduler_poll_ms)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_num<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::InvalidInput(format!("{key}: '{raw}' is not a valid number")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidInput(format!("{key}: '{raw}' is not a boolean"))),
    }
}

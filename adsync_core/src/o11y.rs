//! Process-wide tracing setup.

use crate::{Error, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event (default).
    #[default]
    Json,
    /// Multi-line human output for local runs.
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(Error::InvalidInput(format!(
                "unknown log format '{other}' (expected json or pretty)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            default_filter: "info".to_string(),
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("ADSYNC_LOG_FORMAT") {
            if !v.trim().is_empty() {
                cfg.format = v.parse()?;
            }
        }
        Ok(cfg)
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_global(cfg: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.default_filter.as_str()));

    let registry = tracing_subscriber::registry().with(filter);
    match cfg.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_target(true))
            .try_init(),
    }
    .map_err(|e| Error::backend("tracing already initialized", e))
}

pub fn init_global_from_env() -> Result<()> {
    init_global(&LogConfig::from_env()?)
}

use adsync_core::{Error, Result};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_GRAPH_API_URL: &str = "https://graph.facebook.com/v21.0";

#[derive(Clone, PartialEq)]
pub struct GraphApiConfig {
    /// Versioned Graph API root, without trailing slash.
    pub base_url: String,
    pub access_token: String,
    /// Needed only for long-lived token exchange.
    pub app_id: Option<String>,
    pub app_secret: Option<String>,

    /// `limit` for entity listings.
    pub page_limit: u32,
    /// `limit` for insights listings.
    pub insights_page_limit: u32,
    /// Hard stop for a single listing.
    pub max_pages: usize,
    pub timeout_ms: u64,
}

impl Default for GraphApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GRAPH_API_URL.to_string(),
            access_token: String::new(),
            app_id: None,
            app_secret: None,
            page_limit: 500,
            insights_page_limit: 1000,
            max_pages: 1000,
            timeout_ms: 30_000,
        }
    }
}

impl fmt::Debug for GraphApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphApiConfig")
            .field("base_url", &self.base_url)
            .field("access_token", &"<redacted>")
            .field("app_id", &self.app_id)
            .field("app_secret", &self.app_secret.as_ref().map(|_| "<redacted>"))
            .field("page_limit", &self.page_limit)
            .field("insights_page_limit", &self.insights_page_limit)
            .field("max_pages", &self.max_pages)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl GraphApiConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Default::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// `FACEBOOK_ACCESS_TOKEN` (required), `FACEBOOK_APP_ID`, `FACEBOOK_APP_SECRET`,
    /// `FACEBOOK_GRAPH_API_URL`, `ADSYNC_GRAPH_MAX_PAGES`, `ADSYNC_GRAPH_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut cfg = Self::new(get("FACEBOOK_ACCESS_TOKEN").ok_or_else(|| {
            Error::InvalidInput("FACEBOOK_ACCESS_TOKEN is not set".to_string())
        })?);
        cfg.app_id = get("FACEBOOK_APP_ID");
        cfg.app_secret = get("FACEBOOK_APP_SECRET");
        if let Some(url) = get("FACEBOOK_GRAPH_API_URL") {
            cfg = cfg.with_base_url(url);
        }
        if let Some(v) = get("ADSYNC_GRAPH_MAX_PAGES") {
            cfg.max_pages = v.parse().map_err(|_| {
                Error::InvalidInput(format!("ADSYNC_GRAPH_MAX_PAGES: '{v}' is not a number"))
            })?;
        }
        if let Some(v) = get("ADSYNC_GRAPH_TIMEOUT_MS") {
            cfg.timeout_ms = v.parse().map_err(|_| {
                Error::InvalidInput(format!("ADSYNC_GRAPH_TIMEOUT_MS: '{v}' is not a number"))
            })?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Error::InvalidInput("graph api base_url is empty".to_string()));
        }
        if self.access_token.trim().is_empty() {
            return Err(Error::InvalidInput("graph api access token is empty".to_string()));
        }
        if self.page_limit == 0 || self.insights_page_limit == 0 {
            return Err(Error::InvalidInput("graph api page limits must be > 0".to_string()));
        }
        if self.max_pages == 0 {
            return Err(Error::InvalidInput("max_pages must be > 0".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(Error::InvalidInput("timeout_ms must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

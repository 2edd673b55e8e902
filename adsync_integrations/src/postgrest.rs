//! PostgREST (Supabase REST) mirror store.
//!
//! Each batch is one `POST /rest/v1/{table}?on_conflict={key}` with
//! `Prefer: resolution=merge-duplicates`, which is an upsert on the table's
//! unique key.

use adsync_core::models::AccountState;
use adsync_core::{Error, MirrorStore, Result, UpsertBatch};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::instrument;

#[derive(Clone, PartialEq)]
pub struct PostgrestConfig {
    /// Project root, e.g. `https://xyz.supabase.co`, without trailing slash.
    pub url: String,
    pub service_key: String,
    pub timeout_ms: u64,
}

impl fmt::Debug for PostgrestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgrestConfig")
            .field("url", &self.url)
            .field("service_key", &"<redacted>")
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl PostgrestConfig {
    pub fn new(url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            timeout_ms: 30_000,
        }
    }

    /// `SUPABASE_URL` and `SUPABASE_SERVICE_ROLE_KEY`, both required.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |k: &str| {
            lookup(k)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::InvalidInput(format!("{k} is not set")))
        };
        let cfg = Self::new(get("SUPABASE_URL")?, get("SUPABASE_SERVICE_ROLE_KEY")?);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(Error::InvalidInput(format!(
                "store url must be http(s): {}",
                self.url
            )));
        }
        if self.service_key.trim().is_empty() {
            return Err(Error::InvalidInput("store service key is empty".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(Error::InvalidInput("timeout_ms must be > 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct AccountStateRow {
    id: String,
    #[serde(default)]
    active: Option<bool>,
}

#[derive(Clone)]
pub struct PostgrestStore {
    http: Client,
    cfg: PostgrestConfig,
}

impl PostgrestStore {
    pub fn new(cfg: PostgrestConfig) -> Result<Self> {
        cfg.validate()?;
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(Error::backend_reqwest)?;
        Ok(Self { http, cfg })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.cfg.url)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.cfg.service_key)
            .bearer_auth(&self.cfg.service_key)
    }
}

#[async_trait]
impl MirrorStore for PostgrestStore {
    #[instrument(level = "info", skip(self, batch), fields(table = batch.table(), rows = batch.len()))]
    async fn upsert(&self, batch: UpsertBatch) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let table = batch.table();
        let resp = self
            .authed(self.http.post(self.table_url(table)))
            .query(&[("on_conflict", batch.kind.conflict_key())])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&batch.rows)
            .send()
            .await
            .map_err(Error::backend_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Write {
                table: table.to_string(),
                status: Some(status.as_u16()),
                message,
            });
        }
        Ok(batch.len())
    }

    #[instrument(level = "debug", skip(self))]
    async fn account_states(&self) -> Result<Vec<AccountState>> {
        let table = "facebook_ad_accounts";
        let resp = self
            .authed(self.http.get(self.table_url(table)))
            .query(&[("select", "id,active")])
            .send()
            .await
            .map_err(Error::backend_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Write {
                table: table.to_string(),
                status: Some(status.as_u16()),
                message,
            });
        }
        let rows: Vec<AccountStateRow> = resp.json().await.map_err(Error::backend_reqwest)?;
        Ok(rows
            .into_iter()
            .map(|r| AccountState {
                id: r.id,
                // Rows written before the flag existed count as active.
                active: r.active.unwrap_or(true),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_requires_both_variables() {
        let err = PostgrestConfig::from_lookup(|k| {
            (k == "SUPABASE_URL").then(|| "https://x.supabase.co".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("SUPABASE_SERVICE_ROLE_KEY"));

        let cfg = PostgrestConfig::from_lookup(|k| match k {
            "SUPABASE_URL" => Some("https://x.supabase.co/".into()),
            "SUPABASE_SERVICE_ROLE_KEY" => Some("sb-secret-key".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.url, "https://x.supabase.co");
        assert!(!format!("{cfg:?}").contains("sb-secret-key"));
    }
}

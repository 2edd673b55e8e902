//! Facebook Marketing (Graph) API client.
//!
//! Every listing follows `paging.next` until it is absent and returns the
//! concatenated `data[]` of all pages. Non-2xx responses surface as
//! `Error::Upstream` with the provider body; nothing is retried here.

use super::config::GraphApiConfig;
use super::fields;
use adsync_core::models::{DateWindow, InsightLevel};
use adsync_core::{AdsSource, Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::instrument;

#[derive(Debug, Deserialize)]
struct Page {
    data: Vec<serde_json::Value>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<String>,
}

/// Result of exchanging the configured token for a long-lived one.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenExchange {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Seconds until expiry, when the API reports it.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Clone)]
pub struct GraphApiClient {
    http: Client,
    cfg: GraphApiConfig,
}

impl GraphApiClient {
    #[instrument(level = "debug")]
    pub fn new(cfg: GraphApiConfig) -> Result<Self> {
        cfg.validate()?;
        let http = Client::builder()
            .timeout(cfg.timeout())
            .build()
            .map_err(Error::backend_reqwest)?;
        Ok(Self { http, cfg })
    }

    pub fn config(&self) -> &GraphApiConfig {
        &self.cfg
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.cfg.base_url, path.trim_start_matches('/'))
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<serde_json::Value> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(&self.cfg.access_token)
            .send()
            .await
            .map_err(Error::backend_reqwest)?;

        let status = resp.status();
        let body = resp.text().await.map_err(Error::backend_reqwest)?;
        if !status.is_success() {
            return Err(Error::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| {
            Error::UpstreamMessage(format!("response from {} is not JSON: {e}", redact(url)))
        })
    }

    /// GET `path` with `query`, then every `paging.next` link, collecting `data[]`.
    #[instrument(level = "debug", skip(self, query))]
    pub async fn paginate(
        &self,
        path: &str,
        query: Vec<(&'static str, String)>,
    ) -> Result<Vec<serde_json::Value>> {
        let first = self.url(path);
        let mut records = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();

        let mut next: Option<String> = None;
        for page_no in 0..self.cfg.max_pages {
            let raw = match &next {
                None => self.get(&first, &query).await?,
                // `next` already carries every query parameter.
                Some(url) => self.get(url, &[]).await?,
            };
            let page: Page = serde_json::from_value(raw).map_err(|e| {
                Error::UpstreamMessage(format!(
                    "malformed page {page_no} of {path}: {e}"
                ))
            })?;
            tracing::debug!(page = page_no, records = page.data.len(), "graph page fetched");
            records.extend(page.data);

            match page.paging.and_then(|p| p.next).filter(|n| !n.is_empty()) {
                None => return Ok(records),
                Some(url) => {
                    if !visited.insert(url.clone()) {
                        return Err(Error::UpstreamMessage(format!(
                            "pagination of {path} repeated a next link"
                        )));
                    }
                    next = Some(url);
                }
            }
        }
        Err(Error::UpstreamMessage(format!(
            "pagination of {path} exceeded {} pages",
            self.cfg.max_pages
        )))
    }

    /// Exchange the configured token for a long-lived one (`fb_exchange_token` grant).
    #[instrument(level = "info", skip(self))]
    pub async fn exchange_token(&self) -> Result<TokenExchange> {
        let (Some(app_id), Some(app_secret)) = (&self.cfg.app_id, &self.cfg.app_secret) else {
            return Err(Error::InvalidInput(
                "FACEBOOK_APP_ID and FACEBOOK_APP_SECRET are required for token exchange"
                    .to_string(),
            ));
        };
        let raw = self
            .get(
                &self.url("oauth/access_token"),
                &[
                    ("grant_type", "fb_exchange_token".to_string()),
                    ("client_id", app_id.clone()),
                    ("client_secret", app_secret.clone()),
                    ("fb_exchange_token", self.cfg.access_token.clone()),
                ],
            )
            .await?;
        serde_json::from_value(raw)
            .map_err(|e| Error::UpstreamMessage(format!("unexpected token exchange response: {e}")))
    }
}

/// Drop the query string so tokens never reach logs or errors.
fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[async_trait]
impl AdsSource for GraphApiClient {
    #[instrument(level = "info", skip(self))]
    async fn list_ad_accounts(&self) -> Result<Vec<serde_json::Value>> {
        self.paginate(
            "me/adaccounts",
            vec![
                ("fields", fields::AD_ACCOUNT.to_string()),
                ("limit", self.cfg.page_limit.min(100).to_string()),
            ],
        )
        .await
    }

    #[instrument(level = "info", skip(self))]
    async fn get_ad_account(&self, account_id: &str) -> Result<serde_json::Value> {
        let raw = self
            .get(
                &self.url(account_id),
                &[("fields", fields::AD_ACCOUNT.to_string())],
            )
            .await?;
        if !raw.is_object() {
            return Err(Error::UpstreamMessage(format!(
                "ad account {account_id} response is not an object"
            )));
        }
        Ok(raw)
    }

    #[instrument(level = "info", skip(self))]
    async fn list_campaigns(&self, account_id: &str) -> Result<Vec<serde_json::Value>> {
        self.paginate(
            &format!("{account_id}/campaigns"),
            vec![
                ("fields", fields::CAMPAIGN.to_string()),
                ("limit", self.cfg.page_limit.to_string()),
            ],
        )
        .await
    }

    #[instrument(level = "info", skip(self))]
    async fn list_adsets(&self, account_id: &str) -> Result<Vec<serde_json::Value>> {
        self.paginate(
            &format!("{account_id}/adsets"),
            vec![
                ("fields", fields::ADSET.to_string()),
                ("limit", self.cfg.page_limit.to_string()),
            ],
        )
        .await
    }

    #[instrument(level = "info", skip(self))]
    async fn list_ads(&self, account_id: &str) -> Result<Vec<serde_json::Value>> {
        self.paginate(
            &format!("{account_id}/ads"),
            vec![
                ("fields", fields::AD.to_string()),
                ("limit", self.cfg.page_limit.to_string()),
            ],
        )
        .await
    }

    #[instrument(level = "info", skip(self, metrics))]
    async fn list_insights(
        &self,
        account_id: &str,
        level: InsightLevel,
        window: DateWindow,
        metrics: &[String],
    ) -> Result<Vec<serde_json::Value>> {
        let time_range = serde_json::json!({
            "since": window.since.to_string(),
            "until": window.until.to_string(),
        });
        self.paginate(
            &format!("{account_id}/insights"),
            vec![
                ("fields", fields::insight_fields(metrics)),
                ("level", level.as_str().to_string()),
                ("time_range", time_range.to_string()),
                ("time_increment", "1".to_string()),
                ("limit", self.cfg.insights_page_limit.to_string()),
            ],
        )
        .await
    }
}

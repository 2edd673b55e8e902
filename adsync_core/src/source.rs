use crate::models::{DateWindow, InsightLevel};
use crate::Result;
use async_trait::async_trait;

/// Default insight metrics requested at every level.
pub const DEFAULT_METRICS: &[&str] = &[
    "spend",
    "impressions",
    "reach",
    "frequency",
    "clicks",
    "unique_clicks",
    "ctr",
    "unique_ctr",
    "cpc",
    "cpm",
    "cpp",
    "actions",
    "action_values",
    "cost_per_action_type",
    "video_p25_watched_actions",
    "video_p50_watched_actions",
    "video_p75_watched_actions",
    "video_p100_watched_actions",
];

/// Read side of the pipeline: every listing returns the raw `data[]` records
/// of all pages, in page order.
///
/// Implementations live in `adsync_integrations` (Graph API) or in tests.
#[async_trait]
pub trait AdsSource: Send + Sync {
    /// Ad accounts visible to the configured token (`/me/adaccounts`).
    async fn list_ad_accounts(&self) -> Result<Vec<serde_json::Value>>;

    /// A single ad account by id (`act_<n>`).
    async fn get_ad_account(&self, account_id: &str) -> Result<serde_json::Value>;

    async fn list_campaigns(&self, account_id: &str) -> Result<Vec<serde_json::Value>>;

    async fn list_adsets(&self, account_id: &str) -> Result<Vec<serde_json::Value>>;

    async fn list_ads(&self, account_id: &str) -> Result<Vec<serde_json::Value>>;

    /// Daily insight rows (`time_increment=1`) for `window` at `level`.
    async fn list_insights(
        &self,
        account_id: &str,
        level: InsightLevel,
        window: DateWindow,
        metrics: &[String],
    ) -> Result<Vec<serde_json::Value>>;
}

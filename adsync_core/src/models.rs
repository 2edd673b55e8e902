use crate::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Aggregation level of an insights request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightLevel {
    Campaign,
    Adset,
    Ad,
}

impl InsightLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightLevel::Campaign => "campaign",
            InsightLevel::Adset => "adset",
            InsightLevel::Ad => "ad",
        }
    }

    /// Field of an insight payload that identifies the entity at this level.
    pub fn id_field(&self) -> &'static str {
        match self {
            InsightLevel::Campaign => "campaign_id",
            InsightLevel::Adset => "adset_id",
            InsightLevel::Ad => "ad_id",
        }
    }
}

impl fmt::Display for InsightLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsightLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "campaign" => Ok(InsightLevel::Campaign),
            "adset" => Ok(InsightLevel::Adset),
            "ad" => Ok(InsightLevel::Ad),
            other => Err(Error::InvalidInput(format!(
                "unknown insight level '{other}' (expected campaign, adset or ad)"
            ))),
        }
    }
}

/// Destination table family. Each kind maps to one table and one conflict key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    AdAccount,
    Campaign,
    AdSet,
    Ad,
    Insight(InsightLevel),
}

impl EntityKind {
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::AdAccount => "facebook_ad_accounts",
            EntityKind::Campaign => "facebook_campaigns",
            EntityKind::AdSet => "facebook_adsets",
            EntityKind::Ad => "facebook_ads",
            EntityKind::Insight(InsightLevel::Campaign) => "facebook_campaign_insights",
            EntityKind::Insight(InsightLevel::Adset) => "facebook_adset_insights",
            EntityKind::Insight(InsightLevel::Ad) => "facebook_insights",
        }
    }

    /// Columns of the upsert conflict target.
    ///
    /// Insight tables are keyed by the level's own id column and the day.
    pub fn conflict_columns(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Insight(InsightLevel::Campaign) => &["campaign_id", "date"],
            EntityKind::Insight(InsightLevel::Adset) => &["adset_id", "date"],
            EntityKind::Insight(InsightLevel::Ad) => &["ad_id", "date"],
            _ => &["id"],
        }
    }

    pub fn conflict_key(&self) -> String {
        self.conflict_columns().join(",")
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Inclusive date range (UTC calendar days) of an insights sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub since: NaiveDate,
    pub until: NaiveDate,
}

impl DateWindow {
    pub fn new(since: NaiveDate, until: NaiveDate) -> Result<Self> {
        if since > until {
            return Err(Error::InvalidInput(format!(
                "date window start {since} is after end {until}"
            )));
        }
        Ok(Self { since, until })
    }

    /// `days_back` days before `today` through `today` (1 = yesterday..today).
    pub fn trailing(today: NaiveDate, days_back: u32) -> Result<Self> {
        let since = today
            .checked_sub_signed(Duration::days(i64::from(days_back)))
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "window of {days_back} days before {today} is out of range"
                ))
            })?;
        Ok(Self {
            since,
            until: today,
        })
    }

    /// Resolve optional ISO dates from a job into a concrete window.
    ///
    /// A missing bound falls back to the trailing default around the other bound.
    pub fn resolve(
        start: Option<&str>,
        end: Option<&str>,
        today: NaiveDate,
        days_back: u32,
    ) -> Result<Self> {
        let start = start.map(parse_date).transpose()?;
        let end = end.map(parse_date).transpose()?;
        match (start, end) {
            (Some(s), Some(e)) => Self::new(s, e),
            (Some(s), None) => Self::new(s, today.max(s)),
            (None, Some(e)) => Self::trailing(e, days_back),
            (None, None) => Self::trailing(today, days_back),
        }
    }

    pub fn days(&self) -> i64 {
        (self.until - self.since).num_days() + 1
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.since, self.until)
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| Error::InvalidInput(format!("invalid ISO date '{raw}': {e}")))
}

/// Stored activation state of an ad account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub id: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdAccountRow {
    pub id: String,
    pub name: Option<String>,
    pub currency: Option<String>,
    pub timezone: Option<String>,
    pub account_status: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRow {
    pub id: String,
    pub account_id: String,
    pub name: Option<String>,
    pub status: Option<String>,
    pub effective_status: Option<String>,
    pub objective: Option<String>,
    pub buying_type: Option<String>,
    pub daily_budget: Option<f64>,
    pub lifetime_budget: Option<f64>,
    pub budget_remaining: Option<f64>,
    pub start_time: Option<String>,
    pub stop_time: Option<String>,
    pub created_time: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdSetRow {
    pub id: String,
    pub campaign_id: Option<String>,
    pub account_id: String,
    pub name: Option<String>,
    pub status: Option<String>,
    pub effective_status: Option<String>,
    pub optimization_goal: Option<String>,
    pub billing_event: Option<String>,
    pub bid_amount: Option<f64>,
    pub daily_budget: Option<f64>,
    pub lifetime_budget: Option<f64>,
    /// Opaque targeting spec, stored as-is.
    pub targeting: Option<serde_json::Value>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub created_time: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdRow {
    pub id: String,
    pub adset_id: Option<String>,
    pub campaign_id: Option<String>,
    pub account_id: String,
    pub name: Option<String>,
    pub status: Option<String>,
    pub effective_status: Option<String>,
    pub creative_id: Option<String>,
    pub creative_thumbnail_url: Option<String>,
    pub preview_shareable_link: Option<String>,
    pub created_time: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Metrics of one entity on one day.
///
/// `actions` holds every column of the active `ActionMapping`; it is flattened
/// into the row so each mapped action becomes a top-level numeric column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightRow {
    pub account_id: String,
    /// Implied by the destination table; not a column.
    #[serde(skip_serializing)]
    pub level: InsightLevel,
    /// Same value as the level's id column; not a column.
    #[serde(skip_serializing)]
    pub entity_id: String,
    pub campaign_id: Option<String>,
    pub adset_id: Option<String>,
    pub ad_id: Option<String>,
    pub date: NaiveDate,

    pub spend: f64,
    pub impressions: i64,
    pub reach: i64,
    pub frequency: f64,
    pub clicks: i64,
    pub unique_clicks: i64,
    pub ctr: f64,
    pub unique_ctr: f64,
    pub cpc: f64,
    pub cpm: f64,
    pub cpp: f64,
    pub roas: f64,

    pub video_p25_watched: f64,
    pub video_p50_watched: f64,
    pub video_p75_watched: f64,
    pub video_p100_watched: f64,

    #[serde(flatten)]
    pub actions: BTreeMap<String, f64>,

    pub updated_at: DateTime<Utc>,
}

impl InsightRow {
    /// Value of a mapped action column (0 when the column is not mapped).
    pub fn action(&self, column: &str) -> f64 {
        self.actions.get(column).copied().unwrap_or(0.0)
    }
}

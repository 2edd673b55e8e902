//! Raw Graph API payloads to relational rows.
//!
//! Two steps: `GraphRecord::decode` turns a raw JSON value into a typed
//! variant, then the `Normalizer` flattens it into the row type of its table.

pub mod actions;
pub mod payload;

pub use actions::{ActionColumn, ActionMapping, ActionSource};
pub use payload::{GraphNumber, GraphRecord};

use crate::models::{
    parse_date, AdAccountRow, AdRow, AdSetRow, CampaignRow, EntityKind, InsightLevel, InsightRow,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use payload::{ActionStat, GraphAd, GraphAdAccount, GraphAdSet, GraphCampaign, GraphInsight};
use std::collections::HashMap;

/// Rows produced from one fetched batch plus how many raw records were dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized<T> {
    pub rows: Vec<T>,
    pub skipped: usize,
}

impl<T> Normalized<T> {
    fn empty() -> Self {
        Self {
            rows: Vec::new(),
            skipped: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    mapping: ActionMapping,
}

impl Normalizer {
    pub fn new(mapping: ActionMapping) -> Self {
        Self { mapping }
    }

    pub fn mapping(&self) -> &ActionMapping {
        &self.mapping
    }

    #[tracing::instrument(level = "debug", skip(self, raw), fields(records = raw.len()))]
    pub fn accounts(
        &self,
        raw: &[serde_json::Value],
        now: DateTime<Utc>,
    ) -> Result<Normalized<AdAccountRow>> {
        normalize_batch(
            EntityKind::AdAccount,
            raw,
            |r| match r {
                GraphRecord::Account(a) => Ok(account_row(a, now)),
                other => Err(unexpected(EntityKind::AdAccount, &other)),
            },
            |row| row.id.clone(),
        )
    }

    #[tracing::instrument(level = "debug", skip(self, raw), fields(records = raw.len()))]
    pub fn campaigns(
        &self,
        account_id: &str,
        raw: &[serde_json::Value],
        now: DateTime<Utc>,
    ) -> Result<Normalized<CampaignRow>> {
        normalize_batch(
            EntityKind::Campaign,
            raw,
            |r| match r {
                GraphRecord::Campaign(c) => Ok(campaign_row(c, account_id, now)),
                other => Err(unexpected(EntityKind::Campaign, &other)),
            },
            |row| row.id.clone(),
        )
    }

    #[tracing::instrument(level = "debug", skip(self, raw), fields(records = raw.len()))]
    pub fn adsets(
        &self,
        account_id: &str,
        raw: &[serde_json::Value],
        now: DateTime<Utc>,
    ) -> Result<Normalized<AdSetRow>> {
        normalize_batch(
            EntityKind::AdSet,
            raw,
            |r| match r {
                GraphRecord::AdSet(s) => Ok(adset_row(s, account_id, now)),
                other => Err(unexpected(EntityKind::AdSet, &other)),
            },
            |row| row.id.clone(),
        )
    }

    #[tracing::instrument(level = "debug", skip(self, raw), fields(records = raw.len()))]
    pub fn ads(
        &self,
        account_id: &str,
        raw: &[serde_json::Value],
        now: DateTime<Utc>,
    ) -> Result<Normalized<AdRow>> {
        normalize_batch(
            EntityKind::Ad,
            raw,
            |r| match r {
                GraphRecord::Ad(a) => Ok(ad_row(a, account_id, now)),
                other => Err(unexpected(EntityKind::Ad, &other)),
            },
            |row| row.id.clone(),
        )
    }

    #[tracing::instrument(level = "debug", skip(self, raw), fields(records = raw.len()))]
    pub fn insights(
        &self,
        account_id: &str,
        level: InsightLevel,
        raw: &[serde_json::Value],
        now: DateTime<Utc>,
    ) -> Result<Normalized<InsightRow>> {
        let kind = EntityKind::Insight(level);
        normalize_batch(
            kind,
            raw,
            |r| match r {
                GraphRecord::Insight(i) => self.insight_row(&i, account_id, level, now),
                other => Err(unexpected(kind, &other)),
            },
            |row| format!("{}|{}", row.entity_id, row.date),
        )
    }

    /// Flatten one decoded insight into a row for `level`.
    pub fn insight_row(
        &self,
        insight: &GraphInsight,
        account_id: &str,
        level: InsightLevel,
        now: DateTime<Utc>,
    ) -> Result<InsightRow> {
        let entity_id = insight.entity_id(level).ok_or_else(|| {
            Error::normalization(format!(
                "{level} insight is missing '{}'",
                level.id_field()
            ))
        })?;

        let date = parse_date(&insight.date_start)
            .map_err(|_| Error::normalization(format!("invalid date_start '{}'", insight.date_start)))?;
        if let Some(stop) = &insight.date_stop {
            let stop = parse_date(stop)
                .map_err(|_| Error::normalization(format!("invalid date_stop '{stop}'")))?;
            if stop != date {
                return Err(Error::normalization(format!(
                    "insight spans {date}..{stop}; expected one row per day"
                )));
            }
        }

        let spend = num(insight.spend);
        let actions = self.mapping.extract(insight, spend);
        let revenue = self.mapping.revenue(&actions);
        let roas = if spend > 0.0 { revenue / spend } else { 0.0 };

        Ok(InsightRow {
            account_id: account_id.to_string(),
            level,
            entity_id: entity_id.to_string(),
            campaign_id: insight.campaign_id.clone(),
            adset_id: insight.adset_id.clone(),
            ad_id: insight.ad_id.clone(),
            date,
            spend,
            impressions: count(insight.impressions),
            reach: count(insight.reach),
            frequency: num(insight.frequency),
            clicks: count(insight.clicks),
            unique_clicks: count(insight.unique_clicks),
            ctr: num(insight.ctr),
            unique_ctr: num(insight.unique_ctr),
            cpc: num(insight.cpc),
            cpm: num(insight.cpm),
            cpp: num(insight.cpp),
            roas,
            video_p25_watched: first_value(&insight.video_p25_watched_actions),
            video_p50_watched: first_value(&insight.video_p50_watched_actions),
            video_p75_watched: first_value(&insight.video_p75_watched_actions),
            video_p100_watched: first_value(&insight.video_p100_watched_actions),
            actions,
            updated_at: now,
        })
    }
}

/// Decode and flatten every record, skipping malformed ones.
///
/// Fails only when a non-empty batch produced no rows at all. Rows sharing
/// a conflict key keep the last occurrence so one upsert never touches the
/// same key twice.
fn normalize_batch<T>(
    kind: EntityKind,
    raw: &[serde_json::Value],
    mut flatten: impl FnMut(GraphRecord) -> Result<T>,
    key: impl Fn(&T) -> String,
) -> Result<Normalized<T>> {
    if raw.is_empty() {
        return Ok(Normalized::empty());
    }

    let mut rows: Vec<T> = Vec::with_capacity(raw.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut skipped = 0usize;
    let mut last_error: Option<Error> = None;

    for (pos, value) in raw.iter().enumerate() {
        match GraphRecord::decode(kind, value).and_then(&mut flatten) {
            Ok(row) => {
                let k = key(&row);
                if let Some(&existing) = index.get(&k) {
                    tracing::debug!(table = kind.table(), key = %k, "duplicate key in batch; keeping last");
                    rows[existing] = row;
                } else {
                    index.insert(k, rows.len());
                    rows.push(row);
                }
            }
            Err(e) => {
                tracing::warn!(table = kind.table(), position = pos, error = %e, "skipping malformed record");
                skipped += 1;
                last_error = Some(e);
            }
        }
    }

    if rows.is_empty() {
        let detail = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no usable records".to_string());
        return Err(Error::normalization(format!(
            "all {} {kind} records were malformed; last: {detail}",
            raw.len()
        )));
    }

    Ok(Normalized { rows, skipped })
}

fn unexpected(kind: EntityKind, record: &GraphRecord) -> Error {
    Error::normalization(format!("decoded {record:?} while normalizing {kind}"))
}

fn num(v: Option<GraphNumber>) -> f64 {
    v.map(GraphNumber::value).unwrap_or(0.0)
}

fn count(v: Option<GraphNumber>) -> i64 {
    num(v).round() as i64
}

/// Budgets arrive in minor currency units.
fn budget(v: Option<GraphNumber>) -> Option<f64> {
    v.map(|n| n.value() / 100.0)
}

fn first_value(stats: &[ActionStat]) -> f64 {
    stats.first().map(|s| s.value.value()).unwrap_or(0.0)
}

fn account_row(a: GraphAdAccount, now: DateTime<Utc>) -> AdAccountRow {
    AdAccountRow {
        id: a.id,
        name: a.name,
        currency: a.currency,
        timezone: a.timezone_name,
        account_status: a.account_status.map(|n| n.value() as i64),
        updated_at: now,
    }
}

fn campaign_row(c: GraphCampaign, account_id: &str, now: DateTime<Utc>) -> CampaignRow {
    CampaignRow {
        id: c.id,
        account_id: account_id.to_string(),
        name: c.name,
        status: c.status,
        effective_status: c.effective_status,
        objective: c.objective,
        buying_type: c.buying_type,
        daily_budget: budget(c.daily_budget),
        lifetime_budget: budget(c.lifetime_budget),
        budget_remaining: budget(c.budget_remaining),
        start_time: c.start_time,
        stop_time: c.stop_time,
        created_time: c.created_time,
        updated_at: now,
    }
}

fn adset_row(s: GraphAdSet, account_id: &str, now: DateTime<Utc>) -> AdSetRow {
    AdSetRow {
        id: s.id,
        campaign_id: s.campaign_id,
        account_id: account_id.to_string(),
        name: s.name,
        status: s.status,
        effective_status: s.effective_status,
        optimization_goal: s.optimization_goal,
        billing_event: s.billing_event,
        bid_amount: budget(s.bid_amount),
        daily_budget: budget(s.daily_budget),
        lifetime_budget: budget(s.lifetime_budget),
        targeting: s.targeting,
        start_time: s.start_time,
        end_time: s.end_time,
        created_time: s.created_time,
        updated_at: now,
    }
}

fn ad_row(a: GraphAd, account_id: &str, now: DateTime<Utc>) -> AdRow {
    let (creative_id, creative_thumbnail_url) = match a.creative {
        Some(c) => (c.id, c.thumbnail_url),
        None => (None, None),
    };
    AdRow {
        id: a.id,
        adset_id: a.adset_id,
        campaign_id: a.campaign_id,
        account_id: account_id.to_string(),
        name: a.name,
        status: a.status,
        effective_status: a.effective_status,
        creative_id,
        creative_thumbnail_url,
        preview_shareable_link: a.preview_shareable_link,
        created_time: a.created_time,
        updated_at: now,
    }
}

//! Typed shapes of the Graph API payloads the pipeline consumes.
//!
//! Decoding is the only place raw JSON is inspected; everything downstream
//! works with these structs.

use crate::models::EntityKind;
use crate::{Error, Result};
use serde::{Deserialize, Deserializer};

/// Numeric field the Graph API may deliver as a JSON string or a JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GraphNumber(pub f64);

impl GraphNumber {
    pub fn value(self) -> f64 {
        self.0
    }
}

impl<'de> Deserialize<'de> for GraphNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        let n = match Raw::deserialize(deserializer)? {
            Raw::Number(n) => n,
            Raw::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| serde::de::Error::custom(format!("invalid numeric string '{s}'")))?,
        };
        // Non-finite values would serialize as null columns.
        if !n.is_finite() {
            return Err(serde::de::Error::custom(format!("non-finite number {n}")));
        }
        Ok(GraphNumber(n))
    }
}

/// One `{action_type, value}` entry of `actions`, `action_values`,
/// `cost_per_action_type` or the `video_pNN_watched_actions` arrays.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActionStat {
    pub action_type: String,
    pub value: GraphNumber,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GraphAdAccount {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub timezone_name: Option<String>,
    #[serde(default)]
    pub account_status: Option<GraphNumber>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GraphCampaign {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub effective_status: Option<String>,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub buying_type: Option<String>,
    #[serde(default)]
    pub daily_budget: Option<GraphNumber>,
    #[serde(default)]
    pub lifetime_budget: Option<GraphNumber>,
    #[serde(default)]
    pub budget_remaining: Option<GraphNumber>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub stop_time: Option<String>,
    #[serde(default)]
    pub created_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GraphAdSet {
    pub id: String,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub effective_status: Option<String>,
    #[serde(default)]
    pub optimization_goal: Option<String>,
    #[serde(default)]
    pub billing_event: Option<String>,
    #[serde(default)]
    pub bid_amount: Option<GraphNumber>,
    #[serde(default)]
    pub daily_budget: Option<GraphNumber>,
    #[serde(default)]
    pub lifetime_budget: Option<GraphNumber>,
    #[serde(default)]
    pub targeting: Option<serde_json::Value>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub created_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GraphCreative {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GraphAd {
    pub id: String,
    #[serde(default)]
    pub adset_id: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub effective_status: Option<String>,
    #[serde(default)]
    pub creative: Option<GraphCreative>,
    #[serde(default)]
    pub preview_shareable_link: Option<String>,
    #[serde(default)]
    pub created_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GraphInsight {
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub adset_id: Option<String>,
    #[serde(default)]
    pub ad_id: Option<String>,
    pub date_start: String,
    #[serde(default)]
    pub date_stop: Option<String>,

    #[serde(default)]
    pub spend: Option<GraphNumber>,
    #[serde(default)]
    pub impressions: Option<GraphNumber>,
    #[serde(default)]
    pub reach: Option<GraphNumber>,
    #[serde(default)]
    pub frequency: Option<GraphNumber>,
    #[serde(default)]
    pub clicks: Option<GraphNumber>,
    #[serde(default)]
    pub unique_clicks: Option<GraphNumber>,
    #[serde(default)]
    pub ctr: Option<GraphNumber>,
    #[serde(default)]
    pub unique_ctr: Option<GraphNumber>,
    #[serde(default)]
    pub cpc: Option<GraphNumber>,
    #[serde(default)]
    pub cpm: Option<GraphNumber>,
    #[serde(default)]
    pub cpp: Option<GraphNumber>,

    #[serde(default)]
    pub actions: Vec<ActionStat>,
    #[serde(default)]
    pub action_values: Vec<ActionStat>,
    #[serde(default)]
    pub cost_per_action_type: Vec<ActionStat>,

    #[serde(default)]
    pub video_p25_watched_actions: Vec<ActionStat>,
    #[serde(default)]
    pub video_p50_watched_actions: Vec<ActionStat>,
    #[serde(default)]
    pub video_p75_watched_actions: Vec<ActionStat>,
    #[serde(default)]
    pub video_p100_watched_actions: Vec<ActionStat>,
}

impl GraphInsight {
    /// Id of the entity this row describes at `level`.
    pub fn entity_id(&self, level: crate::models::InsightLevel) -> Option<&str> {
        use crate::models::InsightLevel;
        let id = match level {
            InsightLevel::Campaign => self.campaign_id.as_deref(),
            InsightLevel::Adset => self.adset_id.as_deref(),
            InsightLevel::Ad => self.ad_id.as_deref(),
        };
        id.filter(|s| !s.trim().is_empty())
    }
}

/// A decoded Graph API record, tagged by the entity type it was requested as.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphRecord {
    Account(GraphAdAccount),
    Campaign(GraphCampaign),
    AdSet(GraphAdSet),
    Ad(GraphAd),
    Insight(GraphInsight),
}

impl GraphRecord {
    /// Decode one raw record, failing fast on structurally unexpected input.
    pub fn decode(kind: EntityKind, raw: &serde_json::Value) -> Result<Self> {
        if !raw.is_object() {
            return Err(Error::normalization(format!(
                "{kind} record is not a JSON object"
            )));
        }

        let record = match kind {
            EntityKind::AdAccount => GraphAdAccount::deserialize(raw).map(GraphRecord::Account),
            EntityKind::Campaign => GraphCampaign::deserialize(raw).map(GraphRecord::Campaign),
            EntityKind::AdSet => GraphAdSet::deserialize(raw).map(GraphRecord::AdSet),
            EntityKind::Ad => GraphAd::deserialize(raw).map(GraphRecord::Ad),
            EntityKind::Insight(_) => GraphInsight::deserialize(raw).map(GraphRecord::Insight),
        }
        .map_err(|e| Error::normalization(format!("{kind} record: {e}")))?;

        if let Some(id) = record.id() {
            if id.trim().is_empty() {
                return Err(Error::normalization(format!("{kind} record has an empty id")));
            }
        }
        Ok(record)
    }

    /// External id for entity records; insights are keyed by level instead.
    pub fn id(&self) -> Option<&str> {
        match self {
            GraphRecord::Account(a) => Some(&a.id),
            GraphRecord::Campaign(c) => Some(&c.id),
            GraphRecord::AdSet(s) => Some(&s.id),
            GraphRecord::Ad(a) => Some(&a.id),
            GraphRecord::Insight(_) => None,
        }
    }
}

use super::payload::{ActionStat, GraphInsight};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Insight row fields that mapped action columns must not shadow.
const RESERVED_COLUMNS: &[&str] = &[
    "account_id",
    "level",
    "entity_id",
    "campaign_id",
    "adset_id",
    "ad_id",
    "date",
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
    "roas",
    "video_p25_watched",
    "video_p50_watched",
    "video_p75_watched",
    "video_p100_watched",
    "updated_at",
];

/// Which `{action_type, value}` array of an insight a column reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSource {
    #[default]
    Actions,
    ActionValues,
    CostPerActionType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionColumn {
    /// Output column name.
    pub column: String,
    #[serde(default)]
    pub source: ActionSource,
    /// Candidate action types in priority order; the first non-zero one wins.
    pub action_types: Vec<String>,
    /// Fallback when no candidate has a value: spend divided by this
    /// (earlier) column, e.g. cost per lead = spend / leads.
    #[serde(default)]
    pub spend_per: Option<String>,
}

impl ActionColumn {
    fn new(column: &str, source: ActionSource, action_types: &[&str]) -> Self {
        Self {
            column: column.to_string(),
            source,
            action_types: action_types.iter().map(|s| s.to_string()).collect(),
            spend_per: None,
        }
    }

    fn with_spend_per(mut self, column: &str) -> Self {
        self.spend_per = Some(column.to_string());
        self
    }
}

/// Mapping from generic action arrays to named numeric insight columns.
///
/// Action types that no column lists are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionMapping {
    pub columns: Vec<ActionColumn>,
    /// Column holding attributed revenue; `roas = revenue / spend`.
    #[serde(default)]
    pub revenue_column: Option<String>,
}

impl Default for ActionMapping {
    fn default() -> Self {
        use ActionSource::*;
        Self {
            columns: vec![
                ActionColumn::new(
                    "leads",
                    Actions,
                    &[
                        "lead",
                        "onsite_conversion.lead_grouped",
                        "offsite_conversion.fb_pixel_lead",
                    ],
                ),
                ActionColumn::new(
                    "purchases",
                    Actions,
                    &[
                        "purchase",
                        "offsite_conversion.fb_pixel_purchase",
                        "onsite_conversion.purchase",
                    ],
                ),
                ActionColumn::new(
                    "add_to_cart",
                    Actions,
                    &["add_to_cart", "offsite_conversion.fb_pixel_add_to_cart"],
                ),
                ActionColumn::new(
                    "initiate_checkout",
                    Actions,
                    &[
                        "initiate_checkout",
                        "offsite_conversion.fb_pixel_initiate_checkout",
                    ],
                ),
                ActionColumn::new("landing_page_views", Actions, &["landing_page_view"]),
                ActionColumn::new("link_clicks", Actions, &["link_click"]),
                ActionColumn::new("video_views", Actions, &["video_view"]),
                ActionColumn::new(
                    "purchase_value",
                    ActionValues,
                    &["purchase", "offsite_conversion.fb_pixel_purchase"],
                ),
                ActionColumn::new("lead_value", ActionValues, &["lead"]),
                ActionColumn::new(
                    "cost_per_lead",
                    CostPerActionType,
                    &["lead", "offsite_conversion.fb_pixel_lead"],
                )
                .with_spend_per("leads"),
                ActionColumn::new(
                    "cost_per_purchase",
                    CostPerActionType,
                    &["purchase", "offsite_conversion.fb_pixel_purchase"],
                )
                .with_spend_per("purchases"),
            ],
            revenue_column: Some("purchase_value".to_string()),
        }
    }
}

impl ActionMapping {
    /// Parse a mapping from JSON (same shape as the serialized form) and validate it.
    pub fn from_json(raw: &str) -> Result<Self> {
        let mapping: ActionMapping = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidInput(format!("invalid action mapping json: {e}")))?;
        mapping.validate()?;
        Ok(mapping)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        for col in &self.columns {
            let name = col.column.trim();
            if name.is_empty() {
                return Err(Error::InvalidInput("action column name is empty".to_string()));
            }
            if RESERVED_COLUMNS.contains(&name) {
                return Err(Error::InvalidInput(format!(
                    "action column '{name}' collides with a fixed insight column"
                )));
            }
            if col.action_types.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "action column '{name}' lists no action types"
                )));
            }
            if let Some(dep) = &col.spend_per {
                if !seen.contains(dep.as_str()) {
                    return Err(Error::InvalidInput(format!(
                        "action column '{name}' falls back to '{dep}', which must be declared before it"
                    )));
                }
            }
            if !seen.insert(name) {
                return Err(Error::InvalidInput(format!(
                    "action column '{name}' is declared twice"
                )));
            }
        }
        if let Some(rev) = &self.revenue_column {
            if !seen.contains(rev.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "revenue column '{rev}' is not a mapped action column"
                )));
            }
        }
        Ok(())
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.column.as_str())
    }

    /// Flatten the action arrays of `insight` into one value per mapped column.
    ///
    /// Every mapped column is present in the output; absent actions yield 0.
    pub fn extract(&self, insight: &GraphInsight, spend: f64) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for col in &self.columns {
            let stats = match col.source {
                ActionSource::Actions => &insight.actions,
                ActionSource::ActionValues => &insight.action_values,
                ActionSource::CostPerActionType => &insight.cost_per_action_type,
            };

            let mut value = col
                .action_types
                .iter()
                .map(|t| lookup(stats, t))
                .find(|v| *v != 0.0)
                .unwrap_or(0.0);

            if value == 0.0 {
                if let Some(dep) = &col.spend_per {
                    let count = out.get(dep).copied().unwrap_or(0.0);
                    if count > 0.0 {
                        value = spend / count;
                    }
                }
            }

            out.insert(col.column.clone(), value);
        }
        out
    }

    pub fn revenue(&self, columns: &BTreeMap<String, f64>) -> f64 {
        self.revenue_column
            .as_ref()
            .and_then(|c| columns.get(c))
            .copied()
            .unwrap_or(0.0)
    }
}

fn lookup(stats: &[ActionStat], action_type: &str) -> f64 {
    stats
        .iter()
        .find(|s| s.action_type == action_type)
        .map(|s| s.value.value())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::payload::GraphNumber;

    fn stat(t: &str, v: f64) -> ActionStat {
        ActionStat {
            action_type: t.to_string(),
            value: GraphNumber(v),
        }
    }

    fn insight(actions: Vec<ActionStat>) -> GraphInsight {
        serde_json::from_value::<GraphInsight>(serde_json::json!({
            "ad_id": "1",
            "date_start": "2024-01-01"
        }))
        .map(|mut i| {
            i.actions = actions;
            i
        })
        .unwrap()
    }

    #[test]
    fn default_mapping_is_valid() {
        ActionMapping::default().validate().unwrap();
    }

    #[test]
    fn first_non_zero_candidate_wins() {
        let mapping = ActionMapping::default();
        let i = insight(vec![
            stat("offsite_conversion.fb_pixel_purchase", 4.0),
            stat("purchase", 0.0),
        ]);
        let cols = mapping.extract(&i, 0.0);
        assert_eq!(cols["purchases"], 4.0);
    }

    #[test]
    fn cost_per_falls_back_to_spend_over_count() {
        let mapping = ActionMapping::default();
        let i = insight(vec![stat("lead", 5.0)]);
        let cols = mapping.extract(&i, 50.0);
        assert_eq!(cols["leads"], 5.0);
        assert_eq!(cols["cost_per_lead"], 10.0);
        // No purchases: fallback divides by zero count, so it stays 0.
        assert_eq!(cols["cost_per_purchase"], 0.0);
    }

    #[test]
    fn rejects_bad_mappings() {
        let dup = r#"{"columns":[
            {"column":"leads","action_types":["lead"]},
            {"column":"leads","action_types":["onsite_conversion.lead_grouped"]}
        ]}"#;
        assert!(ActionMapping::from_json(dup).is_err());

        let reserved = r#"{"columns":[{"column":"spend","action_types":["x"]}]}"#;
        assert!(ActionMapping::from_json(reserved).is_err());

        let forward = r#"{"columns":[
            {"column":"cpl","source":"cost_per_action_type","action_types":["lead"],"spend_per":"leads"},
            {"column":"leads","action_types":["lead"]}
        ]}"#;
        assert!(ActionMapping::from_json(forward).is_err());

        let revenue = r#"{"columns":[{"column":"leads","action_types":["lead"]}],"revenue_column":"sales"}"#;
        assert!(ActionMapping::from_json(revenue).is_err());
    }

    #[test]
    fn custom_mapping_from_json() {
        let raw = r#"{"columns":[
            {"column":"purchases","action_types":["offsite_conversion.fb_pixel_purchase"]},
            {"column":"revenue","source":"action_values","action_types":["offsite_conversion.fb_pixel_purchase"]}
        ],"revenue_column":"revenue"}"#;
        let mapping = ActionMapping::from_json(raw).unwrap();
        assert_eq!(
            mapping.column_names().collect::<Vec<_>>(),
            vec!["purchases", "revenue"]
        );
    }
}

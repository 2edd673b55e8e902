//! `fields=` selections for each Graph API listing.

pub const AD_ACCOUNT: &str = "id,name,currency,timezone_name,account_status";

pub const CAMPAIGN: &str = "id,name,status,effective_status,objective,buying_type,daily_budget,lifetime_budget,budget_remaining,start_time,stop_time,created_time";

pub const ADSET: &str = "id,campaign_id,name,status,effective_status,optimization_goal,billing_event,bid_amount,daily_budget,lifetime_budget,targeting,start_time,end_time,created_time";

pub const AD: &str = "id,adset_id,campaign_id,name,status,effective_status,creative{id,thumbnail_url},preview_shareable_link,created_time";

/// Ids attached to every insights row so any level can be keyed and joined.
const INSIGHT_IDS: [&str; 3] = ["campaign_id", "adset_id", "ad_id"];

/// Requested metrics plus the id columns, without duplicates, in order.
pub fn insight_fields(metrics: &[String]) -> String {
    let mut out: Vec<&str> = Vec::with_capacity(metrics.len() + INSIGHT_IDS.len());
    for m in metrics.iter().map(String::as_str).chain(INSIGHT_IDS) {
        let m = m.trim();
        if !m.is_empty() && !out.contains(&m) {
            out.push(m);
        }
    }
    out.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insight_fields_append_ids_once() {
        let metrics = vec!["spend".to_string(), "ad_id".to_string(), "actions".to_string()];
        assert_eq!(
            insight_fields(&metrics),
            "spend,ad_id,actions,campaign_id,adset_id"
        );
    }
}

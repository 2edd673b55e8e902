//! Manual trigger: `POST /?action=sync_all|sync_account&account_id=<id>`.
//!
//! The job is only enqueued; the response does not wait for the sync.

use crate::error::ApiError;
use crate::server::AppState;
use adsync_core::models::{parse_date, DateWindow};
use adsync_core::SyncJob;
use axum::extract::Query;
use axum::http::{Method, Uri};
use axum::Extension;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct TriggerQuery {
    pub action: Option<String>,
    pub account_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

fn present(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl TriggerQuery {
    /// Validate the parameters and build the job to enqueue.
    pub fn into_job(self) -> Result<SyncJob, ApiError> {
        let start = present(self.start_date);
        let end = present(self.end_date);
        let since = start.as_deref().map(parse_date).transpose()?;
        let until = end.as_deref().map(parse_date).transpose()?;
        if let (Some(since), Some(until)) = (since, until) {
            DateWindow::new(since, until)?;
        }

        let job = match present(self.action).as_deref().unwrap_or("sync_all") {
            "sync_all" => SyncJob::sync_all(),
            "sync_account" => {
                let account_id = present(self.account_id).ok_or_else(|| {
                    ApiError::InvalidInput("account_id is required for sync_account".to_string())
                })?;
                SyncJob::sync_account(account_id)
            }
            other => {
                return Err(ApiError::InvalidInput(format!(
                    "Invalid action '{other}'. Use: sync_all, sync_account"
                )))
            }
        };
        Ok(job.with_dates(start, end))
    }
}

fn confirmation(job: &SyncJob) -> String {
    match job.account_id() {
        Some(id) => format!("Sync Account {id} Queued"),
        None => "Sync All Queued".to_string(),
    }
}

#[tracing::instrument(level = "info", skip_all, fields(%method))]
pub async fn trigger(
    method: Method,
    uri: Uri,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<String, ApiError> {
    if method != Method::POST {
        return Err(ApiError::MethodNotAllowed);
    }
    let Query(query) = Query::<TriggerQuery>::try_from_uri(&uri)
        .map_err(|e| ApiError::InvalidInput(e.body_text()))?;
    let job = query.into_job()?;

    let message_id = state.queue.send(job.clone()).await?;
    tracing::info!(%message_id, kind = job.kind(), "sync job queued");
    Ok(confirmation(&job))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(action: &str, account_id: Option<&str>) -> TriggerQuery {
        TriggerQuery {
            action: Some(action.to_string()),
            account_id: account_id.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn action_defaults_to_sync_all() {
        let job = TriggerQuery::default().into_job().unwrap();
        assert_eq!(job, SyncJob::sync_all());
        assert_eq!(confirmation(&job), "Sync All Queued");
    }

    #[test]
    fn sync_account_requires_account_id() {
        assert!(matches!(
            query("sync_account", Some("  ")).into_job(),
            Err(ApiError::InvalidInput(_))
        ));
        let job = query("sync_account", Some("act_7")).into_job().unwrap();
        assert_eq!(confirmation(&job), "Sync Account act_7 Queued");
    }

    #[test]
    fn reversed_dates_are_rejected() {
        let q = TriggerQuery {
            start_date: Some("2024-02-01".into()),
            end_date: Some("2024-01-01".into()),
            ..Default::default()
        };
        let err = q.into_job().unwrap_err();
        assert!(matches!(err, ApiError::Core(adsync_core::Error::InvalidInput(_))));
    }
}

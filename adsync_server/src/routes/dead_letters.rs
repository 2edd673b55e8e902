use crate::error::ApiError;
use crate::server::AppState;
use adsync_core::DeadLetter;
use axum::extract::{Path, Query};
use axum::{Extension, Json};
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn list(
    Extension(state): Extension<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<DeadLetter>>, ApiError> {
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    Ok(Json(state.queue.dead_letters(limit).await?))
}

#[tracing::instrument(level = "info", skip(state))]
pub async fn replay(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<String, ApiError> {
    state.queue.replay(&id).await?;
    Ok(format!("Dead letter {id} requeued"))
}

use crate::routes;
use adsync_core::{JobConsumer, JobQueue, SyncScheduler};
use axum::{Extension, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn JobQueue>,
    /// Backend name reported by `/health`.
    pub queue_backend: &'static str,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(queue: Arc<dyn JobQueue>, queue_backend: &'static str) -> Self {
        Self {
            queue,
            queue_backend,
            started_at: Instant::now(),
        }
    }
}

/// Everything `serve` runs: the HTTP state plus the optional background loops.
pub struct Runtime {
    pub state: AppState,
    pub consumer: Option<Arc<JobConsumer>>,
    pub scheduler: Option<Arc<SyncScheduler>>,
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router(state: AppState) -> Router {
    let state = Arc::new(state);
    let request_id = axum::http::HeaderName::from_static("x-request-id");

    Router::new()
        .merge(routes::router())
        .layer(Extension(state))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

#[tracing::instrument(level = "info", skip_all, fields(%addr))]
pub async fn serve(addr: SocketAddr, runtime: Runtime) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let mut loops = Vec::new();

    if let Some(consumer) = runtime.consumer {
        let cancel = cancel.clone();
        loops.push(tokio::spawn(async move { consumer.run_loop(cancel).await }));
    } else {
        tracing::info!("job consumer disabled");
    }
    if let Some(scheduler) = runtime.scheduler {
        let cancel = cancel.clone();
        loops.push(tokio::spawn(async move { scheduler.run_loop(cancel).await }));
    } else {
        tracing::info!("sync scheduler disabled");
    }

    let app = router(runtime.state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("http trigger listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutdown requested");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    for handle in loops {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "background loop ended abnormally");
        }
    }
    Ok(())
}

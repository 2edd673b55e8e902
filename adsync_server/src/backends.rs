//! Wiring from environment configuration to concrete backends.

use crate::config::{QueueBackend, ServerConfig};
use crate::server::{AppState, Runtime};
use adsync_core::{
    JobConsumer, JobQueue, MemoryJobQueue, MirrorStore, SyncEngine, SyncScheduler, SyncSettings,
};
use adsync_integrations::{GraphApiClient, GraphApiConfig, PostgrestConfig, PostgrestStore};
use std::sync::Arc;

/// PostgREST store from `SUPABASE_*`.
pub fn postgrest_store() -> anyhow::Result<Arc<dyn MirrorStore>> {
    Ok(Arc::new(PostgrestStore::new(PostgrestConfig::from_env()?)?))
}

/// Graph API source from `FACEBOOK_*`; fan-out goes to `queue` when given.
#[tracing::instrument(level = "debug", skip_all)]
pub fn build_engine(
    settings: SyncSettings,
    store: Arc<dyn MirrorStore>,
    queue: Option<Arc<dyn JobQueue>>,
) -> anyhow::Result<SyncEngine> {
    let source = GraphApiClient::new(GraphApiConfig::from_env()?)?;
    let engine = SyncEngine::new(Arc::new(source), store, settings);
    Ok(match queue {
        Some(queue) => engine.with_queue(queue),
        None => engine,
    })
}

#[tracing::instrument(level = "debug", skip_all, fields(backend = backend.name()))]
pub async fn build_queue(backend: &QueueBackend) -> anyhow::Result<Arc<dyn JobQueue>> {
    match backend {
        QueueBackend::Memory => Ok(Arc::new(MemoryJobQueue::new())),
        QueueBackend::Sqs { queue_url, dlq_url } => sqs_queue(queue_url, dlq_url).await,
    }
}

#[cfg(feature = "sqs")]
async fn sqs_queue(queue_url: &str, dlq_url: &str) -> anyhow::Result<Arc<dyn JobQueue>> {
    use adsync_integrations::queue_backends::sqs::real::AwsSqsApi;
    use adsync_integrations::queue_backends::SqsJobQueue;

    let api = AwsSqsApi::from_env().await;
    Ok(Arc::new(SqsJobQueue::new(api, queue_url, dlq_url)))
}

#[cfg(not(feature = "sqs"))]
async fn sqs_queue(_queue_url: &str, _dlq_url: &str) -> anyhow::Result<Arc<dyn JobQueue>> {
    anyhow::bail!("ADSYNC_QUEUE=sqs requires adsync built with the `sqs` feature")
}

/// Assemble the HTTP state, consumer and scheduler for `adsync serve`.
#[tracing::instrument(level = "info", skip_all)]
pub async fn build_runtime(cfg: &ServerConfig, settings: SyncSettings) -> anyhow::Result<Runtime> {
    let queue = build_queue(&cfg.queue).await?;

    let consumer = if cfg.consumer_enabled {
        let engine = build_engine(settings.clone(), postgrest_store()?, Some(queue.clone()))?;
        Some(Arc::new(JobConsumer::new(
            queue.clone(),
            Arc::new(engine),
            settings.retry.clone(),
        )?))
    } else {
        None
    };

    let scheduler = match (&settings.schedule, cfg.scheduler_enabled) {
        (Some(expr), true) => Some(Arc::new(SyncScheduler::new(
            expr,
            queue.clone(),
            settings.scheduler_poll(),
            chrono::Utc::now(),
        )?)),
        _ => None,
    };

    tracing::info!(
        queue = cfg.queue.name(),
        consumer = consumer.is_some(),
        scheduler = scheduler.is_some(),
        "runtime assembled"
    );
    Ok(Runtime {
        state: AppState::new(queue, cfg.queue.name()),
        consumer,
        scheduler,
    })
}

use adsync_core::{DeadLetter, Delivery, Error, JobQueue, MemoryJobQueue, Result, SyncJob};
use adsync_server::server::{router, AppState};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Queue whose transport is down.
struct UnreachableQueue;

#[async_trait]
impl JobQueue for UnreachableQueue {
    async fn send(&self, _job: SyncJob) -> Result<String> {
        Err(Error::Queue("connection refused".to_string()))
    }
    async fn receive(&self, _max: usize) -> Result<Vec<Delivery>> {
        Ok(Vec::new())
    }
    async fn ack(&self, _delivery: &Delivery) -> Result<()> {
        Ok(())
    }
    async fn retry(&self, _delivery: &Delivery, _delay: Duration, _reason: &str) -> Result<()> {
        Ok(())
    }
    async fn dead_letter(&self, _delivery: &Delivery, _reason: &str) -> Result<()> {
        Ok(())
    }
    async fn dead_letters(&self, _limit: usize) -> Result<Vec<DeadLetter>> {
        Ok(Vec::new())
    }
    async fn replay(&self, message_id: &str) -> Result<()> {
        Err(Error::NotFound(format!("dead letter {message_id}")))
    }
}

fn app(queue: Arc<MemoryJobQueue>) -> Router {
    router(AppState::new(queue, "memory"))
}

async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn post_without_action_queues_sync_all() {
    let queue = Arc::new(MemoryJobQueue::new());
    let (status, body) = send(app(queue.clone()), "POST", "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Sync All Queued");
    assert_eq!(queue.pending_jobs().await, vec![SyncJob::sync_all()]);
}

#[tokio::test]
async fn sync_account_carries_id_and_dates() {
    let queue = Arc::new(MemoryJobQueue::new());
    let (status, body) = send(
        app(queue.clone()),
        "POST",
        "/?action=sync_account&account_id=act_42&start_date=2024-01-01&end_date=2024-01-31",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Sync Account act_42 Queued");
    assert_eq!(
        queue.pending_jobs().await,
        vec![SyncJob::sync_account("act_42")
            .with_dates(Some("2024-01-01".into()), Some("2024-01-31".into()))]
    );
}

#[tokio::test]
async fn invalid_input_is_rejected_without_enqueueing() {
    let queue = Arc::new(MemoryJobQueue::new());
    for uri in [
        "/?action=refresh",
        "/?action=sync_account",
        "/?start_date=yesterday",
        "/?start_date=2024-02-01&end_date=2024-01-01",
    ] {
        let (status, _) = send(app(queue.clone()), "POST", uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
    }
    assert_eq!(queue.pending().await, 0);
}

#[tokio::test]
async fn other_methods_are_not_allowed() {
    let queue = Arc::new(MemoryJobQueue::new());
    for method in ["GET", "PUT", "DELETE"] {
        let (status, body) = send(app(queue.clone()), method, "/?action=sync_all").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body, "Method not allowed");
    }
    assert_eq!(queue.pending().await, 0);
}

#[tokio::test]
async fn enqueue_failure_is_a_500_with_the_error_text() {
    let app = router(AppState::new(Arc::new(UnreachableQueue), "memory"));
    let (status, body) = send(app, "POST", "/?action=sync_account&account_id=act_1").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        Error::Queue("connection refused".to_string()).to_string()
    );
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let queue = Arc::new(MemoryJobQueue::new());
    let response = app(queue)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn dead_letters_can_be_listed_and_replayed() {
    let queue = Arc::new(MemoryJobQueue::new());
    let id = queue.send(SyncJob::sync_account("act_1")).await.unwrap();
    let delivery: Delivery = queue.receive(1).await.unwrap().remove(0);
    queue
        .dead_letter(&delivery, "failed after 5 attempts: upstream error")
        .await
        .unwrap();

    let (status, body) = send(app(queue.clone()), "GET", "/dead-letters").await;
    assert_eq!(status, StatusCode::OK);
    let listed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(listed[0]["message"]["id"], id.as_str());

    let (status, _) = send(app(queue.clone()), "POST", &format!("/dead-letters/{id}/replay")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue.pending().await, 1);

    let (status, _) = send(app(queue.clone()), "POST", "/dead-letters/missing/replay").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

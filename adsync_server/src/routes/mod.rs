use axum::Router;
use axum::routing::{any, get, post};

pub mod dead_letters;
pub mod health;
pub mod trigger;

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> Router {
    Router::new()
        .route("/", any(trigger::trigger))
        .route("/health", get(health::get_health))
        .route("/dead-letters", get(dead_letters::list))
        .route("/dead-letters/{id}/replay", post(dead_letters::replay))
}

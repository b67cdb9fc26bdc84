use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::scheduler::Scheduler;

pub fn create_health_router(scheduler: Scheduler) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(scheduler)
}

/// Liveness plus a count of registered and enabled tasks.
pub async fn health(State(scheduler): State<Scheduler>) -> impl IntoResponse {
    let tasks = scheduler.list_tasks().await;
    let enabled = tasks.iter().filter(|t| t.enabled).count();

    (
        StatusCode::OK,
        [(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        Json(serde_json::json!({
            "status": "ok",
            "tasks": tasks.len(),
            "enabled_tasks": enabled,
        })),
    )
}

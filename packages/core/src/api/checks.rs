use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};

use crate::api::{api_error, store_error, ApiError};
use crate::jobs::JobRunner;
use crate::monitoring::{CheckResult, MonitorError};

pub fn create_checks_router(runner: Arc<JobRunner>) -> Router {
    Router::new()
        .route("/services/:id/check", post(check_now))
        .with_state(runner)
}

/// `POST /services/:id/check`: probe one service immediately and record the
/// outcome like a sweep would.
pub async fn check_now(
    State(runner): State<Arc<JobRunner>>,
    Path(id): Path<i64>,
) -> Result<Json<CheckResult>, ApiError> {
    runner.check_service(id).await.map(Json).map_err(|err| match err {
        MonitorError::Lister(store) => store_error(store),
        other => api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    })
}

//! HTTP surface: health, metrics, task control, heartbeat pings and
//! on-demand checks.

pub mod alerts;
pub mod checks;
pub mod health;
pub mod heartbeats;
pub mod metrics;
pub mod tasks;

use std::sync::Arc;

use axum::{http::StatusCode, Json, Router};
use serde_json::Value;
use tower_http::cors::CorsLayer;

use crate::alerts::AlertStore;
use crate::jobs::JobRunner;
use crate::metrics::AppMetrics;
use crate::scheduler::Scheduler;
use crate::store::StoreError;

/// Error shape shared by every handler.
pub type ApiError = (StatusCode, Json<Value>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

pub(crate) fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::NotFound { .. } => api_error(StatusCode::NOT_FOUND, err.to_string()),
        other => {
            tracing::error!("Store error in handler: {}", other);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

/// Everything the routers need.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
    pub runner: Arc<JobRunner>,
    pub alerts: Arc<dyn AlertStore>,
    pub metrics: Arc<AppMetrics>,
}

/// Assemble the full application router.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(health::create_health_router(state.scheduler.clone()))
        .merge(metrics::create_metrics_router(state.metrics))
        .merge(tasks::create_tasks_router(state.scheduler))
        .merge(heartbeats::create_heartbeats_router(state.runner.clone()))
        .merge(checks::create_checks_router(state.runner))
        .merge(alerts::create_alerts_router(state.alerts))
        .layer(CorsLayer::permissive())
}

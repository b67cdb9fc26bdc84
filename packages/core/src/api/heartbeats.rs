//! Heartbeat pings.
//!
//! Routes:
//! - `POST /heartbeats/:id/ping`
//! - `POST /heartbeats/token/:token/ping`
//! - `POST /heartbeats/:id/rotate-token`

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::api::{store_error, ApiError};
use crate::heartbeat::PingOutcome;
use crate::jobs::JobRunner;

#[derive(Debug, Serialize)]
pub struct RotateTokenResponse {
    pub id: i64,
    pub token: String,
}

pub fn create_heartbeats_router(runner: Arc<JobRunner>) -> Router {
    Router::new()
        .route("/heartbeats/:id/ping", post(ping))
        .route("/heartbeats/token/:token/ping", post(ping_by_token))
        .route("/heartbeats/:id/rotate-token", post(rotate_token))
        .with_state(runner)
}

pub async fn ping(
    State(runner): State<Arc<JobRunner>>,
    Path(id): Path<i64>,
) -> Result<Json<PingOutcome>, ApiError> {
    runner.heartbeats().ping(id).await.map(Json).map_err(store_error)
}

pub async fn ping_by_token(
    State(runner): State<Arc<JobRunner>>,
    Path(token): Path<String>,
) -> Result<Json<PingOutcome>, ApiError> {
    runner
        .heartbeats()
        .ping_by_token(&token)
        .await
        .map(Json)
        .map_err(store_error)
}

pub async fn rotate_token(
    State(runner): State<Arc<JobRunner>>,
    Path(id): Path<i64>,
) -> Result<Json<RotateTokenResponse>, ApiError> {
    let token = runner.heartbeats().rotate_token(id).await.map_err(store_error)?;
    Ok(Json(RotateTokenResponse { id, token }))
}

//! Read-only view of open alerts plus manual resolution.
//!
//! Routes:
//! - `GET  /alerts?service_id=`   unresolved alerts, optionally for one service
//! - `POST /alerts/:id/resolve`

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::alerts::{Alert, AlertStore};
use crate::api::{api_error, store_error, ApiError};

pub type AlertsState = Arc<dyn AlertStore>;

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    pub service_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AlertListResponse {
    pub items: Vec<Alert>,
    pub total: usize,
}

pub fn create_alerts_router(alerts: AlertsState) -> Router {
    Router::new()
        .route("/alerts", get(list_open_alerts))
        .route("/alerts/:id/resolve", post(resolve_alert))
        .with_state(alerts)
}

pub async fn list_open_alerts(
    State(alerts): State<AlertsState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<AlertListResponse>, ApiError> {
    let items = alerts
        .list_unresolved(query.service_id)
        .await
        .map_err(store_error)?;

    Ok(Json(AlertListResponse {
        total: items.len(),
        items,
    }))
}

pub async fn resolve_alert(
    State(alerts): State<AlertsState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let found = alerts
        .mark_resolved(id, Utc::now())
        .await
        .map_err(store_error)?;

    if !found {
        return Err(api_error(StatusCode::NOT_FOUND, "Alert not found"));
    }
    Ok(Json(serde_json::json!({ "id": id, "resolved": true })))
}

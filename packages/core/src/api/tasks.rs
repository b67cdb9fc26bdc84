//! Scheduler introspection and control.
//!
//! Routes:
//! - `GET  /tasks`               list every task
//! - `POST /tasks/:name/run`     run now, in the request
//! - `POST /tasks/:name/enable`
//! - `POST /tasks/:name/disable`

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;

use crate::api::{api_error, ApiError};
use crate::scheduler::{Scheduler, SchedulerError, TaskInfo};

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub items: Vec<TaskInfo>,
    pub total: usize,
}

pub fn create_tasks_router(scheduler: Scheduler) -> Router {
    Router::new()
        .route("/tasks", get(list_tasks))
        .route("/tasks/:name/run", post(run_task))
        .route("/tasks/:name/enable", post(enable_task))
        .route("/tasks/:name/disable", post(disable_task))
        .with_state(scheduler)
}

pub async fn list_tasks(State(scheduler): State<Scheduler>) -> Json<TaskListResponse> {
    let items = scheduler.list_tasks().await;
    Json(TaskListResponse {
        total: items.len(),
        items,
    })
}

/// Task failures are reported as `500 {"ok": false, "error": ...}`.
pub async fn run_task(
    State(scheduler): State<Scheduler>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match scheduler.run_task(&name).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "ok": true }))),
        Err(err @ SchedulerError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "ok": false, "error": err.to_string() })),
        ),
        Err(err) => {
            tracing::warn!("On-demand run of '{}' failed: {}", name, err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "ok": false, "error": err.to_string() })),
            )
        }
    }
}

pub async fn enable_task(
    State(scheduler): State<Scheduler>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    set_enabled(&scheduler, &name, true).await
}

pub async fn disable_task(
    State(scheduler): State<Scheduler>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    set_enabled(&scheduler, &name, false).await
}

async fn set_enabled(
    scheduler: &Scheduler,
    name: &str,
    enabled: bool,
) -> Result<Json<Value>, ApiError> {
    scheduler
        .set_enabled(name, enabled)
        .await
        .map_err(|err| match err {
            SchedulerError::NotFound(_) => api_error(StatusCode::NOT_FOUND, err.to_string()),
            other => api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        })?;

    Ok(Json(serde_json::json!({ "name": name, "enabled": enabled })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use crate::scheduler::TaskResult;

    async fn make_app() -> (Router, Scheduler) {
        let scheduler = Scheduler::new(CancellationToken::new());
        scheduler
            .register("ok_task", Duration::from_secs(3600), false, |_| async {
                TaskResult::Ok(())
            })
            .await
            .unwrap();
        scheduler
            .register("bad_task", Duration::from_secs(3600), false, |_| async {
                TaskResult::Err("disk full".into())
            })
            .await
            .unwrap();
        (create_tasks_router(scheduler.clone()), scheduler)
    }

    async fn post(app: Router, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn run_known_task_returns_ok() {
        let (app, scheduler) = make_app().await;
        let (status, body) = post(app, "/tasks/ok_task/run").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        let tasks = scheduler.list_tasks().await;
        assert!(tasks.iter().find(|t| t.name == "ok_task").unwrap().last_run_at.is_some());
    }

    #[tokio::test]
    async fn run_failing_task_returns_500_with_error() {
        let (app, _) = make_app().await;
        let (status, body) = post(app, "/tasks/bad_task/run").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["ok"], false);
        assert!(body["error"].as_str().unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn run_unknown_task_returns_404() {
        let (app, _) = make_app().await;
        let (status, body) = post(app, "/tasks/nope/run").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn enable_and_disable_toggle_state() {
        let (app, scheduler) = make_app().await;

        let (status, body) = post(app.clone(), "/tasks/ok_task/enable").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], true);
        assert!(scheduler.list_tasks().await.iter().any(|t| t.name == "ok_task" && t.enabled));

        let (status, _) = post(app.clone(), "/tasks/ok_task/disable").await;
        assert_eq!(status, StatusCode::OK);
        assert!(scheduler.list_tasks().await.iter().all(|t| !t.enabled));

        let (status, _) = post(app, "/tasks/ghost/enable").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        scheduler.shutdown();
    }
}

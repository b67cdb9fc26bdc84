//! Named periodic task scheduler.
//!
//! Each registered task owns an interval loop. Loops stop when the
//! process-wide shutdown token fires or when the task is disabled, whichever
//! comes first. A task can also be run on demand with [`Scheduler::run_task`]
//! regardless of its enabled state. A run that panics counts as a failed
//! run and leaves its loop running.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::metrics::AppMetrics;

pub type TaskError = Box<dyn std::error::Error + Send + Sync>;
pub type TaskResult = Result<(), TaskError>;

type TaskFuture = Pin<Box<dyn Future<Output = TaskResult> + Send>>;
type TaskFn = Arc<dyn Fn(CancellationToken) -> TaskFuture + Send + Sync>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task '{0}' is not registered")]
    NotFound(String),

    #[error("task '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("task '{0}' needs a non-zero interval")]
    InvalidInterval(String),

    #[error("task '{name}' failed: {source}")]
    Task {
        name: String,
        #[source]
        source: TaskError,
    },
}

/// Snapshot of one task, as returned by [`Scheduler::list_tasks`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskInfo {
    pub name: String,
    pub interval_seconds: u64,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
}

struct TaskRecord {
    interval: Duration,
    enabled: bool,
    last_run: Option<DateTime<Utc>>,
    stop: CancellationToken,
    runner: TaskFn,
}

struct Inner {
    shutdown: CancellationToken,
    tasks: RwLock<HashMap<String, TaskRecord>>,
    metrics: Option<Arc<AppMetrics>>,
}

/// Cheap-to-clone handle over the task registry.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self::build(shutdown, None)
    }

    pub fn with_metrics(shutdown: CancellationToken, metrics: Arc<AppMetrics>) -> Self {
        Self::build(shutdown, Some(metrics))
    }

    fn build(shutdown: CancellationToken, metrics: Option<Arc<AppMetrics>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                shutdown,
                tasks: RwLock::new(HashMap::new()),
                metrics,
            }),
        }
    }

    /// Register a task. When `enabled` is set its loop starts right away and
    /// the first run happens immediately.
    pub async fn register<F, Fut>(
        &self,
        name: impl Into<String>,
        every: Duration,
        enabled: bool,
        task: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let name = name.into();
        if every.is_zero() {
            return Err(SchedulerError::InvalidInterval(name));
        }

        let runner: TaskFn = Arc::new(move |token| -> TaskFuture { Box::pin(task(token)) });

        let mut tasks = self.inner.tasks.write().await;
        if tasks.contains_key(&name) {
            return Err(SchedulerError::AlreadyRegistered(name));
        }

        let stop = self.inner.shutdown.child_token();
        if enabled {
            self.spawn_loop(name.clone(), every, stop.clone(), runner.clone());
        }
        tasks.insert(
            name.clone(),
            TaskRecord {
                interval: every,
                enabled,
                last_run: None,
                stop,
                runner,
            },
        );

        tracing::info!(
            "Registered task '{}' (interval: {}s, enabled: {})",
            name,
            every.as_secs(),
            enabled
        );
        Ok(())
    }

    /// Enable or disable a task. Returns once the state is recorded; a run
    /// already in flight is not waited for.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), SchedulerError> {
        let mut tasks = self.inner.tasks.write().await;
        let record = tasks
            .get_mut(name)
            .ok_or_else(|| SchedulerError::NotFound(name.to_string()))?;

        if record.enabled == enabled {
            return Ok(());
        }

        if enabled {
            record.stop = self.inner.shutdown.child_token();
            self.spawn_loop(
                name.to_string(),
                record.interval,
                record.stop.clone(),
                record.runner.clone(),
            );
        } else {
            record.stop.cancel();
        }
        record.enabled = enabled;

        tracing::info!("Task '{}' {}", name, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Run a task now, in the caller's context.
    ///
    /// `last_run_at` is only updated when the run succeeds.
    pub async fn run_task(&self, name: &str) -> Result<(), SchedulerError> {
        let runner = {
            let tasks = self.inner.tasks.read().await;
            tasks
                .get(name)
                .map(|record| record.runner.clone())
                .ok_or_else(|| SchedulerError::NotFound(name.to_string()))?
        };

        tracing::info!("Running task '{}' on demand", name);
        let result = run_guarded(name, runner, self.inner.shutdown.child_token()).await;
        record_outcome(&self.inner, name, &result).await;
        result.map_err(|source| SchedulerError::Task {
            name: name.to_string(),
            source,
        })
    }

    /// Snapshot of every registered task, sorted by name.
    pub async fn list_tasks(&self) -> Vec<TaskInfo> {
        let tasks = self.inner.tasks.read().await;
        let mut infos: Vec<TaskInfo> = tasks
            .iter()
            .map(|(name, record)| TaskInfo {
                name: name.clone(),
                interval_seconds: record.interval.as_secs(),
                enabled: record.enabled,
                last_run_at: record.last_run,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Stop every loop.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    fn spawn_loop(&self, name: String, every: Duration, stop: CancellationToken, runner: TaskFn) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = stop.cancelled() => break,

                    _ = ticker.tick() => {
                        let result = run_guarded(&name, runner.clone(), stop.clone()).await;
                        record_outcome(&inner, &name, &result).await;
                        if let Err(err) = result {
                            tracing::error!("Task '{}' failed: {}", name, err);
                        }
                    }
                }
            }

            tracing::debug!("Task '{}' loop stopped", name);
        });
    }
}

/// Run one invocation on its own tokio task so a panic surfaces as an error.
async fn run_guarded(name: &str, runner: TaskFn, token: CancellationToken) -> TaskResult {
    match tokio::spawn(async move { runner(token).await }).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => {
            tracing::error!("Task '{}' panicked", name);
            Err("task panicked".into())
        }
        Err(err) => Err(err.into()),
    }
}

async fn record_outcome(inner: &Inner, name: &str, result: &TaskResult) {
    if let Some(metrics) = &inner.metrics {
        metrics.record_task_run(name, result.is_ok());
    }

    if result.is_ok() {
        if let Some(record) = inner.tasks.write().await.get_mut(name) {
            record.last_run = Some(Utc::now());
        }
    }
}

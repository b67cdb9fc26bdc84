use thiserror::Error;

use crate::monitoring::MonitorError;
use crate::scheduler::SchedulerError;

/// Unified application error for the binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Client error: {0}")]
    Client(#[from] MonitorError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

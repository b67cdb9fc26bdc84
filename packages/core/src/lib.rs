// Library root: exposes the monitoring core for the binary and for
// integration tests in `tests/`.

pub mod alerts;
pub mod api;
pub mod db;
pub mod heartbeat;
pub mod jobs;
pub mod metrics;
pub mod monitoring;
pub mod repository;
pub mod scheduler;
pub mod store;

// Binary plumbing.
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;

//! HTTP availability checker.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;

use crate::monitoring::error::MonitorError;
use crate::monitoring::types::{CheckResult, Checker, ServiceProbe};

/// Default request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Issues one GET per check; 2xx is up, anything else is down.
///
/// Redirects are followed by the client, so the status that counts is the
/// final one.
#[derive(Clone)]
pub struct HttpChecker {
    http: Client,
}

impl HttpChecker {
    pub fn new(timeout: Duration) -> Result<Self, MonitorError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("service-monitor/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http })
    }
}

#[async_trait]
impl Checker for HttpChecker {
    async fn check(&self, probe: &ServiceProbe) -> CheckResult {
        let started = Instant::now();

        match self.http.get(&probe.address).send().await {
            Ok(response) => {
                let status = response.status();
                let latency = started.elapsed();
                tracing::debug!(
                    "Service {} answered HTTP {} in {}ms",
                    probe.id,
                    status.as_u16(),
                    latency.as_millis()
                );

                CheckResult {
                    service_id: probe.id,
                    ok: status.is_success(),
                    status_code: Some(status.as_u16()),
                    latency,
                    error: None,
                    checked_at: Utc::now(),
                }
            }
            Err(err) => {
                let latency = started.elapsed();
                tracing::debug!("Service {} unreachable: {}", probe.id, err);
                CheckResult::failed(probe.id, latency, err.to_string())
            }
        }
    }
}

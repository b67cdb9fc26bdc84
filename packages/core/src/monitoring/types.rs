//! Probe inputs, check outcomes and the two seams a sweep is built on.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::store::StoreError;

/// One service to probe during a sweep.
///
/// Built fresh from the lister on every sweep and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceProbe {
    pub id: i64,
    /// URL (or bare host) the checkers talk to.
    pub address: String,
    /// Free-form service kind tag, e.g. "website" or "api".
    pub kind: String,
    pub tls_expiry: Option<DateTime<Utc>>,
    pub domain_expiry: Option<DateTime<Utc>>,
}

impl ServiceProbe {
    pub fn new(id: i64, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            kind: "website".to_string(),
            tls_expiry: None,
            domain_expiry: None,
        }
    }

    /// Host name extracted from `address`, used for TLS and WHOIS lookups.
    pub fn host(&self) -> Option<String> {
        let candidate = if self.address.contains("://") {
            self.address.clone()
        } else {
            format!("https://{}", self.address)
        };

        reqwest::Url::parse(&candidate)
            .ok()?
            .host_str()
            // IPv6 literals come back bracketed.
            .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
            .filter(|h| !h.is_empty())
            .map(str::to_string)
    }
}

/// Outcome of checking one service once.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub service_id: i64,
    pub ok: bool,
    /// Only set by HTTP checks that received a response.
    pub status_code: Option<u16>,
    #[serde(rename = "latency_ms", serialize_with = "as_millis")]
    pub latency: Duration,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl CheckResult {
    pub fn failed(service_id: i64, latency: Duration, error: impl Into<String>) -> Self {
        Self {
            service_id,
            ok: false,
            status_code: None,
            latency,
            error: Some(error.into()),
            checked_at: Utc::now(),
        }
    }

    /// Human-readable reason for a non-OK result.
    pub fn failure_reason(&self) -> String {
        match (&self.error, self.status_code) {
            (Some(err), _) => err.clone(),
            (None, Some(code)) => format!("HTTP {}", code),
            (None, None) => "check failed".to_string(),
        }
    }
}

fn as_millis<S: Serializer>(latency: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(latency.as_millis() as u64)
}

/// Supplies the services a sweep should probe.
#[async_trait]
pub trait ServiceLister: Send + Sync {
    async fn list_active_services(&self) -> Result<Vec<ServiceProbe>, StoreError>;

    /// Look up one active service by id.
    async fn find_service(&self, id: i64) -> Result<Option<ServiceProbe>, StoreError> {
        Ok(self
            .list_active_services()
            .await?
            .into_iter()
            .find(|probe| probe.id == id))
    }
}

/// Probes a single service.
///
/// Implementations never fail: transport problems become a non-OK result.
#[async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, probe: &ServiceProbe) -> CheckResult;
}

/// Lister over a fixed set of probes. Used for "check this service now".
#[derive(Debug, Clone, Default)]
pub struct StaticLister {
    probes: Vec<ServiceProbe>,
}

impl StaticLister {
    pub fn new(probes: Vec<ServiceProbe>) -> Self {
        Self { probes }
    }
}

#[async_trait]
impl ServiceLister for StaticLister {
    async fn list_active_services(&self) -> Result<Vec<ServiceProbe>, StoreError> {
        Ok(self.probes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_is_taken_from_full_url() {
        let probe = ServiceProbe::new(1, "https://shop.example.com/health?x=1");
        assert_eq!(probe.host().as_deref(), Some("shop.example.com"));
    }

    #[test]
    fn host_accepts_bare_domain() {
        let probe = ServiceProbe::new(1, "example.org");
        assert_eq!(probe.host().as_deref(), Some("example.org"));
    }

    #[test]
    fn ipv6_host_has_no_brackets() {
        let probe = ServiceProbe::new(1, "https://[::1]:8443/status");
        assert_eq!(probe.host().as_deref(), Some("::1"));
        assert!(probe.host().unwrap().parse::<std::net::IpAddr>().is_ok());
    }

    #[test]
    fn host_is_none_for_garbage() {
        let probe = ServiceProbe::new(1, "http://");
        assert!(probe.host().is_none());
    }

    #[test]
    fn failure_reason_prefers_error_text() {
        let mut result = CheckResult::failed(3, Duration::from_millis(5), "connection refused");
        assert_eq!(result.failure_reason(), "connection refused");

        result.error = None;
        result.status_code = Some(503);
        assert_eq!(result.failure_reason(), "HTTP 503");
    }

    #[test]
    fn latency_serializes_as_milliseconds() {
        let result = CheckResult::failed(3, Duration::from_millis(1250), "boom");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["latency_ms"], 1250);
        assert_eq!(json["service_id"], 3);
    }
}

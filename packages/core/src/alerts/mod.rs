//! Alerts raised by the monitoring tasks, and the dedup rule around them.
//!
//! At most one unresolved alert may exist per `(service, alert type)`.
//! [`raise_once`] enforces this with a check followed by a create. The pair
//! is not atomic: two callers racing on the same key can both pass the
//! check. The periodic tasks that raise each alert type run on disjoint
//! schedules, so in practice a single writer exists per type. Anything that
//! needs a hard guarantee must move this into the store (a unique partial
//! index on unresolved rows, or an upsert).

pub mod memory;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::CheckResult;
use crate::store::StoreError;

pub use memory::MemoryAlertStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Uptime,
    SslExpiry,
    DomainExpiry,
    HeartbeatMissed,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uptime => "uptime",
            Self::SslExpiry => "ssl_expiry",
            Self::DomainExpiry => "domain_expiry",
            Self::HeartbeatMissed => "heartbeat_missed",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uptime" => Ok(Self::Uptime),
            "ssl_expiry" => Ok(Self::SslExpiry),
            "domain_expiry" => Ok(Self::DomainExpiry),
            "heartbeat_missed" => Ok(Self::HeartbeatMissed),
            other => Err(StoreError::Backend(format!("unknown alert type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(StoreError::Backend(format!("unknown severity '{}'", other))),
        }
    }
}

/// A persisted alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub service_id: i64,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Alert about to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub service_id: i64,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
}

impl NewAlert {
    /// Critical "service down" alert for a failed check.
    pub fn uptime(result: &CheckResult) -> Self {
        Self {
            service_id: result.service_id,
            alert_type: AlertType::Uptime,
            severity: Severity::Critical,
            title: "Service down".to_string(),
            message: result.failure_reason(),
        }
    }

    pub fn ssl_expiry(service_id: i64, expires_at: DateTime<Utc>) -> Self {
        Self {
            service_id,
            alert_type: AlertType::SslExpiry,
            severity: Severity::Warning,
            title: "SSL Certificate Expiring Soon".to_string(),
            message: format!("SSL expires on {}", expires_at.format("%Y-%m-%d")),
        }
    }

    pub fn domain_expiry(service_id: i64, expires_at: DateTime<Utc>) -> Self {
        Self {
            service_id,
            alert_type: AlertType::DomainExpiry,
            severity: Severity::Warning,
            title: "Domain Expiring Soon".to_string(),
            message: format!("Domain expires on {}", expires_at.format("%Y-%m-%d")),
        }
    }

    pub fn heartbeat_missed(service_id: i64, job_name: &str) -> Self {
        Self {
            service_id,
            alert_type: AlertType::HeartbeatMissed,
            severity: Severity::Warning,
            title: "Heartbeat Missed".to_string(),
            message: format!("Job '{}' has not reported in time", job_name),
        }
    }
}

/// Alert persistence as seen by the monitoring core.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn create_alert(&self, alert: NewAlert) -> Result<Alert, StoreError>;

    /// Whether an unresolved alert of `alert_type` exists for `service_id`.
    async fn has_unresolved(&self, service_id: i64, alert_type: AlertType)
        -> Result<bool, StoreError>;

    /// Resolve a single alert. Returns `false` if the id is unknown.
    async fn mark_resolved(&self, alert_id: i64, resolved_at: DateTime<Utc>)
        -> Result<bool, StoreError>;

    /// Resolve every unresolved alert of `alert_type` for `service_id`.
    /// Returns how many were resolved.
    async fn resolve_unresolved(
        &self,
        service_id: i64,
        alert_type: AlertType,
        resolved_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn list_unresolved(&self, service_id: Option<i64>) -> Result<Vec<Alert>, StoreError>;
}

/// Create `alert` unless an unresolved one with the same key already exists.
///
/// Returns the created alert, or `None` when creation was skipped.
pub async fn raise_once(
    store: &dyn AlertStore,
    alert: NewAlert,
) -> Result<Option<Alert>, StoreError> {
    if store.has_unresolved(alert.service_id, alert.alert_type).await? {
        tracing::debug!(
            "Unresolved {} alert already open for service {}",
            alert.alert_type,
            alert.service_id
        );
        return Ok(None);
    }

    let created = store.create_alert(alert).await?;
    tracing::info!(
        "Raised {} alert #{} for service {}: {}",
        created.alert_type,
        created.id,
        created.service_id,
        created.title
    );
    Ok(Some(created))
}

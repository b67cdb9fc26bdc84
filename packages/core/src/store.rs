//! Storage seams shared by the monitoring tasks, plus an in-memory backend.
//!
//! The SQLite implementation lives in [`crate::repository`]. [`MemoryStore`]
//! holds services and a bounded window of uptime logs per service; older log
//! entries are evicted first (ring-buffer semantics backed by `VecDeque`).

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::monitoring::{CheckResult, ServiceLister, ServiceProbe};

/// Default number of uptime log entries retained per service in memory.
pub const DEFAULT_LOG_CAPACITY: usize = 1_000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}

/// One persisted check outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UptimeLog {
    pub id: Option<i64>,
    pub service_id: i64,
    /// "up" or "down".
    pub status: String,
    pub response_time_ms: i64,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl UptimeLog {
    pub fn from_result(result: &CheckResult) -> Self {
        Self {
            id: None,
            service_id: result.service_id,
            status: if result.ok { "up" } else { "down" }.to_string(),
            response_time_ms: result.latency.as_millis() as i64,
            status_code: result.status_code,
            error_message: if result.ok {
                None
            } else {
                Some(result.failure_reason())
            },
            checked_at: result.checked_at,
        }
    }
}

#[async_trait]
pub trait UptimeLogStore: Send + Sync {
    async fn save_result(&self, result: &CheckResult) -> Result<(), StoreError>;

    /// Most recent logs for a service, newest first.
    async fn recent_logs(&self, service_id: i64, limit: usize)
        -> Result<Vec<UptimeLog>, StoreError>;
}

/// Writes refreshed expiry dates back onto services.
///
/// Both methods return `false` when the service does not exist.
#[async_trait]
pub trait ExpiryStore: Send + Sync {
    async fn update_tls_expiry(&self, service_id: i64, at: DateTime<Utc>)
        -> Result<bool, StoreError>;

    async fn update_domain_expiry(
        &self,
        service_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone)]
struct ServiceEntry {
    probe: ServiceProbe,
    active: bool,
}

/// Services and uptime logs held in process memory.
#[derive(Debug)]
pub struct MemoryStore {
    services: RwLock<Vec<ServiceEntry>>,
    logs: RwLock<HashMap<i64, VecDeque<UptimeLog>>>,
    log_capacity: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl MemoryStore {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            services: RwLock::new(Vec::new()),
            logs: RwLock::new(HashMap::new()),
            log_capacity: log_capacity.max(1),
        }
    }

    /// Insert or replace a service.
    pub async fn upsert_service(&self, probe: ServiceProbe, active: bool) {
        let mut services = self.services.write().await;
        match services.iter_mut().find(|e| e.probe.id == probe.id) {
            Some(entry) => *entry = ServiceEntry { probe, active },
            None => services.push(ServiceEntry { probe, active }),
        }
    }

    pub async fn service(&self, id: i64) -> Option<ServiceProbe> {
        self.services
            .read()
            .await
            .iter()
            .find(|e| e.probe.id == id)
            .map(|e| e.probe.clone())
    }
}

#[async_trait]
impl ServiceLister for MemoryStore {
    async fn list_active_services(&self) -> Result<Vec<ServiceProbe>, StoreError> {
        Ok(self
            .services
            .read()
            .await
            .iter()
            .filter(|e| e.active)
            .map(|e| e.probe.clone())
            .collect())
    }
}

#[async_trait]
impl UptimeLogStore for MemoryStore {
    async fn save_result(&self, result: &CheckResult) -> Result<(), StoreError> {
        let mut logs = self.logs.write().await;
        let entries = logs.entry(result.service_id).or_default();
        if entries.len() >= self.log_capacity {
            entries.pop_front();
        }
        let mut log = UptimeLog::from_result(result);
        log.id = Some(entries.back().and_then(|l| l.id).unwrap_or(0) + 1);
        entries.push_back(log);
        Ok(())
    }

    async fn recent_logs(
        &self,
        service_id: i64,
        limit: usize,
    ) -> Result<Vec<UptimeLog>, StoreError> {
        Ok(self
            .logs
            .read()
            .await
            .get(&service_id)
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ExpiryStore for MemoryStore {
    async fn update_tls_expiry(
        &self,
        service_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut services = self.services.write().await;
        Ok(match services.iter_mut().find(|e| e.probe.id == service_id) {
            Some(entry) => {
                entry.probe.tls_expiry = Some(at);
                true
            }
            None => false,
        })
    }

    async fn update_domain_expiry(
        &self,
        service_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut services = self.services.write().await;
        Ok(match services.iter_mut().find(|e| e.probe.id == service_id) {
            Some(entry) => {
                entry.probe.domain_expiry = Some(at);
                true
            }
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ok_result(service_id: i64) -> CheckResult {
        CheckResult {
            service_id,
            ok: true,
            status_code: Some(200),
            latency: Duration::from_millis(42),
            error: None,
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn uptime_log_from_passing_result() {
        let log = UptimeLog::from_result(&ok_result(3));
        assert_eq!(log.status, "up");
        assert_eq!(log.response_time_ms, 42);
        assert_eq!(log.status_code, Some(200));
        assert!(log.error_message.is_none());
    }

    #[test]
    fn uptime_log_from_failing_result() {
        let result = CheckResult::failed(3, Duration::from_millis(5), "connection refused");
        let log = UptimeLog::from_result(&result);
        assert_eq!(log.status, "down");
        assert_eq!(log.error_message.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn lists_only_active_services() {
        let store = MemoryStore::default();
        store.upsert_service(ServiceProbe::new(1, "https://a.test"), true).await;
        store.upsert_service(ServiceProbe::new(2, "https://b.test"), false).await;

        let active = store.list_active_services().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, 1);
        assert!(store.find_service(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn logs_are_bounded_and_newest_first() {
        let store = MemoryStore::new(3);
        for _ in 0..5 {
            store.save_result(&ok_result(1)).await.unwrap();
        }

        let logs = store.recent_logs(1, 10).await.unwrap();
        assert_eq!(logs.len(), 3);
        let ids: Vec<_> = logs.iter().filter_map(|l| l.id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn recent_logs_for_unknown_service_is_empty() {
        let store = MemoryStore::default();
        assert!(store.recent_logs(77, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expiry_updates_hit_existing_services_only() {
        let store = MemoryStore::default();
        store.upsert_service(ServiceProbe::new(1, "https://a.test"), true).await;
        let at = Utc::now();

        assert!(store.update_tls_expiry(1, at).await.unwrap());
        assert!(store.update_domain_expiry(1, at).await.unwrap());
        assert!(!store.update_tls_expiry(9, at).await.unwrap());

        let probe = store.service(1).await.unwrap();
        assert_eq!(probe.tls_expiry, Some(at));
        assert_eq!(probe.domain_expiry, Some(at));
    }
}

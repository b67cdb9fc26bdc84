//! In-process alert store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::alerts::{Alert, AlertStore, AlertType, NewAlert};
use crate::store::StoreError;

/// Alert store kept in memory, ids assigned from 1.
#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    alerts: RwLock<Vec<Alert>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every alert ever created, oldest first.
    pub async fn all(&self) -> Vec<Alert> {
        self.alerts.read().await.clone()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn create_alert(&self, alert: NewAlert) -> Result<Alert, StoreError> {
        let mut alerts = self.alerts.write().await;
        let created = Alert {
            id: alerts.len() as i64 + 1,
            service_id: alert.service_id,
            alert_type: alert.alert_type,
            severity: alert.severity,
            title: alert.title,
            message: alert.message,
            resolved: false,
            created_at: Utc::now(),
            resolved_at: None,
        };
        alerts.push(created.clone());
        Ok(created)
    }

    async fn has_unresolved(
        &self,
        service_id: i64,
        alert_type: AlertType,
    ) -> Result<bool, StoreError> {
        Ok(self
            .alerts
            .read()
            .await
            .iter()
            .any(|a| !a.resolved && a.service_id == service_id && a.alert_type == alert_type))
    }

    async fn mark_resolved(
        &self,
        alert_id: i64,
        resolved_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut alerts = self.alerts.write().await;
        match alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.resolved = true;
                alert.resolved_at = Some(resolved_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn resolve_unresolved(
        &self,
        service_id: i64,
        alert_type: AlertType,
        resolved_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut alerts = self.alerts.write().await;
        let mut resolved = 0;
        for alert in alerts
            .iter_mut()
            .filter(|a| !a.resolved && a.service_id == service_id && a.alert_type == alert_type)
        {
            alert.resolved = true;
            alert.resolved_at = Some(resolved_at);
            resolved += 1;
        }
        Ok(resolved)
    }

    async fn list_unresolved(&self, service_id: Option<i64>) -> Result<Vec<Alert>, StoreError> {
        Ok(self
            .alerts
            .read()
            .await
            .iter()
            .filter(|a| !a.resolved && service_id.map_or(true, |id| a.service_id == id))
            .cloned()
            .collect())
    }
}

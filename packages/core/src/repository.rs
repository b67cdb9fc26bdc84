//! SQLite-backed implementation of every store the monitoring core uses.
//!
//! Timestamps are stored as RFC 3339 strings. Rows that fail to decode are
//! skipped rather than failing the whole read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::alerts::{Alert, AlertStore, AlertType, NewAlert};
use crate::heartbeat::{generate_token, HeartbeatJob, HeartbeatStore, DEFAULT_GRACE_SECONDS};
use crate::monitoring::{CheckResult, ServiceLister, ServiceProbe};
use crate::store::{ExpiryStore, StoreError, UptimeLog, UptimeLogStore};

/// Fields needed to create a service row.
#[derive(Debug, Clone, Default)]
pub struct NewService {
    pub name: String,
    pub url: Option<String>,
    pub domain: Option<String>,
    pub service_type: Option<String>,
}

#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a service. Returns the new row id.
    pub async fn insert_service(&self, service: &NewService) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO services (name, url, domain, service_type) VALUES (?, ?, ?, ?)",
        )
        .bind(&service.name)
        .bind(&service.url)
        .bind(&service.domain)
        .bind(service.service_type.as_deref().unwrap_or("website"))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Set a service's status; only "active" services are monitored.
    pub async fn set_service_status(&self, id: i64, status: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE services SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Register a heartbeat job with a fresh token.
    pub async fn insert_heartbeat_job(
        &self,
        service_id: i64,
        name: &str,
        expected_interval_seconds: i64,
        grace_seconds: Option<i64>,
    ) -> Result<HeartbeatJob, StoreError> {
        let token = generate_token();
        let grace = grace_seconds.unwrap_or(DEFAULT_GRACE_SECONDS);

        let result = sqlx::query(
            "INSERT INTO heartbeat_jobs
             (service_id, name, expected_interval_seconds, grace_seconds, token)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(service_id)
        .bind(name)
        .bind(expected_interval_seconds)
        .bind(grace)
        .bind(&token)
        .execute(&self.pool)
        .await?;

        Ok(HeartbeatJob {
            id: result.last_insert_rowid(),
            service_id,
            name: name.to_string(),
            expected_interval_seconds,
            grace_seconds: grace,
            token,
            last_heartbeat_at: None,
            paused: false,
        })
    }

    pub async fn set_job_paused(&self, id: i64, paused: bool) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE heartbeat_jobs SET is_paused = ? WHERE id = ?")
            .bind(paused as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn probe_from_row(row: &SqliteRow) -> Option<ServiceProbe> {
    let id: i64 = row.try_get("id").ok()?;
    let url: Option<String> = row.try_get("url").ok()?;
    let domain: Option<String> = row.try_get("domain").ok()?;
    let kind: String = row.try_get("service_type").ok()?;

    let address = match (url.filter(|u| !u.trim().is_empty()), domain) {
        (Some(url), _) => url,
        (None, Some(domain)) if !domain.trim().is_empty() => format!("https://{}", domain.trim()),
        _ => return None,
    };

    Some(ServiceProbe {
        id,
        address,
        kind,
        tls_expiry: parse_timestamp(row.try_get("ssl_expiry").ok()?),
        domain_expiry: parse_timestamp(row.try_get("domain_expiry").ok()?),
    })
}

fn alert_from_row(row: &SqliteRow) -> Option<Alert> {
    let alert_type: String = row.try_get("alert_type").ok()?;
    let level: String = row.try_get("level").ok()?;
    let resolved: i64 = row.try_get("resolved").ok()?;
    let created_at: String = row.try_get("created_at").ok()?;

    Some(Alert {
        id: row.try_get("id").ok()?,
        service_id: row.try_get("service_id").ok()?,
        alert_type: alert_type.parse().ok()?,
        severity: level.parse().ok()?,
        title: row.try_get("title").ok()?,
        message: row.try_get("message").ok()?,
        resolved: resolved != 0,
        created_at: parse_timestamp(Some(created_at))?,
        resolved_at: parse_timestamp(row.try_get("resolved_at").ok()?),
    })
}

fn job_from_row(row: &SqliteRow) -> Option<HeartbeatJob> {
    let paused: i64 = row.try_get("is_paused").ok()?;

    Some(HeartbeatJob {
        id: row.try_get("id").ok()?,
        service_id: row.try_get("service_id").ok()?,
        name: row.try_get("name").ok()?,
        expected_interval_seconds: row.try_get("expected_interval_seconds").ok()?,
        grace_seconds: row.try_get("grace_seconds").ok()?,
        token: row.try_get("token").ok()?,
        last_heartbeat_at: parse_timestamp(row.try_get("last_heartbeat_at").ok()?),
        paused: paused != 0,
    })
}

const JOB_COLUMNS: &str = "id, service_id, name, expected_interval_seconds, grace_seconds, \
                           token, last_heartbeat_at, is_paused";

#[async_trait]
impl ServiceLister for SqliteRepository {
    async fn list_active_services(&self) -> Result<Vec<ServiceProbe>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, url, domain, service_type, ssl_expiry, domain_expiry
             FROM services
             WHERE status = 'active'
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(probe_from_row).collect())
    }

    async fn find_service(&self, id: i64) -> Result<Option<ServiceProbe>, StoreError> {
        let row = sqlx::query(
            "SELECT id, url, domain, service_type, ssl_expiry, domain_expiry
             FROM services
             WHERE id = ? AND status = 'active'",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(probe_from_row))
    }
}

#[async_trait]
impl ExpiryStore for SqliteRepository {
    async fn update_tls_expiry(
        &self,
        service_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE services SET ssl_expiry = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(service_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_domain_expiry(
        &self,
        service_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE services SET domain_expiry = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(service_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl UptimeLogStore for SqliteRepository {
    async fn save_result(&self, result: &CheckResult) -> Result<(), StoreError> {
        let log = UptimeLog::from_result(result);

        sqlx::query(
            "INSERT INTO uptime_logs
             (service_id, status, response_time_ms, status_code, error_message, checked_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(log.service_id)
        .bind(&log.status)
        .bind(log.response_time_ms)
        .bind(log.status_code.map(i64::from))
        .bind(&log.error_message)
        .bind(log.checked_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_logs(
        &self,
        service_id: i64,
        limit: usize,
    ) -> Result<Vec<UptimeLog>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, service_id, status, response_time_ms, status_code, error_message, checked_at
             FROM uptime_logs
             WHERE service_id = ?
             ORDER BY id DESC
             LIMIT ?",
        )
        .bind(service_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let logs = rows
            .into_iter()
            .filter_map(|row| {
                let status_code: Option<i64> = row.try_get("status_code").ok()?;
                let checked_at: String = row.try_get("checked_at").ok()?;

                Some(UptimeLog {
                    id: row.try_get("id").ok()?,
                    service_id: row.try_get("service_id").ok()?,
                    status: row.try_get("status").ok()?,
                    response_time_ms: row.try_get("response_time_ms").ok()?,
                    status_code: status_code.and_then(|c| u16::try_from(c).ok()),
                    error_message: row.try_get("error_message").ok()?,
                    checked_at: parse_timestamp(Some(checked_at))?,
                })
            })
            .collect();

        Ok(logs)
    }
}

#[async_trait]
impl AlertStore for SqliteRepository {
    async fn create_alert(&self, alert: NewAlert) -> Result<Alert, StoreError> {
        let created_at = Utc::now();

        let result = sqlx::query(
            "INSERT INTO alerts (service_id, alert_type, level, title, message, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(alert.service_id)
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Alert {
            id: result.last_insert_rowid(),
            service_id: alert.service_id,
            alert_type: alert.alert_type,
            severity: alert.severity,
            title: alert.title,
            message: alert.message,
            resolved: false,
            created_at,
            resolved_at: None,
        })
    }

    async fn has_unresolved(
        &self,
        service_id: i64,
        alert_type: AlertType,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM alerts
             WHERE service_id = ? AND alert_type = ? AND resolved = 0",
        )
        .bind(service_id)
        .bind(alert_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.try_get("cnt")?;
        Ok(count > 0)
    }

    async fn mark_resolved(
        &self,
        alert_id: i64,
        resolved_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE alerts SET resolved = 1, resolved_at = ? WHERE id = ?")
            .bind(resolved_at.to_rfc3339())
            .bind(alert_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn resolve_unresolved(
        &self,
        service_id: i64,
        alert_type: AlertType,
        resolved_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE alerts SET resolved = 1, resolved_at = ?
             WHERE service_id = ? AND alert_type = ? AND resolved = 0",
        )
        .bind(resolved_at.to_rfc3339())
        .bind(service_id)
        .bind(alert_type.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_unresolved(&self, service_id: Option<i64>) -> Result<Vec<Alert>, StoreError> {
        let rows = match service_id {
            Some(id) => {
                sqlx::query(
                    "SELECT * FROM alerts WHERE resolved = 0 AND service_id = ? ORDER BY id ASC",
                )
                .bind(id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM alerts WHERE resolved = 0 ORDER BY id ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows.iter().filter_map(alert_from_row).collect())
    }
}

#[async_trait]
impl HeartbeatStore for SqliteRepository {
    async fn list_jobs(&self) -> Result<Vec<HeartbeatJob>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM heartbeat_jobs ORDER BY id ASC",
            JOB_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(job_from_row).collect())
    }

    async fn find_job(&self, id: i64) -> Result<Option<HeartbeatJob>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM heartbeat_jobs WHERE id = ?", JOB_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().and_then(job_from_row))
    }

    async fn find_job_by_token(&self, token: &str) -> Result<Option<HeartbeatJob>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM heartbeat_jobs WHERE token = ?",
            JOB_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(job_from_row))
    }

    async fn record_heartbeat(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE heartbeat_jobs SET last_heartbeat_at = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("heartbeat job", id));
        }
        Ok(())
    }

    async fn set_token(&self, id: i64, token: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE heartbeat_jobs SET token = ? WHERE id = ?")
            .bind(token)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("heartbeat job", id));
        }
        Ok(())
    }
}

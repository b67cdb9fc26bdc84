//! Heartbeat deadlines.
//!
//! A heartbeat job is an external process that pings us on a schedule. It is
//! overdue once `last_heartbeat + expected_interval + grace` has passed. Jobs
//! that never pinged are not evaluated.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::alerts::{raise_once, AlertStore, AlertType, NewAlert};
use crate::store::StoreError;

pub const DEFAULT_GRACE_SECONDS: i64 = 60;
pub const TOKEN_LENGTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatJob {
    pub id: i64,
    pub service_id: i64,
    pub name: String,
    pub expected_interval_seconds: i64,
    pub grace_seconds: i64,
    pub token: String,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub paused: bool,
}

impl HeartbeatJob {
    pub fn new(id: i64, service_id: i64, name: impl Into<String>, interval_seconds: i64) -> Self {
        Self {
            id,
            service_id,
            name: name.into(),
            expected_interval_seconds: interval_seconds,
            grace_seconds: DEFAULT_GRACE_SECONDS,
            token: generate_token(),
            last_heartbeat_at: None,
            paused: false,
        }
    }

    /// `None` until the first heartbeat arrives.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let last = self.last_heartbeat_at?;
        last.checked_add_signed(Duration::seconds(self.expected_interval_seconds))?
            .checked_add_signed(Duration::seconds(self.grace_seconds))
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.paused && self.deadline().map_or(false, |deadline| now > deadline)
    }
}

pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

#[async_trait]
pub trait HeartbeatStore: Send + Sync {
    async fn list_jobs(&self) -> Result<Vec<HeartbeatJob>, StoreError>;

    async fn find_job(&self, id: i64) -> Result<Option<HeartbeatJob>, StoreError>;

    async fn find_job_by_token(&self, token: &str) -> Result<Option<HeartbeatJob>, StoreError>;

    async fn record_heartbeat(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn set_token(&self, id: i64, token: &str) -> Result<(), StoreError>;
}

/// Result of a successful ping.
#[derive(Debug, Clone, Serialize)]
pub struct PingOutcome {
    pub job_id: i64,
    pub service_id: i64,
    pub pinged_at: DateTime<Utc>,
    pub resolved_alerts: u64,
}

/// Evaluates deadlines and handles pings.
#[derive(Clone)]
pub struct HeartbeatMonitor {
    jobs: Arc<dyn HeartbeatStore>,
    alerts: Arc<dyn AlertStore>,
}

impl HeartbeatMonitor {
    pub fn new(jobs: Arc<dyn HeartbeatStore>, alerts: Arc<dyn AlertStore>) -> Self {
        Self { jobs, alerts }
    }

    /// Raise a `heartbeat_missed` alert for every overdue job.
    ///
    /// Returns how many alerts were created. A failure on one job is logged
    /// and the scan moves on; only listing the jobs can fail the call.
    pub async fn check_missed(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let jobs = self.jobs.list_jobs().await?;
        let mut raised = 0;

        for job in jobs.iter().filter(|job| job.is_overdue(now)) {
            tracing::debug!("Heartbeat job '{}' is overdue", job.name);
            match raise_once(
                self.alerts.as_ref(),
                NewAlert::heartbeat_missed(job.service_id, &job.name),
            )
            .await
            {
                Ok(Some(_)) => raised += 1,
                Ok(None) => {}
                Err(err) => {
                    tracing::error!("Failed to raise heartbeat alert for '{}': {}", job.name, err)
                }
            }
        }

        Ok(raised)
    }

    pub async fn ping(&self, id: i64) -> Result<PingOutcome, StoreError> {
        let job = self
            .jobs
            .find_job(id)
            .await?
            .ok_or_else(|| StoreError::not_found("heartbeat job", id))?;
        self.accept(job).await
    }

    pub async fn ping_by_token(&self, token: &str) -> Result<PingOutcome, StoreError> {
        let job = self
            .jobs
            .find_job_by_token(token)
            .await?
            .ok_or_else(|| StoreError::not_found("heartbeat token", "<redacted>"))?;
        self.accept(job).await
    }

    /// Replace the job's token and return the new one.
    pub async fn rotate_token(&self, id: i64) -> Result<String, StoreError> {
        if self.jobs.find_job(id).await?.is_none() {
            return Err(StoreError::not_found("heartbeat job", id));
        }
        let token = generate_token();
        self.jobs.set_token(id, &token).await?;
        tracing::info!("Rotated token for heartbeat job {}", id);
        Ok(token)
    }

    async fn accept(&self, job: HeartbeatJob) -> Result<PingOutcome, StoreError> {
        let now = Utc::now();
        self.jobs.record_heartbeat(job.id, now).await?;
        let resolved = self
            .alerts
            .resolve_unresolved(job.service_id, AlertType::HeartbeatMissed, now)
            .await?;

        if resolved > 0 {
            tracing::info!("Heartbeat from '{}' resolved {} alert(s)", job.name, resolved);
        }

        Ok(PingOutcome {
            job_id: job.id,
            service_id: job.service_id,
            pinged_at: now,
            resolved_alerts: resolved,
        })
    }
}

/// Heartbeat jobs held in process memory.
#[derive(Debug, Default)]
pub struct MemoryHeartbeatStore {
    jobs: RwLock<Vec<HeartbeatJob>>,
}

impl MemoryHeartbeatStore {
    pub fn new(jobs: Vec<HeartbeatJob>) -> Self {
        Self {
            jobs: RwLock::new(jobs),
        }
    }
}

#[async_trait]
impl HeartbeatStore for MemoryHeartbeatStore {
    async fn list_jobs(&self) -> Result<Vec<HeartbeatJob>, StoreError> {
        Ok(self.jobs.read().await.clone())
    }

    async fn find_job(&self, id: i64) -> Result<Option<HeartbeatJob>, StoreError> {
        Ok(self.jobs.read().await.iter().find(|j| j.id == id).cloned())
    }

    async fn find_job_by_token(&self, token: &str) -> Result<Option<HeartbeatJob>, StoreError> {
        Ok(self.jobs.read().await.iter().find(|j| j.token == token).cloned())
    }

    async fn record_heartbeat(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| StoreError::not_found("heartbeat job", id))?;
        job.last_heartbeat_at = Some(at);
        Ok(())
    }

    async fn set_token(&self, id: i64, token: &str) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| StoreError::not_found("heartbeat job", id))?;
        job.token = token.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::MemoryAlertStore;
    use proptest::prelude::*;

    fn job_last_seen(id: i64, service_id: i64, ago_seconds: i64) -> HeartbeatJob {
        let mut job = HeartbeatJob::new(id, service_id, format!("job-{}", id), 300);
        job.last_heartbeat_at = Some(Utc::now() - Duration::seconds(ago_seconds));
        job
    }

    type Harness = (HeartbeatMonitor, Arc<MemoryHeartbeatStore>, Arc<MemoryAlertStore>);

    fn harness(jobs: Vec<HeartbeatJob>) -> Harness {
        let store = Arc::new(MemoryHeartbeatStore::new(jobs));
        let alerts = Arc::new(MemoryAlertStore::new());
        (HeartbeatMonitor::new(store.clone(), alerts.clone()), store, alerts)
    }

    #[test]
    fn never_pinged_job_has_no_deadline() {
        let job = HeartbeatJob::new(1, 1, "nightly", 60);
        assert!(job.deadline().is_none());
        assert!(!job.is_overdue(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn exactly_at_deadline_is_not_overdue() {
        let mut job = HeartbeatJob::new(1, 1, "nightly", 60);
        let last = Utc::now();
        job.last_heartbeat_at = Some(last);
        let deadline = last + Duration::seconds(120);

        assert_eq!(job.deadline(), Some(deadline));
        assert!(!job.is_overdue(deadline));
        assert!(job.is_overdue(deadline + Duration::seconds(1)));
    }

    #[test]
    fn paused_job_is_never_overdue() {
        let mut job = job_last_seen(1, 1, 10_000);
        job.paused = true;
        assert!(!job.is_overdue(Utc::now()));
    }

    #[test]
    fn tokens_are_alphanumeric_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn check_missed_twice_leaves_one_unresolved_alert() {
        let (monitor, _, alerts) = harness(vec![job_last_seen(1, 10, 1_000)]);

        assert_eq!(monitor.check_missed(Utc::now()).await.unwrap(), 1);
        assert_eq!(monitor.check_missed(Utc::now()).await.unwrap(), 0);

        let open = alerts.list_unresolved(Some(10)).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].alert_type, AlertType::HeartbeatMissed);
        assert_eq!(open[0].message, "Job 'job-1' has not reported in time");
    }

    #[tokio::test]
    async fn check_missed_skips_fresh_and_unpinged_jobs() {
        let (monitor, _, alerts) = harness(vec![
            job_last_seen(1, 10, 30),
            HeartbeatJob::new(2, 20, "new", 60),
        ]);

        assert_eq!(monitor.check_missed(Utc::now()).await.unwrap(), 0);
        assert!(alerts.all().await.is_empty());
    }

    #[tokio::test]
    async fn ping_resolves_missed_alerts_and_records_time() {
        let (monitor, store, alerts) = harness(vec![job_last_seen(1, 10, 1_000)]);
        monitor.check_missed(Utc::now()).await.unwrap();
        alerts
            .create_alert(NewAlert::heartbeat_missed(10, "job-1"))
            .await
            .unwrap();

        let outcome = monitor.ping(1).await.unwrap();

        assert_eq!(outcome.resolved_alerts, 2);
        assert!(alerts.list_unresolved(Some(10)).await.unwrap().is_empty());
        let job = store.find_job(1).await.unwrap().unwrap();
        assert_eq!(job.last_heartbeat_at, Some(outcome.pinged_at));
        assert!(!job.is_overdue(Utc::now()));
    }

    #[tokio::test]
    async fn ping_is_idempotent() {
        let (monitor, _, _) = harness(vec![job_last_seen(1, 10, 5)]);
        assert_eq!(monitor.ping(1).await.unwrap().resolved_alerts, 0);
        assert_eq!(monitor.ping(1).await.unwrap().resolved_alerts, 0);
    }

    #[tokio::test]
    async fn ping_by_token_and_rotation() {
        let job = job_last_seen(1, 10, 5);
        let old_token = job.token.clone();
        let (monitor, _, _) = harness(vec![job]);

        assert_eq!(monitor.ping_by_token(&old_token).await.unwrap().job_id, 1);

        let new_token = monitor.rotate_token(1).await.unwrap();
        assert_ne!(new_token, old_token);
        assert!(matches!(
            monitor.ping_by_token(&old_token).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(monitor.ping_by_token(&new_token).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (monitor, _, _) = harness(vec![]);
        assert!(matches!(monitor.ping(5).await, Err(StoreError::NotFound { .. })));
        assert!(matches!(monitor.rotate_token(5).await, Err(StoreError::NotFound { .. })));
    }

    proptest! {
        #[test]
        fn overdue_iff_past_interval_plus_grace(
            interval in 1i64..100_000,
            grace in 0i64..10_000,
            elapsed in 0i64..200_000,
        ) {
            let last = Utc::now();
            let mut job = HeartbeatJob::new(1, 1, "p", interval);
            job.grace_seconds = grace;
            job.last_heartbeat_at = Some(last);

            let now = last + Duration::seconds(elapsed);
            prop_assert_eq!(job.is_overdue(now), elapsed > interval + grace);
        }
    }
}

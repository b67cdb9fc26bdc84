//! Periodic monitoring jobs and their registration with the scheduler.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::alerts::{raise_once, AlertStore, AlertType, NewAlert};
use crate::heartbeat::{HeartbeatMonitor, HeartbeatStore};
use crate::metrics::AppMetrics;
use crate::monitoring::tls_expiry::DEFAULT_TLS_TIMEOUT;
use crate::monitoring::whois::DEFAULT_WHOIS_TIMEOUT;
use crate::monitoring::{
    fetch_tls_expiry, CheckResult, Checker, ExpiryError, MonitorError, ServiceLister,
    ServiceProbe, StaticLister, SweepEngine, WhoisClient,
};
use crate::scheduler::{Scheduler, SchedulerError, TaskResult};
use crate::store::{ExpiryStore, StoreError, UptimeLogStore};

pub const MONITORING_SWEEP: &str = "monitoring_sweep";
pub const REFRESH_EXPIRIES: &str = "refresh_expiries";
pub const EXPIRY_WARNINGS: &str = "expiry_warnings";
pub const HEARTBEAT_CHECK: &str = "heartbeat_check";

pub const DEFAULT_WARNING_DAYS: i64 = 30;

/// Where refreshed expiry dates come from.
#[async_trait]
pub trait ExpiryLookup: Send + Sync {
    async fn tls_expiry(&self, host: &str) -> Result<Option<DateTime<Utc>>, ExpiryError>;

    async fn domain_expiry(&self, domain: &str) -> Result<DateTime<Utc>, ExpiryError>;
}

/// Live TLS handshakes and WHOIS queries.
#[derive(Debug, Clone)]
pub struct NetworkExpiryLookup {
    whois: WhoisClient,
    tls_timeout: Duration,
}

impl NetworkExpiryLookup {
    pub fn new(tls_timeout: Duration, whois: WhoisClient) -> Self {
        Self { whois, tls_timeout }
    }
}

impl Default for NetworkExpiryLookup {
    fn default() -> Self {
        Self::new(DEFAULT_TLS_TIMEOUT, WhoisClient::new(DEFAULT_WHOIS_TIMEOUT))
    }
}

#[async_trait]
impl ExpiryLookup for NetworkExpiryLookup {
    async fn tls_expiry(&self, host: &str) -> Result<Option<DateTime<Utc>>, ExpiryError> {
        fetch_tls_expiry(host, self.tls_timeout).await
    }

    async fn domain_expiry(&self, domain: &str) -> Result<DateTime<Utc>, ExpiryError> {
        self.whois.fetch_expiry(domain).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepSummary {
    pub checked: usize,
    pub failed: usize,
    pub alerts_raised: usize,
    pub alerts_resolved: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshSummary {
    pub tls_updated: usize,
    pub domain_updated: usize,
    pub failures: usize,
}

/// Storage handles the jobs read from and write to.
#[derive(Clone)]
pub struct JobStores {
    pub services: Arc<dyn ServiceLister>,
    pub alerts: Arc<dyn AlertStore>,
    pub uptime: Arc<dyn UptimeLogStore>,
    pub expiries: Arc<dyn ExpiryStore>,
    pub heartbeats: Arc<dyn HeartbeatStore>,
}

/// Runs the monitoring jobs against a set of stores.
pub struct JobRunner {
    services: Arc<dyn ServiceLister>,
    alerts: Arc<dyn AlertStore>,
    uptime: Arc<dyn UptimeLogStore>,
    expiries: Arc<dyn ExpiryStore>,
    heartbeats: HeartbeatMonitor,
    checker: Arc<dyn Checker>,
    lookup: Arc<dyn ExpiryLookup>,
    engine: SweepEngine,
    warning_days: i64,
    metrics: Option<Arc<AppMetrics>>,
}

impl JobRunner {
    pub fn new(stores: JobStores, checker: Arc<dyn Checker>) -> Self {
        Self {
            heartbeats: HeartbeatMonitor::new(stores.heartbeats, stores.alerts.clone()),
            services: stores.services,
            alerts: stores.alerts,
            uptime: stores.uptime,
            expiries: stores.expiries,
            checker,
            lookup: Arc::new(NetworkExpiryLookup::default()),
            engine: SweepEngine::new(),
            warning_days: DEFAULT_WARNING_DAYS,
            metrics: None,
        }
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn ExpiryLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn with_engine(mut self, engine: SweepEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_warning_days(mut self, days: i64) -> Self {
        self.warning_days = days;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<AppMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn heartbeats(&self) -> &HeartbeatMonitor {
        &self.heartbeats
    }

    /// Check every active service, persist the outcomes and raise or clear
    /// uptime alerts.
    pub async fn run_monitoring(&self) -> Result<SweepSummary, MonitorError> {
        let started = Instant::now();
        let results = match self
            .engine
            .run_once(self.services.as_ref(), self.checker.clone())
            .await
        {
            Ok(results) => results,
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.sweep_errors_total.inc();
                }
                return Err(err);
            }
        };

        let summary = self.process_results(&results).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_sweep(&results, started.elapsed().as_secs_f64());
        }

        tracing::info!(
            "Monitoring sweep done: {} checked, {} failed, {} alert(s) raised",
            summary.checked,
            summary.failed,
            summary.alerts_raised
        );
        Ok(summary)
    }

    /// Check one service right away.
    pub async fn check_service(&self, service_id: i64) -> Result<CheckResult, MonitorError> {
        let probe = self
            .services
            .find_service(service_id)
            .await?
            .ok_or_else(|| StoreError::not_found("service", service_id))?;

        let lister = StaticLister::new(vec![probe]);
        let results = self.engine.run_once(&lister, self.checker.clone()).await?;
        self.process_results(&results).await;

        results
            .into_iter()
            .next()
            .ok_or_else(|| MonitorError::from(StoreError::not_found("service", service_id)))
    }

    async fn process_results(&self, results: &[CheckResult]) -> SweepSummary {
        let mut summary = SweepSummary {
            checked: results.len(),
            ..SweepSummary::default()
        };
        let now = Utc::now();

        for result in results {
            if let Err(err) = self.uptime.save_result(result).await {
                tracing::error!("Failed to store uptime log for service {}: {}", result.service_id, err);
            }

            if result.ok {
                match self
                    .alerts
                    .resolve_unresolved(result.service_id, AlertType::Uptime, now)
                    .await
                {
                    Ok(resolved) => summary.alerts_resolved += resolved,
                    Err(err) => tracing::error!(
                        "Failed to resolve uptime alerts for service {}: {}",
                        result.service_id,
                        err
                    ),
                }
                continue;
            }

            summary.failed += 1;
            tracing::warn!(
                "Service {} check failed: {}",
                result.service_id,
                result.failure_reason()
            );
            if self.raise(NewAlert::uptime(result)).await {
                summary.alerts_raised += 1;
            }
        }

        summary
    }

    /// Re-read certificate and registration expiry for every active service.
    ///
    /// A failed lookup or write keeps the previously stored value. Remaining
    /// services are skipped once `cancel` fires.
    pub async fn refresh_expiries(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RefreshSummary, StoreError> {
        let services = self.services.list_active_services().await?;
        let mut summary = RefreshSummary::default();

        for probe in &services {
            if cancel.is_cancelled() {
                tracing::info!("Expiry refresh cancelled before service {}", probe.id);
                break;
            }
            let Some(host) = probe.host() else {
                tracing::warn!("Service {} has no usable host: {}", probe.id, probe.address);
                continue;
            };

            if uses_tls(probe) {
                match self.lookup.tls_expiry(&host).await {
                    Ok(Some(expiry)) => match self.expiries.update_tls_expiry(probe.id, expiry).await {
                        Ok(true) => summary.tls_updated += 1,
                        Ok(false) => {}
                        Err(err) => {
                            summary.failures += 1;
                            tracing::error!("Failed to store TLS expiry for service {}: {}", probe.id, err);
                        }
                    },
                    Ok(None) => tracing::debug!("No certificate presented by {}", host),
                    Err(err) => {
                        summary.failures += 1;
                        tracing::warn!("TLS expiry lookup failed for {}: {}", host, err);
                    }
                }
            }

            if host.parse::<IpAddr>().is_ok() {
                continue;
            }
            let domain = host.strip_prefix("www.").unwrap_or(&host);
            match self.lookup.domain_expiry(domain).await {
                Ok(expiry) => match self.expiries.update_domain_expiry(probe.id, expiry).await {
                    Ok(true) => summary.domain_updated += 1,
                    Ok(false) => {}
                    Err(err) => {
                        summary.failures += 1;
                        tracing::error!(
                            "Failed to store domain expiry for service {}: {}",
                            probe.id,
                            err
                        );
                    }
                },
                Err(err) => {
                    summary.failures += 1;
                    tracing::warn!("Domain expiry lookup failed for {}: {}", domain, err);
                }
            }
        }

        tracing::info!(
            "Expiry refresh done: {} TLS, {} domain updated, {} failure(s)",
            summary.tls_updated,
            summary.domain_updated,
            summary.failures
        );
        Ok(summary)
    }

    /// Raise expiry alerts for services whose certificate or domain expires
    /// within the warning window. Already expired dates count as well.
    pub async fn expiry_warnings(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = chrono::Duration::try_days(self.warning_days)
            .and_then(|window| now.checked_add_signed(window))
            .ok_or_else(|| {
                StoreError::Backend(format!(
                    "expiry warning window of {} days is out of range",
                    self.warning_days
                ))
            })?;
        let services = self.services.list_active_services().await?;
        let mut raised = 0;

        for probe in &services {
            if let Some(expiry) = probe.tls_expiry.filter(|at| *at <= cutoff) {
                if self.raise(NewAlert::ssl_expiry(probe.id, expiry)).await {
                    raised += 1;
                }
            }
            if let Some(expiry) = probe.domain_expiry.filter(|at| *at <= cutoff) {
                if self.raise(NewAlert::domain_expiry(probe.id, expiry)).await {
                    raised += 1;
                }
            }
        }

        Ok(raised)
    }

    pub async fn check_heartbeats(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let raised = self.heartbeats.check_missed(now).await?;
        if raised > 0 {
            tracing::warn!("{} heartbeat job(s) missed their deadline", raised);
            if let Some(metrics) = &self.metrics {
                metrics
                    .alerts_raised_total
                    .with_label_values(&[AlertType::HeartbeatMissed.as_str()])
                    .inc_by(raised as f64);
            }
        }
        Ok(raised)
    }

    /// Dedup-raise an alert, logging store failures. Returns whether one was created.
    async fn raise(&self, alert: NewAlert) -> bool {
        let alert_type = alert.alert_type;
        let service_id = alert.service_id;
        match raise_once(self.alerts.as_ref(), alert).await {
            Ok(Some(_)) => {
                if let Some(metrics) = &self.metrics {
                    metrics
                        .alerts_raised_total
                        .with_label_values(&[alert_type.as_str()])
                        .inc();
                }
                true
            }
            Ok(None) => false,
            Err(err) => {
                tracing::error!(
                    "Failed to raise {} alert for service {}: {}",
                    alert_type,
                    service_id,
                    err
                );
                false
            }
        }
    }
}

fn uses_tls(probe: &ServiceProbe) -> bool {
    !probe.address.to_lowercase().starts_with("http://")
}

/// Intervals for the built-in tasks.
#[derive(Debug, Clone)]
pub struct TaskIntervals {
    pub monitoring_sweep: Duration,
    pub refresh_expiries: Duration,
    pub expiry_warnings: Duration,
    pub heartbeat_check: Duration,
}

impl Default for TaskIntervals {
    fn default() -> Self {
        Self {
            monitoring_sweep: Duration::from_secs(30),
            refresh_expiries: Duration::from_secs(24 * 60 * 60),
            expiry_warnings: Duration::from_secs(60 * 60),
            heartbeat_check: Duration::from_secs(2 * 60),
        }
    }
}

/// A sweep interrupted by `cancel` stores none of its results.
async fn monitoring_task(runner: Arc<JobRunner>, cancel: CancellationToken) -> TaskResult {
    tokio::select! {
        biased;

        _ = cancel.cancelled() => Err(MonitorError::Cancelled.into()),
        outcome = runner.run_monitoring() => {
            outcome?;
            Ok(())
        }
    }
}

async fn refresh_task(runner: Arc<JobRunner>, cancel: CancellationToken) -> TaskResult {
    runner.refresh_expiries(&cancel).await?;
    Ok(())
}

async fn warnings_task(runner: Arc<JobRunner>) -> TaskResult {
    runner.expiry_warnings(Utc::now()).await?;
    Ok(())
}

async fn heartbeat_task(runner: Arc<JobRunner>) -> TaskResult {
    runner.check_heartbeats(Utc::now()).await?;
    Ok(())
}

/// Register the built-in monitoring tasks. With `enabled` unset they only
/// run on demand.
pub async fn register_default_tasks(
    scheduler: &Scheduler,
    runner: Arc<JobRunner>,
    intervals: &TaskIntervals,
    enabled: bool,
) -> Result<(), SchedulerError> {
    let r = runner.clone();
    scheduler
        .register(MONITORING_SWEEP, intervals.monitoring_sweep, enabled, move |cancel| {
            monitoring_task(r.clone(), cancel)
        })
        .await?;

    let r = runner.clone();
    scheduler
        .register(REFRESH_EXPIRIES, intervals.refresh_expiries, enabled, move |cancel| {
            refresh_task(r.clone(), cancel)
        })
        .await?;

    let r = runner.clone();
    scheduler
        .register(EXPIRY_WARNINGS, intervals.expiry_warnings, enabled, move |_| {
            warnings_task(r.clone())
        })
        .await?;

    scheduler
        .register(HEARTBEAT_CHECK, intervals.heartbeat_check, enabled, move |_| {
            heartbeat_task(runner.clone())
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    use crate::alerts::MemoryAlertStore;
    use crate::heartbeat::{HeartbeatJob, MemoryHeartbeatStore};
    use crate::store::MemoryStore;

    /// Fails the services in `down`, passes everything else.
    struct FakeChecker {
        down: std::sync::Mutex<HashSet<i64>>,
    }

    impl FakeChecker {
        fn new(down: &[i64]) -> Self {
            Self {
                down: std::sync::Mutex::new(down.iter().copied().collect()),
            }
        }

        fn set_down(&self, down: &[i64]) {
            *self.down.lock().unwrap() = down.iter().copied().collect();
        }
    }

    #[async_trait]
    impl Checker for FakeChecker {
        async fn check(&self, probe: &ServiceProbe) -> CheckResult {
            if self.down.lock().unwrap().contains(&probe.id) {
                CheckResult::failed(probe.id, Duration::from_millis(7), "connection refused")
            } else {
                CheckResult {
                    service_id: probe.id,
                    ok: true,
                    status_code: Some(200),
                    latency: Duration::from_millis(7),
                    error: None,
                    checked_at: Utc::now(),
                }
            }
        }
    }

    #[derive(Default)]
    struct FakeLookup {
        tls: HashMap<String, DateTime<Utc>>,
        domains: HashMap<String, DateTime<Utc>>,
    }

    #[async_trait]
    impl ExpiryLookup for FakeLookup {
        async fn tls_expiry(&self, host: &str) -> Result<Option<DateTime<Utc>>, ExpiryError> {
            self.tls.get(host).copied().map(Some).ok_or_else(|| ExpiryError::Tls {
                message: "handshake failure".to_string(),
            })
        }

        async fn domain_expiry(&self, domain: &str) -> Result<DateTime<Utc>, ExpiryError> {
            self.domains.get(domain).copied().ok_or(ExpiryError::NotFound)
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        alerts: Arc<MemoryAlertStore>,
        checker: Arc<FakeChecker>,
        runner: JobRunner,
    }

    async fn fixture(addresses: &[&str], down: &[i64], jobs: Vec<HeartbeatJob>) -> Fixture {
        let store = Arc::new(MemoryStore::default());
        for (i, address) in addresses.iter().enumerate() {
            store
                .upsert_service(ServiceProbe::new(i as i64 + 1, *address), true)
                .await;
        }
        let alerts = Arc::new(MemoryAlertStore::new());
        let checker = Arc::new(FakeChecker::new(down));
        let stores = JobStores {
            services: store.clone(),
            alerts: alerts.clone(),
            uptime: store.clone(),
            expiries: store.clone(),
            heartbeats: Arc::new(MemoryHeartbeatStore::new(jobs)),
        };
        let runner = JobRunner::new(stores, checker.clone());
        Fixture {
            store,
            alerts,
            checker,
            runner,
        }
    }

    fn days_from_now(days: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::days(days)
    }

    #[tokio::test]
    async fn sweep_logs_results_and_raises_one_alert_per_down_service() {
        let f = fixture(&["https://a.test", "https://b.test", "https://c.test"], &[2], vec![]).await;

        let first = f.runner.run_monitoring().await.unwrap();
        let second = f.runner.run_monitoring().await.unwrap();

        assert_eq!(first.checked, 3);
        assert_eq!(first.failed, 1);
        assert_eq!(first.alerts_raised, 1);
        assert_eq!(second.alerts_raised, 0);

        let open = f.alerts.list_unresolved(None).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].service_id, 2);
        assert_eq!(open[0].title, "Service down");

        let logs = f.store.recent_logs(2, 10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.status == "down"));
    }

    #[tokio::test]
    async fn passing_check_resolves_uptime_alert() {
        let f = fixture(&["https://a.test"], &[1], vec![]).await;
        f.runner.run_monitoring().await.unwrap();

        f.checker.set_down(&[]);
        let summary = f.runner.run_monitoring().await.unwrap();

        assert_eq!(summary.alerts_resolved, 1);
        assert!(f.alerts.list_unresolved(Some(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn check_service_runs_a_single_probe() {
        let f = fixture(&["https://a.test", "https://b.test"], &[2], vec![]).await;

        let result = f.runner.check_service(2).await.unwrap();

        assert!(!result.ok);
        assert_eq!(result.service_id, 2);
        assert!(f.store.recent_logs(1, 10).await.unwrap().is_empty());
        assert_eq!(f.alerts.list_unresolved(Some(2)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn check_service_unknown_id_is_not_found() {
        let f = fixture(&["https://a.test"], &[], vec![]).await;

        let err = f.runner.check_service(42).await.unwrap_err();

        assert!(matches!(err, MonitorError::Lister(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn refresh_updates_successes_and_keeps_old_values_on_failure() {
        let f = fixture(
            &["https://www.good.test", "https://bad.test", "http://plain.test"],
            &[],
            vec![],
        )
        .await;
        let previous = days_from_now(5);
        f.store.update_tls_expiry(2, previous).await.unwrap();
        f.store.update_domain_expiry(2, previous).await.unwrap();

        let tls_at = days_from_now(80);
        let domain_at = days_from_now(300);
        let lookup = FakeLookup {
            tls: HashMap::from([("www.good.test".to_string(), tls_at)]),
            domains: HashMap::from([
                ("good.test".to_string(), domain_at),
                ("plain.test".to_string(), domain_at),
            ]),
        };
        let Fixture { store, runner, .. } = f;
        let runner = runner.with_lookup(Arc::new(lookup));

        let summary = runner.refresh_expiries(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.tls_updated, 1);
        assert_eq!(summary.domain_updated, 2);
        assert_eq!(summary.failures, 2);

        let good = store.service(1).await.unwrap();
        assert_eq!(good.tls_expiry, Some(tls_at));
        assert_eq!(good.domain_expiry, Some(domain_at));

        let bad = store.service(2).await.unwrap();
        assert_eq!(bad.tls_expiry, Some(previous));
        assert_eq!(bad.domain_expiry, Some(previous));

        let plain = store.service(3).await.unwrap();
        assert_eq!(plain.tls_expiry, None);
    }

    struct ReadOnlyExpiries;

    #[async_trait]
    impl ExpiryStore for ReadOnlyExpiries {
        async fn update_tls_expiry(&self, _: i64, _: DateTime<Utc>) -> Result<bool, StoreError> {
            Err(StoreError::Backend("database is read-only".to_string()))
        }

        async fn update_domain_expiry(&self, _: i64, _: DateTime<Utc>) -> Result<bool, StoreError> {
            Err(StoreError::Backend("database is read-only".to_string()))
        }
    }

    #[tokio::test]
    async fn refresh_counts_write_errors_and_continues() {
        let store = Arc::new(MemoryStore::default());
        store.upsert_service(ServiceProbe::new(1, "https://one.test"), true).await;
        store.upsert_service(ServiceProbe::new(2, "https://two.test"), true).await;
        let at = days_from_now(60);
        let lookup = FakeLookup {
            tls: HashMap::from([("one.test".to_string(), at), ("two.test".to_string(), at)]),
            domains: HashMap::from([("one.test".to_string(), at), ("two.test".to_string(), at)]),
        };
        let stores = JobStores {
            services: store.clone(),
            alerts: Arc::new(MemoryAlertStore::new()),
            uptime: store.clone(),
            expiries: Arc::new(ReadOnlyExpiries),
            heartbeats: Arc::new(MemoryHeartbeatStore::new(vec![])),
        };
        let runner = JobRunner::new(stores, Arc::new(FakeChecker::new(&[])))
            .with_lookup(Arc::new(lookup));

        let summary = runner.refresh_expiries(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.failures, 4);
        assert_eq!(summary.tls_updated, 0);
        assert_eq!(summary.domain_updated, 0);
    }

    #[tokio::test]
    async fn refresh_skips_whois_for_ipv6_literal() {
        let at = days_from_now(45);
        let f = fixture(&["https://[::1]:8443/health"], &[], vec![]).await;
        let lookup = FakeLookup {
            tls: HashMap::from([("::1".to_string(), at)]),
            domains: HashMap::new(),
        };
        let Fixture { store, runner, .. } = f;
        let runner = runner.with_lookup(Arc::new(lookup));

        let summary = runner.refresh_expiries(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.tls_updated, 1);
        assert_eq!(summary.domain_updated, 0);
        assert_eq!(summary.failures, 0);
        assert_eq!(store.service(1).await.unwrap().tls_expiry, Some(at));
    }

    #[tokio::test]
    async fn cancelled_refresh_leaves_services_untouched() {
        let at = days_from_now(45);
        let f = fixture(&["https://a.test"], &[], vec![]).await;
        let lookup = FakeLookup {
            tls: HashMap::from([("a.test".to_string(), at)]),
            domains: HashMap::from([("a.test".to_string(), at)]),
        };
        let Fixture { store, runner, .. } = f;
        let runner = runner.with_lookup(Arc::new(lookup));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = runner.refresh_expiries(&cancel).await.unwrap();

        assert_eq!(summary, RefreshSummary::default());
        let service = store.service(1).await.unwrap();
        assert!(service.tls_expiry.is_none());
        assert!(service.domain_expiry.is_none());
    }

    #[tokio::test]
    async fn cancelled_sweep_task_stores_nothing() {
        let f = fixture(&["https://a.test"], &[1], vec![]).await;
        let Fixture { store, alerts, runner, .. } = f;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = monitoring_task(Arc::new(runner), cancel).await.unwrap_err();

        assert_eq!(err.to_string(), "monitoring cancelled");
        assert!(store.recent_logs(1, 10).await.unwrap().is_empty());
        assert!(alerts.list_unresolved(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_warning_window_fails_without_panicking() {
        let f = fixture(&["https://a.test"], &[], vec![]).await;
        let runner = Arc::new(
            f.runner
                .with_lookup(Arc::new(FakeLookup::default()))
                .with_warning_days(100_000_000),
        );

        let err = runner.expiry_warnings(Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));

        let scheduler = Scheduler::new(CancellationToken::new());
        register_default_tasks(&scheduler, runner, &TaskIntervals::default(), false)
            .await
            .unwrap();
        let err = scheduler.run_task(EXPIRY_WARNINGS).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Task { .. }));
    }

    #[tokio::test]
    async fn expiry_warnings_respect_window_and_dedup() {
        let f = fixture(&["https://soon.test", "https://later.test"], &[], vec![]).await;
        f.store.update_tls_expiry(1, days_from_now(10)).await.unwrap();
        f.store.update_domain_expiry(1, days_from_now(-1)).await.unwrap();
        f.store.update_tls_expiry(2, days_from_now(90)).await.unwrap();

        assert_eq!(f.runner.expiry_warnings(Utc::now()).await.unwrap(), 2);
        assert_eq!(f.runner.expiry_warnings(Utc::now()).await.unwrap(), 0);

        let open = f.alerts.list_unresolved(None).await.unwrap();
        assert!(open.iter().all(|a| a.service_id == 1));
        assert!(open.iter().any(|a| a.alert_type == AlertType::SslExpiry));
        assert!(open.iter().any(|a| a.alert_type == AlertType::DomainExpiry));
    }

    #[tokio::test]
    async fn heartbeat_check_raises_for_overdue_jobs() {
        let mut job = HeartbeatJob::new(1, 1, "backup", 60);
        job.last_heartbeat_at = Some(Utc::now() - chrono::Duration::hours(1));
        let f = fixture(&["https://a.test"], &[], vec![job]).await;

        assert_eq!(f.runner.check_heartbeats(Utc::now()).await.unwrap(), 1);
        assert_eq!(f.runner.check_heartbeats(Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn default_tasks_are_registered_and_runnable() {
        let f = fixture(&["https://a.test"], &[], vec![]).await;
        let scheduler = Scheduler::new(CancellationToken::new());
        let runner = Arc::new(f.runner.with_lookup(Arc::new(FakeLookup::default())));
        let intervals = TaskIntervals {
            monitoring_sweep: Duration::from_secs(3600),
            ..TaskIntervals::default()
        };

        register_default_tasks(&scheduler, runner, &intervals, true).await.unwrap();
        scheduler.run_task(EXPIRY_WARNINGS).await.unwrap();

        let tasks = scheduler.list_tasks().await;
        let names: Vec<_> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![EXPIRY_WARNINGS, HEARTBEAT_CHECK, MONITORING_SWEEP, REFRESH_EXPIRIES]
        );
        assert!(tasks.iter().all(|t| t.enabled));
        scheduler.shutdown();
    }
}

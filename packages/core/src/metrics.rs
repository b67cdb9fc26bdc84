//! Prometheus metrics registry for the service monitor.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and hand it to
//! the scheduler and the job runner.
//!
//! Exposed at `GET /metrics` in Prometheus text exposition format
//! (`text/plain; version=0.0.4`).

use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};

use crate::monitoring::CheckResult;

pub struct AppMetrics {
    /// Completed monitoring sweeps.
    pub sweeps_total: Counter,
    /// Sweeps aborted before any check ran (lister failures).
    pub sweep_errors_total: Counter,
    pub checks_total: Counter,
    pub check_failures_total: Counter,
    /// Services probed by the most recent sweep.
    pub services_monitored: Gauge,
    /// Alerts created, labelled by alert type.
    pub alerts_raised_total: CounterVec,
    /// Scheduler task runs, labelled by task name and outcome.
    pub task_runs_total: CounterVec,
    pub sweep_duration: Histogram,
    pub registry: Registry,
}

impl AppMetrics {
    /// Create and register all metrics. Returns an error if any metric
    /// name is invalid or duplicated.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let sweeps_total = Counter::with_opts(Opts::new(
            "service_monitor_sweeps_total",
            "Completed monitoring sweeps",
        ))?;

        let sweep_errors_total = Counter::with_opts(Opts::new(
            "service_monitor_sweep_errors_total",
            "Monitoring sweeps that failed to list services",
        ))?;

        let checks_total = Counter::with_opts(Opts::new(
            "service_monitor_checks_total",
            "Individual service checks performed",
        ))?;

        let check_failures_total = Counter::with_opts(Opts::new(
            "service_monitor_check_failures_total",
            "Service checks that did not pass",
        ))?;

        let services_monitored = Gauge::with_opts(Opts::new(
            "service_monitor_services_monitored",
            "Services probed by the latest sweep",
        ))?;

        let alerts_raised_total = CounterVec::new(
            Opts::new("service_monitor_alerts_raised_total", "Alerts created by type"),
            &["alert_type"],
        )?;

        let task_runs_total = CounterVec::new(
            Opts::new(
                "service_monitor_task_runs_total",
                "Scheduler task runs by task and outcome",
            ),
            &["task", "outcome"],
        )?;

        let sweep_duration = Histogram::with_opts(
            HistogramOpts::new(
                "service_monitor_sweep_duration_seconds",
                "Wall-clock duration of a monitoring sweep",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;

        registry.register(Box::new(sweeps_total.clone()))?;
        registry.register(Box::new(sweep_errors_total.clone()))?;
        registry.register(Box::new(checks_total.clone()))?;
        registry.register(Box::new(check_failures_total.clone()))?;
        registry.register(Box::new(services_monitored.clone()))?;
        registry.register(Box::new(alerts_raised_total.clone()))?;
        registry.register(Box::new(task_runs_total.clone()))?;
        registry.register(Box::new(sweep_duration.clone()))?;

        Ok(Self {
            sweeps_total,
            sweep_errors_total,
            checks_total,
            check_failures_total,
            services_monitored,
            alerts_raised_total,
            task_runs_total,
            sweep_duration,
            registry,
        })
    }

    pub fn record_sweep(&self, results: &[CheckResult], seconds: f64) {
        let failures = results.iter().filter(|r| !r.ok).count();
        self.sweeps_total.inc();
        self.checks_total.inc_by(results.len() as f64);
        self.check_failures_total.inc_by(failures as f64);
        self.services_monitored.set(results.len() as f64);
        self.sweep_duration.observe(seconds);
    }

    pub fn record_task_run(&self, task: &str, ok: bool) {
        let outcome = if ok { "success" } else { "error" };
        self.task_runs_total.with_label_values(&[task, outcome]).inc();
    }

    /// Render all metrics as Prometheus text format (for the `/metrics` endpoint).
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn all_metrics_register_without_error() {
        let metrics = AppMetrics::new();
        assert!(metrics.is_ok(), "AppMetrics::new() failed: {:?}", metrics.err());
    }

    #[test]
    fn record_sweep_counts_checks_and_failures() {
        let metrics = AppMetrics::new().unwrap();
        let results = vec![
            CheckResult::failed(1, Duration::from_millis(3), "refused"),
            CheckResult {
                ok: true,
                error: None,
                status_code: Some(200),
                ..CheckResult::failed(2, Duration::from_millis(3), "")
            },
        ];

        metrics.record_sweep(&results, 0.2);

        assert!((metrics.sweeps_total.get() - 1.0).abs() < f64::EPSILON);
        assert!((metrics.checks_total.get() - 2.0).abs() < f64::EPSILON);
        assert!((metrics.check_failures_total.get() - 1.0).abs() < f64::EPSILON);
        assert!((metrics.services_monitored.get() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn task_runs_are_labelled_by_outcome() {
        let metrics = AppMetrics::new().unwrap();
        metrics.record_task_run("heartbeat_check", true);
        metrics.record_task_run("heartbeat_check", false);
        metrics.record_task_run("heartbeat_check", true);

        let ok = metrics
            .task_runs_total
            .with_label_values(&["heartbeat_check", "success"])
            .get();
        assert!((ok - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn render_contains_metric_names() {
        let metrics = AppMetrics::new().unwrap();
        metrics.sweeps_total.inc();
        metrics.alerts_raised_total.with_label_values(&["uptime"]).inc();

        let output = metrics.render().unwrap();
        assert!(output.contains("service_monitor_sweeps_total"));
        assert!(output.contains("alert_type=\"uptime\""));
    }
}

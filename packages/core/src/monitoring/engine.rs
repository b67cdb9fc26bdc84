//! Sweep orchestration.
//!
//! A sweep lists the active services once and checks every one of them
//! concurrently, one spawned task per service. Results come back in
//! completion-independent order: callers must not rely on ordering.
//!
//! Fan-out is unbounded by default, which is fine for tens of services.
//! Larger fleets should set [`SweepEngine::with_max_in_flight`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::monitoring::error::MonitorError;
use crate::monitoring::types::{CheckResult, Checker, ServiceLister};

#[derive(Debug, Clone, Default)]
pub struct SweepEngine {
    limit: Option<Arc<Semaphore>>,
}

impl SweepEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of checks running at the same time.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.limit = Some(Arc::new(Semaphore::new(max.max(1))));
        self
    }

    /// Run a single sweep.
    ///
    /// Lister failures abort the sweep before any check is launched. A check
    /// that dies (panics) still yields a non-OK result for its service, so the
    /// returned vector always has one entry per listed service.
    pub async fn run_once(
        &self,
        lister: &dyn ServiceLister,
        checker: Arc<dyn Checker>,
    ) -> Result<Vec<CheckResult>, MonitorError> {
        let probes = lister.list_active_services().await?;
        tracing::debug!("Sweep started for {} services", probes.len());

        let mut handles = Vec::with_capacity(probes.len());
        for probe in probes {
            let checker = Arc::clone(&checker);
            let limit = self.limit.clone();
            let service_id = probe.id;
            let started = Instant::now();

            let handle = tokio::spawn(async move {
                let _permit = match limit {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                checker.check(&probe).await
            });
            handles.push((service_id, started, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (service_id, started, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(err) => {
                    tracing::warn!("Check for service {} aborted: {}", service_id, err);
                    results.push(CheckResult::failed(
                        service_id,
                        started.elapsed(),
                        format!("check aborted: {}", err),
                    ));
                }
            }
        }

        Ok(results)
    }

    /// Sweep now, then every `every`, pushing each result into `out`.
    ///
    /// Runs until `shutdown` fires, which yields [`MonitorError::Cancelled`].
    /// Delivery to `out` is raced against `shutdown`, so a stalled consumer
    /// cannot keep the loop alive after cancellation. A lister error ends the
    /// loop and is returned as is.
    pub async fn start(
        &self,
        shutdown: CancellationToken,
        every: Duration,
        lister: Arc<dyn ServiceLister>,
        checker: Arc<dyn Checker>,
        out: mpsc::Sender<CheckResult>,
    ) -> Result<(), MonitorError> {
        if every.is_zero() {
            return Err(MonitorError::InvalidInterval);
        }

        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(MonitorError::Cancelled),
                _ = ticker.tick() => {}
            }

            let results = self.run_once(lister.as_ref(), Arc::clone(&checker)).await?;

            for result in results {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return Err(MonitorError::Cancelled),
                    sent = out.send(result) => sent.map_err(|_| MonitorError::OutputClosed)?,
                }
            }
        }
    }
}

use crate::client::{ControlPlane, DistributionInspector};
use crate::sweep::{SweepError, SweepReport};
use crate::updater::SwarmUpdater;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Readiness shared between the sweep runner and the health endpoints.
#[derive(Clone, Default)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }
}

/// Entry point for scheduled sweeps. Guarantees at most one sweep is in flight and wires each
/// sweep to the process shutdown token and the optional sweep timeout.
pub struct SweepRunner<C, R> {
    updater: Arc<SwarmUpdater<C, R>>,
    in_flight: Arc<Mutex<()>>,
    health: HealthState,
    shutdown: CancellationToken,
    timeout: Option<Duration>,
}

impl<C, R> Clone for SweepRunner<C, R> {
    fn clone(&self) -> Self {
        Self {
            updater: self.updater.clone(),
            in_flight: self.in_flight.clone(),
            health: self.health.clone(),
            shutdown: self.shutdown.clone(),
            timeout: self.timeout,
        }
    }
}

impl<C, R> SweepRunner<C, R>
where
    C: ControlPlane + 'static,
    R: DistributionInspector + 'static,
{
    pub fn new(
        updater: SwarmUpdater<C, R>,
        health: HealthState,
        shutdown: CancellationToken,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            updater: Arc::new(updater),
            in_flight: Arc::new(Mutex::new(())),
            health,
            shutdown,
            timeout,
        }
    }

    /// Runs a sweep unless one is already in progress, in which case `Ok(None)` is returned.
    pub async fn sweep(&self) -> Result<Option<SweepReport>, SweepError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            info!("Previous sweep is still running, skipping this one");
            return Ok(None);
        };

        let cancel = self.shutdown.child_token();
        let timer = self.timeout.map(|timeout| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!("Sweep did not finish within {:?}, canceling", timeout);
                cancel.cancel();
            })
        });

        let result = self.updater.run_sweep(&cancel).await;

        if let Some(timer) = timer {
            timer.abort();
        }

        self.health
            .set_ready(!matches!(result, Err(SweepError::ListServices(_))));

        if let Ok(report) = &result {
            info!(
                "Sweep started at {} finished{}: {} updated, {} up to date, {} skipped, {} failed",
                report.started_at.to_rfc3339(),
                if report.canceled { " (canceled)" } else { "" },
                report.updated(),
                report.current(),
                report.skipped(),
                report.failed()
            );
            for (service, outcome) in &report.outcomes {
                debug!("Service {}: {}", service, outcome);
            }
        }

        result.map(Some)
    }

    /// Waits until no sweep is in flight.
    pub async fn wait_idle(&self) {
        let _guard = self.in_flight.lock().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eligibility::{EligibilityPolicy, ServiceLabels};
    use crate::fakes::{FakeControlPlane, FakeRegistry, ServiceBuilder, digest};

    fn runner(
        control_plane: FakeControlPlane,
        shutdown: CancellationToken,
        timeout: Option<Duration>,
    ) -> (SweepRunner<FakeControlPlane, FakeRegistry>, HealthState) {
        runner_with_registry(control_plane, registry(), shutdown, timeout)
    }

    fn registry() -> FakeRegistry {
        FakeRegistry::new().with_digest("registry/app:latest", &digest('a'))
    }

    fn runner_with_registry(
        control_plane: FakeControlPlane,
        registry: FakeRegistry,
        shutdown: CancellationToken,
        timeout: Option<Duration>,
    ) -> (SweepRunner<FakeControlPlane, FakeRegistry>, HealthState) {
        let health = HealthState::default();
        let updater = SwarmUpdater::new(
            control_plane,
            registry,
            EligibilityPolicy::Blacklist(Vec::new()),
            ServiceLabels::default(),
        );
        (
            SweepRunner::new(updater, health.clone(), shutdown, timeout),
            health,
        )
    }

    #[tokio::test]
    async fn test_sweep_marks_ready() {
        let (runner, health) = runner(
            FakeControlPlane::new(vec![ServiceBuilder::new("web").build()]),
            CancellationToken::new(),
            None,
        );
        assert!(!health.is_ready());

        let report = runner.sweep().await.unwrap().unwrap();

        assert_eq!(report.updated(), 1);
        assert!(health.is_ready());
    }

    #[tokio::test]
    async fn test_listing_failure_marks_not_ready() {
        let (runner, health) = runner(
            FakeControlPlane::new(vec![]).failing_listing(),
            CancellationToken::new(),
            None,
        );
        health.set_ready(true);

        let err = runner.sweep().await.unwrap_err();

        assert!(matches!(err, SweepError::ListServices(_)));
        assert!(!health.is_ready());
    }

    #[tokio::test]
    async fn test_concurrent_sweep_is_skipped() {
        let (runner, _) = runner(
            FakeControlPlane::new(vec![ServiceBuilder::new("web").build()]),
            CancellationToken::new(),
            None,
        );

        let _guard = runner.in_flight.try_lock().unwrap();
        let result = runner.sweep().await.unwrap();

        assert!(result.is_none());
        assert!(runner.updater.control_plane.update_calls().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_sweep() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let (runner, _) = runner(
            FakeControlPlane::new(vec![ServiceBuilder::new("web").build()]),
            shutdown,
            Some(Duration::from_secs(60)),
        );

        let report = runner.sweep().await.unwrap().unwrap();

        assert!(report.canceled);
        assert!(runner.updater.control_plane.update_calls().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_cancels_remaining_services() {
        let (runner, _) = runner_with_registry(
            FakeControlPlane::new(vec![
                ServiceBuilder::new("a").build(),
                ServiceBuilder::new("b").build(),
                ServiceBuilder::new("c").build(),
            ]),
            registry().with_delay(Duration::from_millis(200)),
            CancellationToken::new(),
            Some(Duration::from_millis(100)),
        );

        let report = runner.sweep().await.unwrap().unwrap();

        assert!(report.canceled);
        assert_eq!(report.updated(), 1);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].0, "a");
        assert_eq!(runner.updater.control_plane.updated_ids(), vec!["id-a"]);
        assert_eq!(runner.updater.registry.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_wait_idle_lets_in_flight_update_finish() {
        let shutdown = CancellationToken::new();
        let (runner, _) = runner(
            FakeControlPlane::new(vec![
                ServiceBuilder::new("a").build(),
                ServiceBuilder::new("b").build(),
            ])
            .slow_updates(Duration::from_millis(200)),
            shutdown.clone(),
            None,
        );

        let sweep = tokio::spawn({
            let runner = runner.clone();
            async move { runner.sweep().await }
        });
        while runner.updater.control_plane.update_calls().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();
        runner.wait_idle().await;

        assert_eq!(runner.updater.control_plane.updated_ids(), vec!["id-a"]);
        assert_eq!(runner.updater.control_plane.inspect_calls(), vec!["id-a"]);

        let report = sweep.await.unwrap().unwrap().unwrap();
        assert!(report.canceled);
        assert_eq!(report.updated(), 1);
    }
}

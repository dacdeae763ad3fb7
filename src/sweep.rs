use crate::client::{ClientError, ControlPlane, DistributionInspector};
use crate::updater::{SwarmUpdater, UpdateError, UpdateOutcome};
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceOutcome {
    Updated { image: String },
    AlreadyCurrent,
    Skipped,
    Failed { reason: String },
}

impl From<UpdateOutcome> for ServiceOutcome {
    fn from(outcome: UpdateOutcome) -> Self {
        match outcome {
            UpdateOutcome::Updated { image } => ServiceOutcome::Updated { image },
            UpdateOutcome::AlreadyCurrent => ServiceOutcome::AlreadyCurrent,
        }
    }
}

impl fmt::Display for ServiceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceOutcome::Updated { image } => write!(f, "updated to {}", image),
            ServiceOutcome::AlreadyCurrent => write!(f, "up to date"),
            ServiceOutcome::Skipped => write!(f, "skipped"),
            ServiceOutcome::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// What happened to each service during one sweep, in processing order.
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<(String, ServiceOutcome)>,
    pub canceled: bool,
}

impl SweepReport {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            outcomes: Vec::new(),
            canceled: false,
        }
    }

    fn record(&mut self, service: &str, outcome: ServiceOutcome) {
        self.outcomes.push((service.to_string(), outcome));
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, ServiceOutcome::Updated { .. }))
    }

    pub fn current(&self) -> usize {
        self.count(|o| matches!(o, ServiceOutcome::AlreadyCurrent))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ServiceOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ServiceOutcome::Failed { .. }))
    }

    fn count(&self, predicate: impl Fn(&ServiceOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| predicate(o)).count()
    }
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("failed to get service list: {0}")]
    ListServices(#[source] ClientError),

    #[error("cannot inspect the service {service_id}: {source}")]
    InspectSelf {
        service_id: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to update the service {service_id}: {source}")]
    UpdateSelf {
        service_id: String,
        #[source]
        source: UpdateError,
    },
}

impl<C, R> SwarmUpdater<C, R>
where
    C: ControlPlane,
    R: DistributionInspector,
{
    /// Runs one pass over every service in the swarm.
    ///
    /// Services are handled one at a time in listing order. A failing service is recorded and
    /// the sweep moves on; only a listing failure or a failure to update the updater's own
    /// service (always done last) ends the sweep with an error. `cancel` is checked between
    /// services, an update that has already been submitted is never interrupted.
    pub async fn run_sweep(&self, cancel: &CancellationToken) -> Result<SweepReport, SweepError> {
        let services = self
            .control_plane
            .list_services()
            .await
            .map_err(SweepError::ListServices)?;
        debug!("Found {} services", services.len());

        let mut report = SweepReport::new();
        let mut self_service: Option<(String, String)> = None;

        for service in services {
            if cancel.is_cancelled() {
                info!("Service update canceled");
                report.canceled = true;
                return Ok(report);
            }

            let name = service.name().to_string();

            if !self.policy.is_eligible(&service) {
                debug!("Service {} was ignored by blacklist or missing label", name);
                report.record(&name, ServiceOutcome::Skipped);
                continue;
            }

            if self.labels.is_self(&service) {
                debug!("Deferring update of own service {} to the end of the sweep", name);
                if let Some((_, previous)) = self_service.replace((service.id.clone(), name)) {
                    warn!(
                        "More than one service is labelled as the updater itself, skipping {}",
                        previous
                    );
                    report.record(&previous, ServiceOutcome::Skipped);
                }
                continue;
            }

            match self.update_service(service).await {
                Ok(outcome) => report.record(&name, outcome.into()),
                Err(err) => {
                    warn!("Cannot update service {}: {}", name, err);
                    report.record(
                        &name,
                        ServiceOutcome::Failed {
                            reason: err.to_string(),
                        },
                    );
                }
            }
        }

        if let Some((service_id, name)) = self_service {
            if cancel.is_cancelled() {
                info!("Service update canceled before updating own service {}", name);
                report.canceled = true;
                return Ok(report);
            }

            // the listed spec may be stale once the other services have been updated
            let service = self
                .control_plane
                .inspect_service(&service_id)
                .await
                .map_err(|source| SweepError::InspectSelf {
                    service_id: service_id.clone(),
                    source,
                })?;

            let outcome = self
                .update_service(service)
                .await
                .map_err(|source| SweepError::UpdateSelf { service_id, source })?;
            report.record(&name, outcome.into());
        }

        Ok(report)
    }
}

use crate::client::{ClientError, ControlPlane, DistributionInspector};
use crate::digest::{ResolveError, resolve_digest};
use crate::eligibility::{EligibilityPolicy, ServiceLabels};
use crate::image_reference::strip_digest;
use crate::service::Service;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Applies image updates to swarm services through a control plane, resolving digests
/// through a registry.
pub struct SwarmUpdater<C, R> {
    pub(crate) control_plane: C,
    pub(crate) registry: R,
    pub(crate) policy: EligibilityPolicy,
    pub(crate) labels: ServiceLabels,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated { image: String },
    AlreadyCurrent,
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("service {service} has no container image")]
    MissingImage { service: String },

    #[error("cannot retrieve auth token from the image of service {service}: {source}")]
    AuthResolution {
        service: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to get new image digest for service {service}: {source}")]
    DigestResolution {
        service: String,
        #[source]
        source: ResolveError,
    },

    #[error("failed to update service {service}: {source}")]
    UpdateRejected {
        service: String,
        #[source]
        source: ClientError,
    },

    #[error("cannot inspect service {service} to check update status: {source}")]
    PostUpdateInspect {
        service: String,
        #[source]
        source: ClientError,
    },
}

impl<C, R> SwarmUpdater<C, R>
where
    C: ControlPlane,
    R: DistributionInspector,
{
    pub fn new(
        control_plane: C,
        registry: R,
        policy: EligibilityPolicy,
        labels: ServiceLabels,
    ) -> Self {
        Self {
            control_plane,
            registry,
            policy,
            labels,
        }
    }

    /// Points `service` at the digest its tag currently resolves to.
    ///
    /// Nothing is submitted when the resolved image equals the running one. Services
    /// labelled update-only are scaled to zero replicas as part of the same update.
    pub async fn update_service(&self, mut service: Service) -> Result<UpdateOutcome, UpdateError> {
        let name = service.name().to_string();
        let image = service
            .image()
            .ok_or_else(|| UpdateError::MissingImage {
                service: name.clone(),
            })?
            .to_string();

        let encoded_auth = self
            .control_plane
            .retrieve_registry_auth(&image)
            .await
            .map_err(|source| UpdateError::AuthResolution {
                service: name.clone(),
                source,
            })?;
        let auth = (!encoded_auth.is_empty_json()).then_some(encoded_auth);

        let resolved = resolve_digest(&self.registry, strip_digest(&image), auth.as_ref())
            .await
            .map_err(|source| UpdateError::DigestResolution {
                service: name.clone(),
                source,
            })?;

        if resolved == image {
            debug!("Service {} is already up to date", name);
            return Ok(UpdateOutcome::AlreadyCurrent);
        }

        if self.labels.is_update_only(&service) {
            if let Some(replicas) = service.spec.replicas_mut() {
                debug!(
                    "Scaling update-only service {} from {} replicas to 0",
                    name, replicas
                );
                *replicas = 0;
            }
        }
        service.spec.set_image(resolved);

        debug!("Updating service {}...", name);
        let response = self
            .control_plane
            .update_service(&service.id, service.version, &service.spec, auth.as_ref())
            .await
            .map_err(|source| UpdateError::UpdateRejected {
                service: name.clone(),
                source,
            })?;

        for warning in response.warnings() {
            warn!("Update of service {} returned warning: {}", name, warning);
        }

        let updated = self
            .control_plane
            .inspect_service(&service.id)
            .await
            .map_err(|source| UpdateError::PostUpdateInspect {
                service: name.clone(),
                source,
            })?;

        let previous = updated.previous_image();
        let current = updated.image();

        if previous != current {
            let image = current.unwrap_or_default().to_string();
            info!("Service {} updated to {}", name, image);
            Ok(UpdateOutcome::Updated { image })
        } else {
            debug!("Service {} is up to date", name);
            Ok(UpdateOutcome::AlreadyCurrent)
        }
    }
}

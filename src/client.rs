//! Capabilities the updater needs from the outside world.
//!
//! `ControlPlane` covers the swarm manager (services and the credential store),
//! `DistributionInspector` covers registry lookups. `docker::DockerClient` implements both
//! against the Docker Engine API; tests use the in-memory fakes.

use crate::image_reference::ParseError;
use crate::registry_auth::EncodedAuth;
use crate::service::{Service, ServiceSpec, UpdateResponse, Version};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("docker daemon is unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("{endpoint} returned status {status}: {message}")]
    Api {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("failed to decode response of {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid image reference {image}: {source}")]
    InvalidImage {
        image: String,
        #[source]
        source: ParseError,
    },

    #[error("failed to encode registry credentials: {0}")]
    Credentials(#[from] serde_json::Error),
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn list_services(&self) -> Result<Vec<Service>, ClientError>;

    async fn inspect_service(&self, id: &str) -> Result<Service, ClientError>;

    /// Replaces the spec of service `id`. Fails if `version` is no longer current.
    async fn update_service(
        &self,
        id: &str,
        version: Version,
        spec: &ServiceSpec,
        auth: Option<&EncodedAuth>,
    ) -> Result<UpdateResponse, ClientError>;

    /// Credentials for pulling `image`, [`EncodedAuth::empty`] when none are known.
    async fn retrieve_registry_auth(&self, image: &str) -> Result<EncodedAuth, ClientError>;
}

#[async_trait]
pub trait DistributionInspector: Send + Sync {
    /// Returns the manifest digest (`algorithm:hex`) the registry currently serves for `image`.
    async fn inspect_distribution(
        &self,
        image: &str,
        auth: Option<&EncodedAuth>,
    ) -> Result<String, ClientError>;
}

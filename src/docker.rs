use crate::client::{ClientError, ControlPlane, DistributionInspector};
use crate::config::{Config, Registry, find_registry};
use crate::image_reference::ImageReference;
use crate::registry_auth::EncodedAuth;
use crate::service::{Service, ServiceSpec, UpdateResponse, Version};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fs;
use tracing::{debug, info};

static REGISTRY_AUTH_HEADER: &str = "X-Registry-Auth";

/// Docker Engine API client for a swarm manager reachable over TCP.
#[derive(Clone)]
pub struct DockerClient {
    http_client: Client,
    base_url: String,
    registries: Vec<Registry>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Deserialize)]
struct DistributionInspect {
    #[serde(rename = "Descriptor")]
    descriptor: Descriptor,
}

#[derive(Deserialize)]
struct Descriptor {
    digest: String,
}

pub fn create_client(config: &Config) -> Result<DockerClient> {
    info!("Initializing Docker Engine API client for {}", config.docker.host);
    // System certificates are loaded automatically with rustls-tls-native-roots
    let mut client_builder = Client::builder();

    if let Some(tls) = &config.docker.tls {
        for file_path in &tls.ca_certificate_paths {
            let file_content = fs::read(file_path)
                .with_context(|| format!("Failed to read file {}", file_path.display()))?;
            let cert =
                Certificate::from_pem(&file_content).context("Failed to parse certificate")?;
            client_builder = client_builder.add_root_certificate(cert);
        }
        if let Some(identity_path) = &tls.identity_path {
            let file_content = fs::read(identity_path)
                .with_context(|| format!("Failed to read file {}", identity_path.display()))?;
            let identity = Identity::from_pem(&file_content)
                .context("Failed to parse client certificate and key")?;
            client_builder = client_builder.identity(identity);
        }
    }

    let http_client = client_builder
        .build()
        .context("Failed to build HTTP client")?;

    Ok(DockerClient {
        http_client,
        base_url: api_base_url(
            &config.docker.host,
            &config.docker.api_version,
            config.docker.tls.is_some(),
        )?,
        registries: config.registries.clone(),
    })
}

/// Turns a `DOCKER_HOST` style address into the versioned API root.
fn api_base_url(host: &str, api_version: &str, tls: bool) -> Result<String> {
    let host = host.trim_end_matches('/');
    let base = if let Some(address) = host.strip_prefix("tcp://") {
        let scheme = if tls { "https" } else { "http" };
        format!("{}://{}", scheme, address)
    } else if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else if host.starts_with("unix://") || host.starts_with("npipe://") {
        anyhow::bail!(
            "Docker host {} is a local socket, expose the daemon over TCP (for example with a socket proxy) instead",
            host
        );
    } else {
        anyhow::bail!("Unsupported Docker host address: {}", host);
    };

    Ok(format!("{}/{}", base, api_version.trim_matches('/')))
}

impl DockerClient {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request.send().await.map_err(ClientError::Unreachable)?;
        let status = response.status();

        if !status.is_success() {
            let message = match response.json::<ErrorResponse>().await {
                Ok(body) => body.message,
                Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
            };
            return Err(ClientError::Api {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| ClientError::Decode {
                endpoint: endpoint.to_string(),
                source,
            })
    }
}

fn with_registry_auth(request: RequestBuilder, auth: Option<&EncodedAuth>) -> RequestBuilder {
    match auth {
        Some(auth) => request.header(REGISTRY_AUTH_HEADER, auth.expose_secret()),
        None => request,
    }
}

#[async_trait]
impl ControlPlane for DockerClient {
    async fn list_services(&self) -> Result<Vec<Service>, ClientError> {
        let endpoint = "/services";
        self.send(endpoint, self.http_client.get(self.url(endpoint)))
            .await
    }

    async fn inspect_service(&self, id: &str) -> Result<Service, ClientError> {
        let endpoint = format!("/services/{}", id);
        self.send(&endpoint, self.http_client.get(self.url(&endpoint)))
            .await
    }

    async fn update_service(
        &self,
        id: &str,
        version: Version,
        spec: &ServiceSpec,
        auth: Option<&EncodedAuth>,
    ) -> Result<UpdateResponse, ClientError> {
        let endpoint = format!("/services/{}/update", id);
        debug!("Submitting spec of service {} at version {}", id, version.index);
        let request = self
            .http_client
            .post(self.url(&endpoint))
            .query(&[("version", version.index)])
            .json(spec);
        self.send(&endpoint, with_registry_auth(request, auth)).await
    }

    async fn retrieve_registry_auth(&self, image: &str) -> Result<EncodedAuth, ClientError> {
        let reference = ImageReference::parse(image).map_err(|source| ClientError::InvalidImage {
            image: image.to_string(),
            source,
        })?;

        match find_registry(&self.registries, &reference.domain) {
            Some(registry) => {
                debug!(
                    "Using credentials of user {} for registry {}",
                    registry.username, registry.hostname
                );
                Ok(EncodedAuth::from_credentials(
                    &registry.username,
                    &registry.password,
                    &registry.hostname,
                )?)
            }
            None => Ok(EncodedAuth::empty()),
        }
    }
}

#[async_trait]
impl DistributionInspector for DockerClient {
    async fn inspect_distribution(
        &self,
        image: &str,
        auth: Option<&EncodedAuth>,
    ) -> Result<String, ClientError> {
        let endpoint = format!("/distribution/{}/json", image);
        let request = with_registry_auth(self.http_client.get(self.url(&endpoint)), auth);
        let inspect: DistributionInspect = self.send(&endpoint, request).await?;
        Ok(inspect.descriptor.digest)
    }
}

//! In-memory collaborators for tests.

use crate::client::{ClientError, ControlPlane, DistributionInspector};
use crate::registry_auth::{EMPTY_JSON_AUTH, EncodedAuth};
use crate::service::{
    ContainerSpec, ReplicatedService, Service, ServiceMode, ServiceSpec, TaskSpec, UpdateResponse,
    Version,
};
use async_trait::async_trait;
use serde_json::{Map, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A syntactically valid sha256 digest made of one repeated hex character.
pub fn digest(c: char) -> String {
    format!("sha256:{}", c.to_string().repeat(64))
}

pub struct ServiceBuilder {
    id: String,
    version: u64,
    spec: ServiceSpec,
    previous_image: Option<String>,
}

impl ServiceBuilder {
    pub fn new(name: &str) -> Self {
        let spec = ServiceSpec {
            name: name.to_string(),
            labels: BTreeMap::new(),
            task_template: TaskSpec {
                container_spec: Some(ContainerSpec {
                    image: "registry/app:latest".to_string(),
                    extra: Map::new(),
                }),
                extra: Map::new(),
            },
            mode: Some(ServiceMode {
                replicated: Some(ReplicatedService {
                    replicas: Some(1),
                    extra: Map::new(),
                }),
                extra: Map::new(),
            }),
            extra: Map::new(),
        };
        Self {
            id: format!("id-{}", name),
            version: 1,
            spec,
            previous_image: None,
        }
    }

    pub fn image(mut self, image: &str) -> Self {
        self.spec.set_image(image.to_string());
        self
    }

    pub fn without_image(mut self) -> Self {
        self.spec.task_template.container_spec = None;
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.spec.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn replicas(mut self, replicas: Option<u64>) -> Self {
        self.spec.mode = Some(ServiceMode {
            replicated: Some(ReplicatedService {
                replicas,
                extra: Map::new(),
            }),
            extra: Map::new(),
        });
        self
    }

    pub fn global(mut self) -> Self {
        let mut extra = Map::new();
        extra.insert("Global".to_string(), json!({}));
        self.spec.mode = Some(ServiceMode {
            replicated: None,
            extra,
        });
        self
    }

    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn previous_image(mut self, image: &str) -> Self {
        self.previous_image = Some(image.to_string());
        self
    }

    pub fn build(self) -> Service {
        let previous_spec = self.previous_image.map(|image| {
            let mut previous = self.spec.clone();
            previous.set_image(image);
            previous
        });
        Service {
            id: self.id,
            version: Version {
                index: self.version,
            },
            spec: self.spec,
            previous_spec,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdateCall {
    pub id: String,
    pub version: u64,
    pub spec: ServiceSpec,
    pub auth: Option<String>,
}

/// Swarm manager double. Accepted updates are applied the way the daemon does it: the old
/// spec becomes `PreviousSpec` and the version index is bumped.
pub struct FakeControlPlane {
    services: Mutex<Vec<Service>>,
    update_calls: Mutex<Vec<UpdateCall>>,
    inspect_calls: Mutex<Vec<String>>,
    failing_updates: HashSet<String>,
    failing_inspects: HashSet<String>,
    fail_listing: bool,
    fail_auth: bool,
    ignore_updates: bool,
    auth: String,
    cancel_after: Option<(usize, CancellationToken)>,
    update_delay: Option<Duration>,
}

impl FakeControlPlane {
    pub fn new(services: Vec<Service>) -> Self {
        Self {
            services: Mutex::new(services),
            update_calls: Mutex::new(Vec::new()),
            inspect_calls: Mutex::new(Vec::new()),
            failing_updates: HashSet::new(),
            failing_inspects: HashSet::new(),
            fail_listing: false,
            fail_auth: false,
            ignore_updates: false,
            auth: EMPTY_JSON_AUTH.to_string(),
            cancel_after: None,
            update_delay: None,
        }
    }

    pub fn failing_update(mut self, id: &str) -> Self {
        self.failing_updates.insert(id.to_string());
        self
    }

    pub fn failing_inspect(mut self, id: &str) -> Self {
        self.failing_inspects.insert(id.to_string());
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn failing_auth(mut self) -> Self {
        self.fail_auth = true;
        self
    }

    /// Accept update calls without changing any state.
    pub fn ignoring_updates(mut self) -> Self {
        self.ignore_updates = true;
        self
    }

    pub fn with_auth(mut self, encoded: &str) -> Self {
        self.auth = encoded.to_string();
        self
    }

    /// Cancel `token` as soon as the `count`-th update call has been received.
    pub fn cancel_after(mut self, count: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((count, token));
        self
    }

    /// Hold every update call for `delay` before it is applied.
    pub fn slow_updates(mut self, delay: Duration) -> Self {
        self.update_delay = Some(delay);
        self
    }

    pub fn update_calls(&self) -> Vec<UpdateCall> {
        self.update_calls.lock().unwrap().clone()
    }

    pub fn updated_ids(&self) -> Vec<String> {
        self.update_calls().into_iter().map(|call| call.id).collect()
    }

    pub fn inspect_calls(&self) -> Vec<String> {
        self.inspect_calls.lock().unwrap().clone()
    }
}

fn api_error(endpoint: &str, status: u16, message: &str) -> ClientError {
    ClientError::Api {
        endpoint: endpoint.to_string(),
        status,
        message: message.to_string(),
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn list_services(&self) -> Result<Vec<Service>, ClientError> {
        if self.fail_listing {
            return Err(api_error("/services", 503, "This node is not a swarm manager."));
        }
        Ok(self.services.lock().unwrap().clone())
    }

    async fn inspect_service(&self, id: &str) -> Result<Service, ClientError> {
        self.inspect_calls.lock().unwrap().push(id.to_string());
        if self.failing_inspects.contains(id) {
            return Err(api_error(&format!("/services/{}", id), 500, "inspect failed"));
        }
        self.services
            .lock()
            .unwrap()
            .iter()
            .find(|service| service.id == id)
            .cloned()
            .ok_or_else(|| api_error(&format!("/services/{}", id), 404, "service not found"))
    }

    async fn update_service(
        &self,
        id: &str,
        version: Version,
        spec: &ServiceSpec,
        auth: Option<&EncodedAuth>,
    ) -> Result<UpdateResponse, ClientError> {
        let call_count = {
            let mut calls = self.update_calls.lock().unwrap();
            calls.push(UpdateCall {
                id: id.to_string(),
                version: version.index,
                spec: spec.clone(),
                auth: auth.map(|a| a.expose_secret().to_string()),
            });
            calls.len()
        };
        if let Some((count, token)) = &self.cancel_after {
            if call_count >= *count {
                token.cancel();
            }
        }

        let endpoint = format!("/services/{}/update", id);
        if self.failing_updates.contains(id) {
            return Err(api_error(&endpoint, 500, "update rejected"));
        }
        if let Some(delay) = self.update_delay {
            tokio::time::sleep(delay).await;
        }

        let mut services = self.services.lock().unwrap();
        let service = services
            .iter_mut()
            .find(|service| service.id == id)
            .ok_or_else(|| api_error(&endpoint, 404, "service not found"))?;
        if service.version != version {
            return Err(api_error(&endpoint, 500, "update out of sequence"));
        }
        if !self.ignore_updates {
            service.previous_spec = Some(std::mem::replace(&mut service.spec, spec.clone()));
            service.version.index += 1;
        }
        Ok(UpdateResponse::default())
    }

    async fn retrieve_registry_auth(&self, _image: &str) -> Result<EncodedAuth, ClientError> {
        if self.fail_auth {
            return Err(api_error("credential store", 500, "credential helper failed"));
        }
        Ok(EncodedAuth::new(self.auth.clone()))
    }
}

/// Registry double keyed by the exact image string the updater asks for.
#[derive(Default)]
pub struct FakeRegistry {
    digests: HashMap<String, String>,
    calls: Mutex<Vec<(String, Option<String>)>>,
    delay: Option<Duration>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_digest(mut self, image: &str, digest: &str) -> Self {
        self.digests.insert(image.to_string(), digest.to_string());
        self
    }

    /// Answer every lookup only after `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DistributionInspector for FakeRegistry {
    async fn inspect_distribution(
        &self,
        image: &str,
        auth: Option<&EncodedAuth>,
    ) -> Result<String, ClientError> {
        self.calls.lock().unwrap().push((
            image.to_string(),
            auth.map(|a| a.expose_secret().to_string()),
        ));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.digests
            .get(image)
            .cloned()
            .ok_or_else(|| {
                api_error(&format!("/distribution/{}/json", image), 404, "manifest unknown")
            })
    }
}

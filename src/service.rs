//! Swarm service objects as returned by the Docker Engine API.
//!
//! Only the fields the updater reads or writes are modelled. Everything else is kept in the
//! flattened `extra` maps so that a spec read from the daemon can be submitted back unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Service {
    #[serde(rename = "ID")]
    pub id: String,
    pub version: Version,
    pub spec: ServiceSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_spec: Option<ServiceSpec>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Object version used by the daemon for optimistic concurrency on updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Version {
    pub index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub task_template: TaskSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ServiceMode>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_spec: Option<ContainerSpec>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSpec {
    #[serde(default)]
    pub image: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `Replicated` is the only mode the updater changes; `Global` and the job modes stay in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceMode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicated: Option<ReplicatedService>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReplicatedService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateResponse {
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

impl Service {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn image(&self) -> Option<&str> {
        self.spec.image()
    }

    pub fn previous_image(&self) -> Option<&str> {
        self.previous_spec.as_ref().and_then(|spec| spec.image())
    }
}

impl ServiceSpec {
    pub fn image(&self) -> Option<&str> {
        self.task_template
            .container_spec
            .as_ref()
            .map(|container| container.image.as_str())
            .filter(|image| !image.is_empty())
    }

    pub fn set_image(&mut self, image: String) {
        self.task_template
            .container_spec
            .get_or_insert_with(ContainerSpec::default)
            .image = image;
    }

    /// Desired replica count, only present for replicated services that declare one.
    pub fn replicas_mut(&mut self) -> Option<&mut u64> {
        self.mode
            .as_mut()
            .and_then(|mode| mode.replicated.as_mut())
            .and_then(|replicated| replicated.replicas.as_mut())
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

impl UpdateResponse {
    pub fn warnings(&self) -> &[String] {
        self.warnings.as_deref().unwrap_or_default()
    }
}

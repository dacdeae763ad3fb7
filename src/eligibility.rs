use crate::service::Service;
use regex::Regex;

pub static DEFAULT_LABEL_NAMESPACE: &str = "xyz.megpoid.swarm-updater";

/// Label keys recognised on services, all derived from one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLabels {
    namespace: String,
}

impl ServiceLabels {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// `<namespace>.enable`: opts a service in when label-gated mode is active.
    pub fn enable(&self) -> String {
        format!("{}.enable", self.namespace)
    }

    /// `<namespace>.update-only`: scale the service to zero instead of rolling it.
    pub fn update_only(&self) -> String {
        format!("{}.update-only", self.namespace)
    }

    pub fn is_update_only(&self, service: &Service) -> bool {
        label_is_true(service, &self.update_only())
    }

    /// The bare namespace label marks the updater's own service, its value is ignored.
    pub fn is_self(&self, service: &Service) -> bool {
        service.spec.labels.contains_key(&self.namespace)
    }
}

impl Default for ServiceLabels {
    fn default() -> Self {
        Self::new(DEFAULT_LABEL_NAMESPACE)
    }
}

#[derive(Debug, Clone)]
pub enum EligibilityPolicy {
    /// Only services carrying `enable_label=true` are updated.
    LabelGated { enable_label: String },
    /// Every service is updated unless its name matches one of the patterns.
    Blacklist(Vec<Regex>),
}

impl EligibilityPolicy {
    pub fn is_eligible(&self, service: &Service) -> bool {
        match self {
            EligibilityPolicy::LabelGated { enable_label } => label_is_true(service, enable_label),
            EligibilityPolicy::Blacklist(patterns) => {
                !patterns.iter().any(|pattern| pattern.is_match(service.name()))
            }
        }
    }
}

fn label_is_true(service: &Service, key: &str) -> bool {
    service
        .spec
        .label(key)
        .is_some_and(|value| value.eq_ignore_ascii_case("true"))
}

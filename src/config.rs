use crate::eligibility::{DEFAULT_LABEL_NAMESPACE, EligibilityPolicy, ServiceLabels};
use crate::image_reference::normalize_domain;
use crate::registry_auth::SecretString;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs, path::Path};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub docker: Docker,
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default)]
    pub run_once: bool,
    #[serde(default)]
    pub sweep_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub label_enable: bool,
    #[serde(default = "default_label_namespace")]
    pub label_namespace: String,
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub webserver: Webserver,
    #[serde(default)]
    pub registries: Vec<Registry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Docker {
    #[serde(default = "default_docker_host")]
    pub host: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub tls: Option<Tls>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tls {
    #[serde(default)]
    pub ca_certificate_paths: Vec<PathBuf>,
    /// PEM file holding the client certificate followed by its private key.
    #[serde(default)]
    pub identity_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Registry {
    pub hostname: String,
    pub username: String,
    pub password: SecretString,
}

#[derive(Debug, Deserialize)]
pub struct Webserver {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for Docker {
    fn default() -> Self {
        Self {
            host: default_docker_host(),
            api_version: default_api_version(),
            tls: None,
        }
    }
}

impl Default for Webserver {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_port(),
        }
    }
}

fn default_schedule() -> String {
    "0 */5 * * * *".to_string()
}

fn default_label_namespace() -> String {
    DEFAULT_LABEL_NAMESPACE.to_string()
}

fn default_docker_host() -> String {
    "tcp://127.0.0.1:2375".to_string()
}

fn default_api_version() -> String {
    "v1.41".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn labels(&self) -> ServiceLabels {
        ServiceLabels::new(&self.label_namespace)
    }

    /// Label-gated when `labelEnable` is set, otherwise the blacklist with every pattern compiled.
    pub fn eligibility_policy(&self) -> Result<EligibilityPolicy> {
        if self.label_enable {
            return Ok(EligibilityPolicy::LabelGated {
                enable_label: self.labels().enable(),
            });
        }

        let patterns = self
            .blacklist
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .with_context(|| format!("Invalid blacklist pattern: {}", pattern))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(EligibilityPolicy::Blacklist(patterns))
    }

    pub fn sweep_timeout(&self) -> Option<Duration> {
        self.sweep_timeout_seconds.map(Duration::from_secs)
    }
}

/// Credentials configured for `hostname`, comparing normalized registry hostnames.
pub fn find_registry<'a>(registries: &'a [Registry], hostname: &str) -> Option<&'a Registry> {
    let hostname = normalize_domain(hostname);
    registries
        .iter()
        .find(|registry| normalize_domain(&registry.hostname) == hostname)
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error naming every referenced variable that is not set.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let mut missing = Vec::new();
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| {
            missing.push(var_name.to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result.into_owned())
}

//! Label-driven service description.
//!
//! The label convention is the persisted contract between an image and its
//! ambassador: `ambassador.host` names the address to advertise, and every
//! `ambassador.services.<dotted.name>` label names one advertisable service.
//! Dots in the name become path separators (`internal.user` -> `internal/user`).
//! A label value is either a literal container port or `env:VARNAME`, which
//! resolves the port through the container's own environment.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use ambassador_common::error::Result;

use crate::inspector::{ContainerInfo, ContainerInspector};

pub const HOST_LABEL: &str = "ambassador.host";
pub const SERVICE_LABEL_PREFIX: &str = "ambassador.services.";

/// Advertised when no host label is present.
const DEFAULT_HOST: &str = "0.0.0.0";

/// One advertisable `(name, host, port)` triple derived from a container.
///
/// Built at query time from a fresh inspection; never cached across
/// container restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub name: String,
    pub host: String,
    pub port: String,
}

/// A label value: either a literal, or a reference into the container env.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelValue {
    Literal(String),
    EnvRef(String),
}

impl LabelValue {
    /// Parses the raw label value; `env:VARNAME` is the only indirection.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix("env:") {
            Some(var) => LabelValue::EnvRef(var.to_string()),
            None => LabelValue::Literal(raw.to_string()),
        }
    }

    /// Resolves against a `KEY=VALUE` environment sequence.
    pub fn resolve(&self, env: &[String]) -> Option<String> {
        match self {
            LabelValue::Literal(value) => Some(value.clone()),
            LabelValue::EnvRef(name) => env.iter().find_map(|entry| {
                entry
                    .split_once('=')
                    .filter(|(key, _)| key == name)
                    .map(|(_, value)| value.to_string())
            }),
        }
    }
}

/// Derives advertisable endpoints for one container.
///
/// Owns no state beyond the inspector handle and the identifiers; every
/// query re-inspects the container so the publisher always advertises the
/// container's current shape.
pub struct ContainerDescriptor {
    inspector: Arc<dyn ContainerInspector>,
    ident: String,
    hostname: String,
}

impl ContainerDescriptor {
    /// Creates a descriptor for the current host's own container.
    ///
    /// Inside a container the hostname doubles as the container identifier,
    /// which is exactly how the sidecar finds itself.
    pub fn new(inspector: Arc<dyn ContainerInspector>) -> Self {
        let hostname = detect_hostname();
        Self {
            inspector,
            ident: hostname.clone(),
            hostname,
        }
    }

    /// Overrides the container identifier used for inspection.
    pub fn with_ident(mut self, ident: impl Into<String>) -> Self {
        self.ident = ident.into();
        self
    }

    /// Overrides the hostname advertised in store keys.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// The hostname this container advertises under.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The `{service-name -> host-port}` pairs this container advertises.
    ///
    /// Only labels whose referenced port is actually published make it in;
    /// a service that is not reachable is silently not advertised.
    pub async fn services(&self) -> Result<BTreeMap<String, String>> {
        let info = self.inspector.inspect(&self.ident).await?;
        Ok(services_from(&info))
    }

    /// The address to advertise, resolved from `ambassador.host`.
    ///
    /// Never fails: an absent or unresolvable label falls back to the
    /// bind-all address, and inspection failure does the same.
    pub async fn host(&self) -> String {
        match self.inspector.inspect(&self.ident).await {
            Ok(info) => host_from(&info),
            Err(_) => DEFAULT_HOST.to_string(),
        }
    }

    /// All advertisable endpoints, from one inspection.
    pub async fn endpoints(&self) -> Result<Vec<ServiceEndpoint>> {
        let info = self.inspector.inspect(&self.ident).await?;
        let host = host_from(&info);
        Ok(services_from(&info)
            .into_iter()
            .map(|(name, port)| ServiceEndpoint {
                name,
                host: host.clone(),
                port,
            })
            .collect())
    }
}

fn services_from(info: &ContainerInfo) -> BTreeMap<String, String> {
    let mut services = BTreeMap::new();
    for (label, raw) in &info.labels {
        let Some(dotted) = label.strip_prefix(SERVICE_LABEL_PREFIX) else {
            continue;
        };
        let name = dotted.replace('.', "/");

        let container_port = LabelValue::parse(raw).resolve(&info.env);
        let host_port =
            container_port.and_then(|port| info.published_ports.get(&port).cloned());
        match host_port {
            Some(port) => {
                services.insert(name, port);
            }
            None => {
                // Best effort: an unpublished service is not advertised.
                debug!(label = %label, "service label does not resolve to a published port");
            }
        }
    }
    services
}

fn host_from(info: &ContainerInfo) -> String {
    info.labels
        .get(HOST_LABEL)
        .and_then(|raw| LabelValue::parse(raw).resolve(&info.env))
        .unwrap_or_else(|| DEFAULT_HOST.to_string())
}

fn detect_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

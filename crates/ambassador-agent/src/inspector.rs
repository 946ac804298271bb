//! Read-only container metadata access.
//!
//! The inspector boundary is intentionally narrow: labels, environment and
//! published ports are all the agent ever needs. [`DockerInspector`] fills
//! the contract from the Docker Engine API (`GET /containers/{id}/json`).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Request;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;

use ambassador_common::error::{AmbassadorError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A container's advertising-relevant metadata.
#[derive(Debug, Clone, Default)]
pub struct ContainerInfo {
    /// Image/runtime labels, e.g. `ambassador.services.user = "8080"`.
    pub labels: HashMap<String, String>,
    /// Environment as an ordered `KEY=VALUE` sequence.
    pub env: Vec<String>,
    /// Published ports: container port number -> host port number.
    pub published_ports: HashMap<String, String>,
}

/// Returns a container's labels, environment and host-port mappings.
#[async_trait]
pub trait ContainerInspector: Send + Sync {
    async fn inspect(&self, id: &str) -> Result<ContainerInfo>;
}

/// Inspector backed by the Docker Engine HTTP API.
pub struct DockerInspector {
    base: String,
    client: Client<HttpConnector, Full<Bytes>>,
}

#[derive(Debug, Deserialize)]
struct WireInspect {
    #[serde(rename = "Config", default)]
    config: WireConfig,
    #[serde(rename = "NetworkSettings", default)]
    network_settings: WireNetworkSettings,
}

#[derive(Debug, Deserialize, Default)]
struct WireConfig {
    #[serde(rename = "Labels", default)]
    labels: HashMap<String, String>,
    #[serde(rename = "Env", default)]
    env: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct WireNetworkSettings {
    #[serde(rename = "Ports", default)]
    ports: HashMap<String, Option<Vec<WirePortBinding>>>,
}

#[derive(Debug, Deserialize)]
struct WirePortBinding {
    #[serde(rename = "HostPort")]
    host_port: String,
}

impl From<WireInspect> for ContainerInfo {
    fn from(wire: WireInspect) -> Self {
        let mut published_ports = HashMap::new();
        for (port_spec, bindings) in wire.network_settings.ports {
            // "8080/tcp" -> "8080"; first host binding wins.
            let container_port = port_spec
                .split_once('/')
                .map(|(port, _)| port)
                .unwrap_or(&port_spec);
            if let Some(binding) = bindings.and_then(|b| b.into_iter().next()) {
                published_ports.insert(container_port.to_string(), binding.host_port);
            }
        }
        ContainerInfo {
            labels: wire.config.labels,
            env: wire.config.env,
            published_ports,
        }
    }
}

impl DockerInspector {
    /// Creates an inspector for a TCP Docker endpoint.
    ///
    /// Accepts `http://host:2375`, `tcp://host:2375` or a bare `host:2375`.
    pub fn new(url: &str) -> Self {
        let base = url.trim_end_matches('/');
        let base = match base.split_once("://") {
            Some(("tcp", rest)) => format!("http://{}", rest),
            Some(_) => base.to_string(),
            None => format!("http://{}", base),
        };
        Self {
            base,
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }
}

#[async_trait]
impl ContainerInspector for DockerInspector {
    async fn inspect(&self, id: &str) -> Result<ContainerInfo> {
        let request = Request::builder()
            .method("GET")
            .uri(format!("{}/containers/{}/json", self.base, id))
            .body(Full::new(Bytes::new()))
            .map_err(|e| AmbassadorError::Inspection(format!("failed to build request: {}", e)))?;

        let response = tokio::time::timeout(REQUEST_TIMEOUT, self.client.request(request))
            .await
            .map_err(|_| AmbassadorError::Timeout(REQUEST_TIMEOUT.as_millis() as u64))?
            .map_err(|e| AmbassadorError::Inspection(format!("docker request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| AmbassadorError::Inspection(format!("failed to read inspect response: {}", e)))?
            .to_bytes();

        if !status.is_success() {
            return Err(AmbassadorError::Inspection(format!(
                "docker returned {} for container {}",
                status, id
            )));
        }

        let wire: WireInspect = serde_json::from_slice(&body)
            .map_err(|e| AmbassadorError::Inspection(format!("malformed inspect response: {}", e)))?;
        Ok(wire.into())
    }
}

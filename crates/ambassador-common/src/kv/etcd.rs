//! etcd-backed store client.
//!
//! Speaks the etcd v2 keys API over HTTP: `GET /v2/keys/<path>` for reads
//! (with `?recursive=true` for subtrees), `PUT` with a form-encoded body for
//! writes (the `ttl` field maps directly onto the store's per-key TTL) and
//! `DELETE` for removals. A missing key surfaces as `Ok(None)` on the read
//! path; absence of configuration is a valid steady state, not an error.

use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use url::form_urlencoded;

use crate::error::{AmbassadorError, Result};
use crate::kv::{normalize_key, KeyValueStore, KvNode};

/// etcd error code for "Key not found".
const KEY_NOT_FOUND: u64 = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// etcd v2 client for the [`KeyValueStore`] trait.
pub struct EtcdStore {
    base: String,
    client: Client<HttpConnector, Full<Bytes>>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    node: Option<WireNode>,
    #[serde(rename = "errorCode")]
    error_code: Option<u64>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireNode {
    key: String,
    #[serde(default)]
    dir: bool,
    value: Option<String>,
    #[serde(default)]
    nodes: Vec<WireNode>,
}

impl From<WireNode> for KvNode {
    fn from(wire: WireNode) -> Self {
        KvNode {
            key: wire.key,
            value: wire.value,
            dir: wire.dir,
            nodes: wire.nodes.into_iter().map(KvNode::from).collect(),
        }
    }
}

impl EtcdStore {
    /// Creates a client for the given endpoint, e.g. `http://127.0.0.1:2379`.
    ///
    /// A bare `host:port` is accepted and assumed to be plain HTTP.
    pub fn new(url: &str) -> Self {
        let base = url.trim_end_matches('/');
        let base = if base.contains("://") {
            base.to_string()
        } else {
            format!("http://{}", base)
        };
        Self {
            base,
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    fn key_url(&self, key: &str, query: &str) -> String {
        format!("{}/v2/keys/{}{}", self.base, normalize_key(key), query)
    }

    async fn execute(&self, request: Request<Full<Bytes>>) -> Result<(StatusCode, Bytes)> {
        let response = tokio::time::timeout(REQUEST_TIMEOUT, self.client.request(request))
            .await
            .map_err(|_| AmbassadorError::Timeout(REQUEST_TIMEOUT.as_millis() as u64))?
            .map_err(|e| AmbassadorError::Store(format!("etcd request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| AmbassadorError::Store(format!("failed to read etcd response: {}", e)))?
            .to_bytes();
        Ok((status, body))
    }
}

#[async_trait]
impl KeyValueStore for EtcdStore {
    async fn get(&self, key: &str, recursive: bool) -> Result<Option<KvNode>> {
        let query = if recursive { "?recursive=true" } else { "" };
        let request = Request::builder()
            .method("GET")
            .uri(self.key_url(key, query))
            .body(Full::new(Bytes::new()))
            .map_err(|e| AmbassadorError::Store(format!("failed to build request: {}", e)))?;

        let (status, body) = self.execute(request).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let wire: WireResponse = serde_json::from_slice(&body)?;
        if wire.error_code == Some(KEY_NOT_FOUND) {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AmbassadorError::Store(format!(
                "etcd returned {}: {}",
                status,
                wire.message.unwrap_or_default()
            )));
        }

        Ok(wire.node.map(KvNode::from))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        // The serializer is not Send; only the finished string may live
        // across the request await.
        let body = {
            let mut form = form_urlencoded::Serializer::new(String::new());
            form.append_pair("value", value);
            if let Some(ttl) = ttl {
                form.append_pair("ttl", &ttl.as_secs().to_string());
            }
            form.finish()
        };

        let request = Request::builder()
            .method("PUT")
            .uri(self.key_url(key, ""))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| AmbassadorError::Store(format!("failed to build request: {}", e)))?;

        let (status, body) = self.execute(request).await?;
        if !status.is_success() {
            return Err(AmbassadorError::Store(format!(
                "etcd set failed with {}: {}",
                status,
                String::from_utf8_lossy(&body)
            )));
        }
        Ok(())
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<()> {
        let query = if recursive { "?recursive=true" } else { "" };
        let request = Request::builder()
            .method("DELETE")
            .uri(self.key_url(key, query))
            .body(Full::new(Bytes::new()))
            .map_err(|e| AmbassadorError::Store(format!("failed to build request: {}", e)))?;

        let (status, body) = self.execute(request).await?;
        // Deleting a key that is already gone is not a failure.
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(AmbassadorError::Store(format!(
                "etcd delete failed with {}: {}",
                status,
                String::from_utf8_lossy(&body)
            )));
        }
        Ok(())
    }
}

//! HTTP dispatch with host-pool failover.

use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Request as HttpRequest;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rand::seq::SliceRandom;
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};
use url::form_urlencoded;

use ambassador_common::error::{AmbassadorError, Result};
use ambassador_common::kv::KeyValueStore;
use ambassador_common::properties::PropertyTree;

use crate::handle::{CallRequest, Method};

const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// The currently-known live endpoints for one logical call.
///
/// Shuffled once at creation, then consumed one host at a time: a pool only
/// ever shrinks, so no host is tried twice within one call and failover
/// order is unbiased across calls.
pub struct HostPool {
    hosts: Vec<String>,
    initial: usize,
}

impl HostPool {
    pub fn new(mut hosts: Vec<String>) -> Self {
        hosts.shuffle(&mut rand::thread_rng());
        let initial = hosts.len();
        Self { hosts, initial }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// How many hosts the pool held when it was materialized.
    pub fn initial_len(&self) -> usize {
        self.initial
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Consumes and returns the next host to try.
    pub fn take(&mut self) -> Option<String> {
        self.hosts.pop()
    }
}

/// One logical service call.
///
/// Owns exactly one host pool, materialized from the store on first
/// dispatch and never rebuilt: entries published later are invisible to
/// this instance. `response()` is memoized after the first successful
/// resolution; a failed call is not cached, but a retry only ever consumes
/// hosts the first traversal left untried.
pub struct Transport {
    store: Arc<dyn KeyValueStore>,
    request: CallRequest,
    attempt_timeout: Duration,
    client: Client<HttpConnector, Full<Bytes>>,
    pool: OnceCell<Mutex<HostPool>>,
    cached: OnceCell<Value>,
}

impl Transport {
    pub fn new(store: Arc<dyn KeyValueStore>, request: CallRequest) -> Self {
        Self {
            store,
            request,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            client: Client::builder(TokioExecutor::new()).build_http(),
            pool: OnceCell::new(),
            cached: OnceCell::new(),
        }
    }

    /// Overrides the per-attempt deadline.
    ///
    /// Exceeding it counts as a connectivity failure for pool-exhaustion
    /// purposes, exactly like a refused connection.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Resolves and dispatches the call, memoizing the parsed result.
    pub async fn response(&self) -> Result<Value> {
        self.cached
            .get_or_try_init(|| self.dispatch())
            .await
            .cloned()
    }

    async fn dispatch(&self) -> Result<Value> {
        let pool = self
            .pool
            .get_or_try_init(|| async {
                Ok::<_, AmbassadorError>(Mutex::new(self.resolve_pool().await?))
            })
            .await?;
        let mut pool = pool.lock().await;
        if pool.initial_len() == 0 {
            // Never published, or every entry had expired by the first
            // dispatch. Distinct from a host that resolved but failed the
            // call.
            return Err(AmbassadorError::NoHostsAvailable(
                self.request.base_path.clone(),
            ));
        }
        debug!(
            base = %self.request.base_path,
            hosts = pool.len(),
            "dispatching service call"
        );

        while let Some(host) = pool.take() {
            match self.attempt(&host).await {
                Ok(value) => return Ok(value),
                // A definitive application-level answer: never retried.
                Err(err @ AmbassadorError::Http { .. }) => return Err(err),
                Err(err) if err.is_connectivity() => {
                    warn!(host = %host, error = %err, "host failed, trying next");
                }
                Err(err) => return Err(err),
            }
        }

        Err(AmbassadorError::HostsUnreachable(
            self.request.base_path.clone(),
        ))
    }

    /// Materializes the host pool from the store.
    ///
    /// Only direct leaf entries under the base path are valid targets;
    /// nested keys belong to sub-services and are excluded.
    async fn resolve_pool(&self) -> Result<HostPool> {
        let tree = PropertyTree::new(self.store.clone(), &self.request.base_path);
        let hosts = tree
            .properties()
            .await?
            .iter()
            .filter(|(key, _)| !key.contains('/'))
            .map(|(_, value)| value.clone())
            .collect();
        Ok(HostPool::new(hosts))
    }

    async fn attempt(&self, host: &str) -> Result<Value> {
        let options = &self.request.options;
        let mut url = format!("{}://{}{}", options.protocol, host, self.request.path);

        // GET carries attrs as a query string; everything else as a payload.
        let body = if options.method == Method::Get {
            if let Some(query) = encode_query(&self.request.body)? {
                url.push('?');
                url.push_str(&query);
            }
            Bytes::new()
        } else {
            Bytes::from(serde_json::to_vec(&self.request.body)?)
        };

        let mut builder = HttpRequest::builder()
            .method(options.method.as_str())
            .uri(&url);
        if options.method != Method::Get {
            builder = builder.header("Content-Type", "application/json");
        }
        let http_request = builder
            .body(Full::new(body))
            .map_err(|e| AmbassadorError::Transport(format!("failed to build request: {}", e)))?;

        let response = tokio::time::timeout(self.attempt_timeout, self.client.request(http_request))
            .await
            .map_err(|_| AmbassadorError::Timeout(self.attempt_timeout.as_millis() as u64))?
            .map_err(|e| AmbassadorError::Transport(format!("request to {} failed: {}", host, e)))?;

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| AmbassadorError::Transport(format!("failed to read response: {}", e)))?
            .to_bytes();

        if status.is_success() {
            Ok(parse_body(&bytes))
        } else {
            Err(AmbassadorError::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            })
        }
    }
}

/// Encodes a JSON object as a query string; `null` means no query at all.
fn encode_query(body: &Value) -> Result<Option<String>> {
    let object = match body {
        Value::Null => return Ok(None),
        Value::Object(object) if object.is_empty() => return Ok(None),
        Value::Object(object) => object,
        _ => {
            return Err(AmbassadorError::Transport(
                "GET attributes must be a JSON object".to_string(),
            ))
        }
    };

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in object {
        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        serializer.append_pair(key, &value);
    }
    Ok(Some(serializer.finish()))
}

/// 2xx bodies are parsed as JSON; a non-JSON body comes back as a string.
fn parse_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

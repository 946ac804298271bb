//! The heartbeat publisher loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use ambassador_common::error::Result;
use ambassador_common::kv::KeyValueStore;
use ambassador_common::properties::PropertyTree;

use crate::descriptor::ContainerDescriptor;

pub const DEFAULT_SERVICES_PATH: &str = "/services";

/// Heartbeat timing configuration.
///
/// TTL and period are coupled: republishing every `2*TTL/3` guarantees at
/// least one republish attempt lands before an entry would expire, leaving a
/// one-period grace margin against transient store unavailability.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Time-to-live on every published entry.
    pub ttl: Duration,
    /// Cap for the failure backoff between iterations.
    pub max_backoff: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl PublisherConfig {
    /// The republish period, `2*TTL/3`.
    pub fn period(&self) -> Duration {
        self.ttl * 2 / 3
    }
}

/// Periodically advertises a container's endpoints into the store.
///
/// Each endpoint is written as `<service-name>/<hostname> = "<host>:<port>"`
/// under the services root, with the configured TTL. Replicas of the same
/// service are siblings keyed by hostname; a replica that stops
/// heartbeating simply expires. There is no deregistration path.
pub struct Publisher {
    descriptor: ContainerDescriptor,
    tree: PropertyTree,
    config: PublisherConfig,
}

impl Publisher {
    pub fn new(
        descriptor: ContainerDescriptor,
        store: Arc<dyn KeyValueStore>,
        services_path: &str,
        config: PublisherConfig,
    ) -> Self {
        Self {
            descriptor,
            tree: PropertyTree::new(store, services_path),
            config,
        }
    }

    /// The property tree this publisher writes into.
    pub fn tree(&self) -> &PropertyTree {
        &self.tree
    }

    /// Performs exactly one heartbeat, returning how many services were
    /// written.
    ///
    /// Writes are not atomic across services: a later write may fail after
    /// an earlier one landed, and readers must tolerate the partial state.
    pub async fn publish_once(&self) -> Result<usize> {
        let endpoints = self.descriptor.endpoints().await?;
        let hostname = self.descriptor.hostname();

        let mut published = 0;
        for endpoint in &endpoints {
            let key = format!("{}/{}", endpoint.name, hostname);
            let value = format!("{}:{}", endpoint.host, endpoint.port);
            if self.tree.set(&key, &value, Some(self.config.ttl)).await {
                published += 1;
            }
        }
        Ok(published)
    }

    /// Runs the heartbeat until `shutdown` flips to `true` (or its sender
    /// drops).
    ///
    /// A failed iteration never stops the loop; consecutive failures back
    /// off exponentially (starting from the period, doubling, capped at
    /// `max_backoff`) and a success resets the delay. Cancellation takes
    /// effect between iterations, never mid-write.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.period();
        let mut backoff = period;

        info!(
            path = %self.tree.path(),
            period_secs = period.as_secs(),
            ttl_secs = self.config.ttl.as_secs(),
            "publisher starting"
        );

        loop {
            let delay = match self.publish_once().await {
                Ok(published) => {
                    debug!(services = published, "heartbeat published");
                    backoff = period;
                    period
                }
                Err(e) => {
                    let current = backoff;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                    warn!(error = %e, backoff_secs = current.as_secs(), "heartbeat failed");
                    current
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("publisher stopping");
                    return;
                }
            }
        }
    }

    /// Starts the heartbeat on its own task.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }
}

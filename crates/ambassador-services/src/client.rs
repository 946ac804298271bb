//! Store-backed service client.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use ambassador_common::error::Result;
use ambassador_common::kv::KeyValueStore;

use crate::handle::{CallRequest, ServiceHandle};
use crate::transport::Transport;

/// Ties a services namespace to a coordination store.
///
/// The root handle is created once; service lookups below it are memoized
/// by the handle itself. Each executed call gets its own [`Transport`] and
/// with it a private host pool.
pub struct ServiceClient {
    store: Arc<dyn KeyValueStore>,
    root: Arc<ServiceHandle>,
    attempt_timeout: Option<Duration>,
}

impl ServiceClient {
    /// Creates a client over the given services root, e.g. `/services`.
    pub fn new(store: Arc<dyn KeyValueStore>, root_path: impl AsRef<str>) -> Self {
        Self {
            store,
            root: ServiceHandle::root(root_path),
            attempt_timeout: None,
        }
    }

    /// Sets the per-attempt deadline applied to every dispatched call.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// The root handle of this namespace.
    pub fn root(&self) -> &Arc<ServiceHandle> {
        &self.root
    }

    /// The (memoized) handle for a service name; dots nest.
    pub fn service(&self, name: &str) -> Arc<ServiceHandle> {
        self.root.child(name)
    }

    /// Builds the transport for a described call without dispatching it.
    pub fn transport(&self, request: CallRequest) -> Transport {
        let transport = Transport::new(self.store.clone(), request);
        match self.attempt_timeout {
            Some(timeout) => transport.with_attempt_timeout(timeout),
            None => transport,
        }
    }

    /// Dispatches a described call and returns the parsed response.
    pub async fn execute(&self, request: CallRequest) -> Result<Value> {
        self.transport(request).response().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambassador_common::MemoryStore;

    #[test]
    fn test_service_lookup_is_memoized() {
        let client = ServiceClient::new(Arc::new(MemoryStore::new()), "/services");
        let first = client.service("user");
        let second = client.service("user");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_root_path() {
        let client = ServiceClient::new(Arc::new(MemoryStore::new()), "services");
        assert_eq!(client.root().path(), "/services");
    }
}

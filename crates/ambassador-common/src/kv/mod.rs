//! Coordination store abstraction.
//!
//! The store is a hierarchical key/value service with per-key TTL, consumed
//! through the [`KeyValueStore`] trait. Two implementations are provided:
//! [`etcd::EtcdStore`] speaks the etcd v2 keys API over HTTP, and
//! [`memory::MemoryStore`] keeps everything in process with real TTL expiry.

pub mod etcd;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// A node read back from the store.
///
/// A node is either a directory (has children, no value) or a leaf (has a
/// value, no children). Keys are absolute, slash-delimited paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvNode {
    pub key: String,
    pub value: Option<String>,
    pub dir: bool,
    pub nodes: Vec<KvNode>,
}

impl KvNode {
    /// Creates a leaf node holding a value.
    pub fn leaf(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            dir: false,
            nodes: Vec::new(),
        }
    }

    /// Creates a directory node with the given children.
    pub fn directory(key: impl Into<String>, nodes: Vec<KvNode>) -> Self {
        Self {
            key: key.into(),
            value: None,
            dir: true,
            nodes,
        }
    }
}

/// Generic coordination store client.
///
/// The connection is expected to be process-wide and safe for concurrent use
/// by the publisher loop and any number of in-flight service calls.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads a node. A missing key is `Ok(None)`, not an error.
    ///
    /// With `recursive` set, directory nodes carry their full subtree;
    /// otherwise children are listed one level deep.
    async fn get(&self, key: &str, recursive: bool) -> Result<Option<KvNode>>;

    /// Writes a leaf value, optionally with a time-to-live.
    ///
    /// Repeating a `set` overwrites the value and resets the TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Deletes a key, or a whole subtree with `recursive` set.
    async fn delete(&self, key: &str, recursive: bool) -> Result<()>;
}

/// Normalizes a key to its canonical relative form (no surrounding slashes).
pub(crate) fn normalize_key(key: &str) -> &str {
    key.trim_matches('/')
}

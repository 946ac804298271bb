//! Flattened view of a store subtree.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::warn;

use crate::error::Result;
use crate::kv::{KeyValueStore, KvNode};

/// A property tree scoped to a root path in the store.
///
/// The flat mapping of `relative-key -> value` is built from one recursive
/// store read on first access and memoized for the lifetime of the instance.
/// It is not invalidated automatically: create a new tree (or call
/// [`refresh`](Self::refresh)) to observe store changes. Every key handed
/// out has the root path stripped.
pub struct PropertyTree {
    store: Arc<dyn KeyValueStore>,
    path: String,
    cache: OnceCell<HashMap<String, String>>,
}

impl PropertyTree {
    /// Creates a tree rooted at `path`, e.g. `/services/user`.
    pub fn new(store: Arc<dyn KeyValueStore>, path: impl AsRef<str>) -> Self {
        let path = format!("/{}", path.as_ref().trim_matches('/'));
        Self {
            store,
            path,
            cache: OnceCell::new(),
        }
    }

    /// The root path of this tree.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Point lookup of a single key under the root.
    ///
    /// Goes straight to the store, bypassing the memoized flat view.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let node = self.store.get(&self.full_key(key), false).await?;
        Ok(node.and_then(|node| node.value))
    }

    /// Writes a key under the root, returning whether the write succeeded.
    ///
    /// Store-level failure is reported as `false` rather than an error;
    /// callers that must observe the failure should use the store directly.
    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        match self.store.set(&self.full_key(key), value, ttl).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %self.full_key(key), error = %e, "property write failed");
                false
            }
        }
    }

    /// Deletes a key under the root.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(&self.full_key(key), false).await
    }

    /// The memoized flat mapping of every leaf under the root.
    ///
    /// A root that does not exist in the store yields an empty mapping.
    pub async fn properties(&self) -> Result<&HashMap<String, String>> {
        self.cache.get_or_try_init(|| self.load()).await
    }

    /// Drops the memoized mapping so the next access re-reads the store.
    pub fn refresh(&mut self) {
        self.cache = OnceCell::new();
    }

    /// Copies every property into `target`, transforming keys on the way.
    pub async fn inject_into<F>(&self, target: &mut HashMap<String, String>, transform: F) -> Result<()>
    where
        F: Fn(&str) -> String,
    {
        for (key, value) in self.properties().await? {
            target.insert(transform(key), value.clone());
        }
        Ok(())
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}/{}", self.path, key.trim_matches('/'))
    }

    async fn load(&self) -> Result<HashMap<String, String>> {
        let mut flat = HashMap::new();
        if let Some(node) = self.store.get(&self.path, true).await? {
            self.flatten(&node, &mut flat);
        }
        Ok(flat)
    }

    /// Walks directory nodes, collecting only leaves.
    fn flatten(&self, node: &KvNode, flat: &mut HashMap<String, String>) {
        if node.dir {
            for child in &node.nodes {
                self.flatten(child, flat);
            }
        } else if let Some(value) = &node.value {
            let relative = node
                .key
                .strip_prefix(&self.path)
                .unwrap_or(&node.key)
                .trim_start_matches('/');
            flat.insert(relative.to_string(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryStore;

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = store();
        let tree = PropertyTree::new(store.clone(), "/r");
        assert!(tree.set("a/b", "x", None).await);
        assert!(tree.set("a/c", "y", None).await);

        let fresh = PropertyTree::new(store, "/r");
        let props = fresh.properties().await.unwrap();
        assert_eq!(props.len(), 2);
        assert_eq!(props.get("a/b").map(String::as_str), Some("x"));
        assert_eq!(props.get("a/c").map(String::as_str), Some("y"));
    }

    #[tokio::test]
    async fn test_empty_root_is_empty_mapping() {
        let tree = PropertyTree::new(store(), "/nothing/here");
        assert!(tree.properties().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_point_get() {
        let store = store();
        store.set("/r/mysql/host", "db.local", None).await.unwrap();

        let tree = PropertyTree::new(store, "/r");
        assert_eq!(tree.get("mysql/host").await.unwrap().as_deref(), Some("db.local"));
        assert_eq!(tree.get("mysql/port").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_properties_are_memoized() {
        let store = store();
        store.set("/r/a", "1", None).await.unwrap();

        let mut tree = PropertyTree::new(store.clone(), "/r");
        assert_eq!(tree.properties().await.unwrap().len(), 1);

        store.set("/r/b", "2", None).await.unwrap();
        assert_eq!(tree.properties().await.unwrap().len(), 1);

        tree.refresh();
        assert_eq!(tree.properties().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_inject_into_transforms_keys() {
        let store = store();
        store.set("/properties/shared/mysql/host", "db.local", None).await.unwrap();
        store.set("/properties/shared/mysql/port", "3306", None).await.unwrap();

        let tree = PropertyTree::new(store, "/properties/shared");
        let mut env = HashMap::new();
        tree.inject_into(&mut env, |key| key.replace('/', "_").to_uppercase())
            .await
            .unwrap();

        assert_eq!(env.get("MYSQL_HOST").map(String::as_str), Some("db.local"));
        assert_eq!(env.get("MYSQL_PORT").map(String::as_str), Some("3306"));
    }

    #[tokio::test]
    async fn test_path_normalization() {
        let tree = PropertyTree::new(store(), "services/");
        assert_eq!(tree.path(), "/services");
    }
}

//! In-process store with real TTL expiry.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::Result;
use crate::kv::{normalize_key, KeyValueStore, KvNode};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// Hierarchical in-memory store.
///
/// Entries carry a deadline; expired entries are pruned on every read and
/// are never visible, which gives the same observable TTL behavior as etcd.
/// Uses [`tokio::time::Instant`], so tests running under a paused runtime
/// can drive expiry with `tokio::time::advance`.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots the live (non-expired) entries, pruning expired ones.
    fn live_entries(&self) -> BTreeMap<String, String> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, entry| entry.expires_at.map_or(true, |deadline| deadline > now));
        entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }
}

/// Builds a directory node for `prefix` out of a flat snapshot.
fn build_dir(prefix: &str, entries: &BTreeMap<String, String>, recursive: bool) -> KvNode {
    let dir_prefix = if prefix.is_empty() {
        String::new()
    } else {
        format!("{}/", prefix)
    };

    // First segment below the prefix -> direct leaf value, if any.
    let mut children: BTreeMap<String, Option<String>> = BTreeMap::new();
    for (key, value) in entries.iter().filter(|(key, _)| key.starts_with(&dir_prefix)) {
        let rest = &key[dir_prefix.len()..];
        match rest.split_once('/') {
            None => {
                children.insert(rest.to_string(), Some(value.clone()));
            }
            Some((segment, _)) => {
                children.entry(segment.to_string()).or_insert(None);
            }
        }
    }

    let nodes = children
        .into_iter()
        .map(|(segment, leaf)| {
            let child_key = format!("{}{}", dir_prefix, segment);
            match leaf {
                Some(value) => KvNode::leaf(format!("/{}", child_key), value),
                None if recursive => build_dir(&child_key, entries, true),
                None => KvNode::directory(format!("/{}", child_key), Vec::new()),
            }
        })
        .collect();

    let key = if prefix.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", prefix)
    };
    KvNode::directory(key, nodes)
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str, recursive: bool) -> Result<Option<KvNode>> {
        let key = normalize_key(key);
        let entries = self.live_entries();

        if let Some(value) = entries.get(key) {
            return Ok(Some(KvNode::leaf(format!("/{}", key), value.clone())));
        }

        let dir_prefix = format!("{}/", key);
        let has_children =
            key.is_empty() || entries.keys().any(|entry| entry.starts_with(&dir_prefix));
        if !has_children {
            return Ok(None);
        }

        Ok(Some(build_dir(key, &entries, recursive)))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let key = normalize_key(key).to_string();
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.lock().unwrap().insert(key, entry);
        Ok(())
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<()> {
        let key = normalize_key(key).to_string();
        let mut entries = self.entries.lock().unwrap();
        entries.remove(&key);
        if recursive {
            let dir_prefix = format!("{}/", key);
            entries.retain(|entry, _| !entry.starts_with(&dir_prefix));
        }
        Ok(())
    }
}

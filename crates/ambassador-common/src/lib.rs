//! Ambassador Common Types
//!
//! This crate provides the shared infrastructure for the ambassador sidecar:
//! the error taxonomy, the coordination store abstraction and the property
//! tree used by both the publishing and the consuming side.
//!
//! # Overview
//!
//! The ambassador sidecar advertises the services of the container it runs
//! alongside into a shared, TTL-expiring coordination store, and resolves
//! symbolic service names back out of that store. Everything that touches the
//! store goes through the types in this crate:
//!
//! - **[`KeyValueStore`]**: generic hierarchical key/value store with
//!   per-key TTL, modeled after the etcd keys API
//! - **[`EtcdStore`]**: etcd-backed implementation over HTTP
//! - **[`MemoryStore`]**: in-process implementation with real TTL expiry,
//!   used by tests and single-process setups
//! - **[`PropertyTree`]**: a flattened, memoized view of a store subtree
//!
//! # Key layout
//!
//! Services are advertised under a configurable root (default `/services`)
//! as `<service-name>/<advertiser-hostname> = "<host>:<port>"`, each entry
//! carrying a TTL. An entry that stops being refreshed expires on its own;
//! TTL expiry is the liveness mechanism, there is no explicit deregistration.

pub mod error;
pub mod kv;
pub mod properties;

pub use error::{AmbassadorError, Result};
pub use kv::etcd::EtcdStore;
pub use kv::memory::MemoryStore;
pub use kv::{KeyValueStore, KvNode};
pub use properties::PropertyTree;

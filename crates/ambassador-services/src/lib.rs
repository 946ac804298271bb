//! Ambassador Services
//!
//! The consuming half of the ambassador sidecar: resolve a symbolic service
//! name to a live `host:port` pool out of the coordination store and issue
//! an HTTP call against it, failing over across the pool.
//!
//! # Overview
//!
//! A [`ServiceHandle`] is a typed path builder: composing handles and verbs
//! is pure string work, no I/O. A verb produces a [`CallRequest`] which a
//! [`Transport`] dispatches: resolve the host pool under the handle's path,
//! shuffle it once, then try hosts sequentially until one answers.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use ambassador_services::ServiceClient;
//! # use ambassador_common::EtcdStore;
//! # use serde_json::json;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(EtcdStore::new("http://127.0.0.1:2379"));
//! let client = ServiceClient::new(store, "/services");
//!
//! // GET against a random live replica of the `user` service.
//! let user = client.service("user");
//! let profile = client.execute(user.find("12345", json!({}))).await?;
//!
//! // POST to a nested service, then a contextual update.
//! let admin = client.service("internal.admin");
//! client.execute(admin.create(json!({"name": "root"}))).await?;
//! client.execute(admin.context(["12345"]).update(json!({"active": true}))).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod handle;
pub mod transport;

pub use client::ServiceClient;
pub use handle::{CallOptions, CallRequest, Method, ServiceContext, ServiceHandle};
pub use transport::{HostPool, Transport};

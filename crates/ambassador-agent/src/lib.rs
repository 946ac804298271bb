//! Ambassador Agent
//!
//! The publishing half of the ambassador sidecar: inspect the container the
//! agent runs alongside, derive its advertisable service endpoints from
//! `ambassador.*` labels, and heartbeat them into the coordination store
//! with a TTL so that entries of a dead replica expire on their own.
//!
//! # Components
//!
//! - [`ContainerInspector`] / [`DockerInspector`] - read-only container
//!   metadata (labels, environment, published ports)
//! - [`ContainerDescriptor`] - turns labels into `{service -> port}` pairs
//! - [`Publisher`] - the periodic heartbeat loop

pub mod descriptor;
pub mod inspector;
pub mod publisher;

pub use descriptor::{ContainerDescriptor, LabelValue, ServiceEndpoint};
pub use inspector::{ContainerInfo, ContainerInspector, DockerInspector};
pub use publisher::{Publisher, PublisherConfig};

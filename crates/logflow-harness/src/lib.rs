//! Test harness for a log-forwarding pipeline on Kubernetes
//!
//! A scenario builds a [`Framework`], provisions generators, receivers, and
//! pipeline configuration through it, waits for the stack with the
//! readiness predicates, asserts on a [`LogStore`], and finally runs
//! [`Framework::cleanup`]. All cluster access goes through
//! [`ClusterClient`], so everything but the scenarios themselves runs
//! against a mock.

#![deny(missing_docs)]

pub mod cleanup;
pub mod client;
pub mod crd;
pub mod framework;
pub mod logstore;
pub mod manifests;
pub mod readiness;
pub mod resource;

pub use cleanup::{CleanupAction, CleanupPipeline, CleanupReport};
pub use client::{ClusterClient, KubeClusterClient};
pub use crd::ComponentType;
pub use framework::{ForwardReceiver, Framework, ReceiverTls};
pub use logstore::{LogCategory, LogStore};
pub use resource::{ResourceKind, ResourceRef};

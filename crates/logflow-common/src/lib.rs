//! Common plumbing for logflow: errors, polling, configuration, and clients
//!
//! The harness crate builds its readiness predicates, log stores, and cleanup
//! pipeline on top of the pieces here. Nothing in this crate knows about the
//! logging pipeline itself.

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod kube_utils;
pub mod poll;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace the logging operator and its collector run in
pub const DEFAULT_LOGGING_NAMESPACE: &str = "openshift-logging";

/// Field manager name used for every object the harness creates
pub const FIELD_MANAGER: &str = "logflow-harness";

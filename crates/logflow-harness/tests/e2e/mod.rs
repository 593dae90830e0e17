//! Cluster-backed scenarios for the log-forwarding pipeline
//!
//! These need a cluster with the logging operator installed and are only
//! compiled with the `cluster-e2e` feature:
//!
//! ```bash
//! KUBECONFIG=~/.kube/config \
//! cargo test -p logflow-harness --features cluster-e2e --test e2e -- --nocapture
//! ```
//!
//! Secured-receiver scenarios also need `LOGFLOW_RECEIVER_CERTS_DIR` pointing
//! at a directory with `tls.crt`, `tls.key`, and `ca-bundle.crt`; they are
//! skipped without it.

mod context;
mod forward_receiver_e2e;

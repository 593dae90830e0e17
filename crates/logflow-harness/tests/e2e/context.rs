//! Shared setup for cluster scenarios

#![cfg(feature = "cluster-e2e")]

use std::path::PathBuf;

use logflow_common::config::HarnessConfig;
use logflow_common::telemetry::init_test_logging;
use logflow_harness::{Framework, ReceiverTls};
use tracing::info;

/// Directory holding the secured receiver's certificate material
pub const CERTS_DIR_ENV: &str = "LOGFLOW_RECEIVER_CERTS_DIR";

/// Install test logging and connect a framework configured from the environment
pub async fn init_e2e_test() -> Result<Framework, String> {
    init_test_logging();
    Framework::connect(HarnessConfig::from_env())
        .await
        .map_err(|e| format!("failed to connect: {e}"))
}

/// Certificates for a secured receiver, or `None` when not configured
pub async fn receiver_tls() -> Result<Option<ReceiverTls>, String> {
    let Some(dir) = std::env::var_os(CERTS_DIR_ENV).map(PathBuf::from) else {
        info!("{CERTS_DIR_ENV} not set, skipping secured scenario");
        return Ok(None);
    };
    ReceiverTls::from_dir(&dir)
        .await
        .map(Some)
        .map_err(|e| e.to_string())
}

//! Forwarding all log categories to a third-party forward receiver
//!
//! ```bash
//! cargo test -p logflow-harness --features cluster-e2e --test e2e forward_receiver -- --nocapture
//! ```

#![cfg(feature = "cluster-e2e")]

use std::time::Duration;

use logflow_common::telemetry::init_test_logging;
use logflow_harness::crd::{ClusterLogForwarder, ClusterLogForwarderSpec, INSTANCE_NAME};
use logflow_harness::{
    ComponentType, ForwardReceiver, Framework, LogCategory, LogStore, ReceiverTls,
};
use tracing::{info, warn};

use super::context::{init_e2e_test, receiver_tls};

const E2E_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// How long a secured receiver must stay empty before the forwarder exists
const INITIAL_WAIT_FOR_LOGS: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug)]
enum Variant {
    Unsecured,
    Secured,
    SecuredWithLabels,
}

#[tokio::test]
async fn test_forward_receiver_unsecured() {
    run_scenario(Variant::Unsecured).await;
}

#[tokio::test]
async fn test_forward_receiver_secured() {
    run_scenario(Variant::Secured).await;
}

#[tokio::test]
async fn test_forward_receiver_secured_with_pipeline_labels() {
    run_scenario(Variant::SecuredWithLabels).await;
}

impl Variant {
    fn secured(self) -> bool {
        !matches!(self, Variant::Unsecured)
    }

    fn pipeline_labels(self) -> bool {
        matches!(self, Variant::SecuredWithLabels)
    }
}

async fn run_scenario(variant: Variant) {
    init_test_logging();
    let tls = if variant.secured() {
        match receiver_tls().await {
            Ok(Some(tls)) => Some(tls),
            Ok(None) => {
                warn!(?variant, "TEST SKIPPED: no receiver certificates configured");
                return;
            }
            Err(e) => panic!("{variant:?} failed to load receiver certificates: {e}"),
        }
    } else {
        None
    };

    let mut fw = match init_e2e_test().await {
        Ok(fw) => fw,
        Err(e) => panic!("{variant:?} setup failed: {e}"),
    };
    info!(?variant, "starting forward receiver scenario");

    let result = tokio::time::timeout(E2E_TIMEOUT, run(&mut fw, variant, tls)).await;
    let report = fw.cleanup().await;
    info!(?report, "cleanup finished");

    match result {
        Ok(Ok(())) => info!(?variant, "TEST PASSED"),
        Ok(Err(e)) => panic!("{variant:?} failed: {e}"),
        Err(_) => panic!("{variant:?} timed out after {E2E_TIMEOUT:?}"),
    }
}

async fn run(
    fw: &mut Framework,
    variant: Variant,
    tls: Option<ReceiverTls>,
) -> Result<(), String> {
    fw.deploy_log_generator()
        .await
        .map_err(|e| format!("deploy log generator: {e}"))?;

    let receiver = fw
        .deploy_forward_receiver(tls)
        .await
        .map_err(|e| format!("deploy forward receiver: {e}"))?;
    let store = fw
        .log_store(&receiver.name)
        .ok_or_else(|| format!("no log store registered for {}", receiver.name))?;

    if receiver.secured {
        expect_no_logs_yet(store.as_ref()).await?;
    }

    fw.setup_cluster_logging(&[ComponentType::Collector])
        .await
        .map_err(|e| format!("create ClusterLogging: {e}"))?;
    fw.create_cluster_log_forwarder(forwarder(&receiver, variant.pipeline_labels()))
        .await
        .map_err(|e| format!("create ClusterLogForwarder: {e}"))?;
    fw.wait_for(ComponentType::Collector)
        .await
        .map_err(|e| format!("collector not ready: {e}"))?;

    let wait = fw.config().log_wait_timeout;
    expect_logs(store.as_ref(), wait).await
}

fn forwarder(receiver: &ForwardReceiver, labels: bool) -> ClusterLogForwarder {
    ClusterLogForwarder::new(
        INSTANCE_NAME,
        ClusterLogForwarderSpec::route_all_to(receiver.output(), labels),
    )
}

async fn expect_no_logs_yet(store: &dyn LogStore) -> Result<(), String> {
    for category in LogCategory::ALL {
        match store.has_logs(category, INITIAL_WAIT_FOR_LOGS).await {
            Ok(false) => info!(%category, "no logs before the forwarder existed"),
            Ok(true) => return Err(format!("found {category} logs before the forwarder existed")),
            Err(e) => return Err(format!("querying {category} logs: {e}")),
        }
    }
    Ok(())
}

async fn expect_logs(store: &dyn LogStore, wait: Duration) -> Result<(), String> {
    let checks = [
        ("infrastructure", store.has_infrastructure_logs(wait).await),
        ("application", store.has_application_logs(wait).await),
        ("audit", store.has_audit_logs(wait).await),
    ];
    for (category, found) in checks {
        match found {
            Ok(true) => info!(category, "found stored logs"),
            Ok(false) => return Err(format!("expected to find stored {category} logs")),
            Err(e) => return Err(format!("querying {category} logs: {e}")),
        }
    }
    Ok(())
}

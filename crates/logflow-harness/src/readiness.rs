//! Readiness predicates
//!
//! Each predicate is one observation of cluster state mapped to the poller's
//! tri-state: `Ok(true)` done, `Ok(false)` keep waiting, `Err` abort. A
//! missing object is always "keep waiting"; it may not have propagated yet.
//!
//! Predicates are issued sequentially by one scenario. The debounce state in
//! [`ReadinessCounter`] is deliberately `!Sync` and lives only as long as one
//! `wait_for_node_pinned_workload` call.

use std::cell::Cell;
use std::time::Duration;

use logflow_common::poll::poll_until;
use logflow_common::Error;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::client::{ClusterClient, PodSummary};
use crate::resource::{ReplicaWorkload, ResourceKind, ResourceRef};

/// Consecutive positive observations required before the collector counts as ready
pub const COLLECTOR_READY_THRESHOLD: u32 = 5;

/// Desired and observed replica counts of a workload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplicaCounts {
    /// `spec.replicas`, defaulting to 1 like the API server does
    pub desired: i64,
    /// The workload's observed field, 0 when not reported yet
    pub observed: i64,
}

impl ReplicaCounts {
    /// Read the counts from a raw workload object
    pub fn from_object(obj: &Value, workload: ReplicaWorkload) -> Self {
        let desired = obj
            .pointer("/spec/replicas")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        let observed = obj
            .get("status")
            .and_then(|s| s.get(workload.observed_field()))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Self { desired, observed }
    }

    /// Converged when the observed count equals the desired count exactly
    pub fn converged(&self) -> bool {
        self.observed == self.desired
    }
}

/// One observation of a replica-scaled or ordinal workload
pub async fn replicas_converged(
    client: &dyn ClusterClient,
    workload: ReplicaWorkload,
    namespace: &str,
    name: &str,
) -> Result<bool, Error> {
    let resource = ResourceRef::namespaced(workload.kind(), namespace, name);
    let obj = match client.get(&resource).await {
        Ok(Some(obj)) => obj,
        Ok(None) => {
            trace!(resource = %resource, "not found yet");
            return Ok(false);
        }
        Err(e) if e.is_not_found() => return Ok(false),
        Err(e) => return Err(e),
    };

    let counts = ReplicaCounts::from_object(&obj, workload);
    trace!(
        resource = %resource,
        desired = counts.desired,
        observed = counts.observed,
        "replica counts"
    );
    Ok(counts.converged())
}

/// Wait until a Deployment or StatefulSet reports all desired replicas
pub async fn wait_for_replicas(
    client: &dyn ClusterClient,
    workload: ReplicaWorkload,
    namespace: &str,
    name: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<(), Error> {
    let description = format!("{} {namespace}/{name} replicas", workload.kind());
    debug!(%description, "waiting");
    poll_until(&description, interval, timeout, move || {
        replicas_converged(client, workload, namespace, name)
    })
    .await
}

/// Consecutive-success counter for a debounced predicate
///
/// Not shareable across threads; one counter belongs to one wait.
#[derive(Debug)]
pub struct ReadinessCounter {
    threshold: u32,
    streak: Cell<u32>,
}

impl ReadinessCounter {
    /// A fresh counter that succeeds after `threshold` consecutive positives
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            streak: Cell::new(0),
        }
    }

    /// Record one observation; returns true once the streak reaches the threshold.
    ///
    /// A negative observation resets the streak regardless of its length.
    pub fn observe(&self, ready: bool) -> bool {
        if !ready {
            self.reset();
            return false;
        }
        let streak = self.streak.get().saturating_add(1);
        self.streak.set(streak);
        streak >= self.threshold
    }

    /// Forget the current streak
    pub fn reset(&self) {
        self.streak.set(0);
    }

    /// Length of the current run of positive observations
    pub fn streak(&self) -> u32 {
        self.streak.get()
    }
}

/// Read `status.numberReady` from a node-pinned workload.
///
/// Accepts a JSON number or a numeric string; anything else is a
/// serialization error.
pub fn parse_number_ready(obj: &Value) -> Result<i64, Error> {
    let field = obj
        .pointer("/status/numberReady")
        .ok_or_else(|| Error::serialization_for("DaemonSet", "status.numberReady missing"))?;

    match field {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| {
        Error::serialization_for(
            "DaemonSet",
            format!("status.numberReady is not an integer: {field}"),
        )
    })
}

/// One debounced observation of a node-pinned workload.
///
/// Fetch errors, absence, and unparsable status reset the streak and keep
/// the wait going; only `numberReady > 0` extends it.
pub async fn node_pinned_ready(
    client: &dyn ClusterClient,
    counter: &ReadinessCounter,
    namespace: &str,
    name: &str,
) -> Result<bool, Error> {
    let resource = ResourceRef::namespaced(ResourceKind::DaemonSet, namespace, name);
    let obj = match client.get(&resource).await {
        Ok(Some(obj)) => obj,
        Ok(None) => {
            counter.reset();
            trace!(resource = %resource, "not found yet");
            return Ok(false);
        }
        Err(e) => {
            counter.reset();
            warn!(resource = %resource, error = %e, "failed to fetch, retrying");
            return Ok(false);
        }
    };

    match parse_number_ready(&obj) {
        Ok(ready) => {
            let done = counter.observe(ready > 0);
            trace!(
                resource = %resource,
                number_ready = ready,
                streak = counter.streak(),
                "observed"
            );
            Ok(done)
        }
        Err(e) => {
            counter.reset();
            debug!(resource = %resource, error = %e, "unparsable status, retrying");
            Ok(false)
        }
    }
}

/// Wait until a node-pinned workload has reported ready instances for
/// `threshold` consecutive polls.
///
/// A crash-looping instance makes `numberReady` flicker above zero between
/// restarts; requiring a run of positives filters that out at the cost of
/// up to `threshold * interval` extra latency.
pub async fn wait_for_node_pinned_workload(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
    threshold: u32,
    interval: Duration,
    timeout: Duration,
) -> Result<(), Error> {
    let counter = ReadinessCounter::new(threshold);
    let counter = &counter;
    let description =
        format!("DaemonSet {namespace}/{name} to be ready {threshold} times in a row");
    debug!(%description, "waiting");
    poll_until(&description, interval, timeout, move || {
        node_pinned_ready(client, counter, namespace, name)
    })
    .await
}

/// One observation of the store pods: every container of every matching pod ready.
///
/// No matching pods yet is "keep waiting".
pub async fn store_pods_ready(
    client: &dyn ClusterClient,
    namespace: &str,
    selector: &str,
) -> Result<bool, Error> {
    match client.list_pods(namespace, selector).await {
        Ok(pods) if pods.is_empty() => {
            debug!(namespace, selector, "no pods found yet");
            Ok(false)
        }
        Ok(pods) => Ok(pods.iter().all(PodSummary::all_containers_ready)),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Wait until every pod matching `selector` has all containers ready
pub async fn wait_for_store_pods(
    client: &dyn ClusterClient,
    namespace: &str,
    selector: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<(), Error> {
    let description = format!("pods `{selector}` in {namespace} to be ready");
    poll_until(&description, interval, timeout, move || {
        store_pods_ready(client, namespace, selector)
    })
    .await
}

/// One observation of teardown: done when nothing matches `selector`.
///
/// An empty list is success even if nothing ever matched; this checks that
/// nothing is visible, not that anything terminated cleanly.
pub async fn pods_drained(
    client: &dyn ClusterClient,
    namespace: &str,
    selector: &str,
) -> Result<bool, Error> {
    match client.list_pods(namespace, selector).await {
        Ok(pods) if pods.is_empty() => {
            debug!(namespace, selector, "no pods left");
            Ok(true)
        }
        Ok(pods) => {
            debug!(namespace, selector, remaining = pods.len(), "pods still present");
            Ok(false)
        }
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Wait until no pod matches `selector`
pub async fn wait_for_pods_drained(
    client: &dyn ClusterClient,
    namespace: &str,
    selector: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<(), Error> {
    let description = format!("pods `{selector}` in {namespace} to be gone");
    poll_until(&description, interval, timeout, move || {
        pods_drained(client, namespace, selector)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    const INTERVAL: Duration = Duration::from_secs(1);
    const TIMEOUT: Duration = Duration::from_secs(60);

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {code}"),
            reason: "Test".to_string(),
            code,
        }))
    }

    fn daemonset(number_ready: Value) -> Value {
        json!({ "status": { "numberReady": number_ready } })
    }

    fn deployment(replicas: Option<i64>, available: Option<i64>) -> Value {
        let mut obj = json!({ "spec": {}, "status": {} });
        if let Some(r) = replicas {
            obj["spec"]["replicas"] = json!(r);
        }
        if let Some(a) = available {
            obj["status"]["availableReplicas"] = json!(a);
        }
        obj
    }

    /// Mock whose `get` replays `responses` in order
    fn replaying(responses: Vec<Result<Option<Value>, Error>>) -> MockClusterClient {
        let expected = responses.len();
        let mut queue = VecDeque::from(responses);
        let mut mock = MockClusterClient::new();
        mock.expect_get()
            .times(expected)
            .returning(move |_| {
                queue
                    .pop_front()
                    .expect("predicate polled more often than expected")
            });
        mock
    }

    // ==========================================================================
    // Debounce
    // ==========================================================================

    #[test]
    fn counter_requires_consecutive_positives() {
        let counter = ReadinessCounter::new(3);
        assert!(!counter.observe(true));
        assert!(!counter.observe(true));
        assert!(counter.observe(true));
    }

    #[test]
    fn single_negative_resets_any_streak() {
        let counter = ReadinessCounter::new(5);
        for _ in 0..4 {
            counter.observe(true);
        }
        assert_eq!(counter.streak(), 4);
        assert!(!counter.observe(false));
        assert_eq!(counter.streak(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn flapping_collector_succeeds_only_after_a_fresh_run() {
        let observations = [1, 1, 1, 1, 0, 1, 1, 1, 1, 1];
        let client = replaying(
            observations
                .iter()
                .map(|n| Ok(Some(daemonset(json!(n)))))
                .collect(),
        );

        let start = Instant::now();
        wait_for_node_pinned_workload(
            &client,
            "openshift-logging",
            "fluentd",
            COLLECTOR_READY_THRESHOLD,
            INTERVAL,
            TIMEOUT,
        )
        .await
        .unwrap();

        // Ten observations, nine sleeps between them
        assert_eq!(start.elapsed(), INTERVAL * 9);
    }

    #[tokio::test(start_paused = true)]
    async fn steady_collector_succeeds_on_the_fifth_observation() {
        let client = replaying((0..5).map(|_| Ok(Some(daemonset(json!(2))))).collect());
        wait_for_node_pinned_workload(&client, "ns", "fluentd", 5, INTERVAL, TIMEOUT)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn parse_failure_resets_the_streak_and_keeps_waiting() {
        let mut responses: Vec<_> = (0..4).map(|_| Ok(Some(daemonset(json!(1))))).collect();
        responses.push(Ok(Some(daemonset(json!("not-a-number")))));
        responses.extend((0..5).map(|_| Ok(Some(daemonset(json!("3"))))));
        let client = replaying(responses);

        wait_for_node_pinned_workload(&client, "ns", "fluentd", 5, INTERVAL, TIMEOUT)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_errors_and_absence_reset_without_aborting() {
        let mut responses: Vec<_> = (0..2).map(|_| Ok(Some(daemonset(json!(1))))).collect();
        responses.push(Err(api_error(500)));
        responses.push(Ok(None));
        responses.extend((0..2).map(|_| Ok(Some(daemonset(json!(1))))));
        let client = replaying(responses);

        // Threshold 3 is never reached: the streak restarts after the error
        // and the budget covers exactly six observations.
        let budget = Duration::from_millis(5500);
        let err = wait_for_node_pinned_workload(&client, "ns", "fluentd", 3, INTERVAL, budget)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn each_wait_starts_with_a_fresh_counter() {
        // First wait sees four positives and times out
        let client = replaying((0..4).map(|_| Ok(Some(daemonset(json!(1))))).collect());
        let err = wait_for_node_pinned_workload(&client, "ns", "fluentd", 5, INTERVAL, INTERVAL * 3)
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        // A second wait must not inherit that streak
        let client = replaying((0..5).map(|_| Ok(Some(daemonset(json!(1))))).collect());
        let start = Instant::now();
        wait_for_node_pinned_workload(&client, "ns", "fluentd", 5, INTERVAL, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(start.elapsed(), INTERVAL * 4);
    }

    #[test]
    fn number_ready_accepts_numbers_and_numeric_strings() {
        assert_eq!(parse_number_ready(&daemonset(json!(3))).unwrap(), 3);
        assert_eq!(parse_number_ready(&daemonset(json!(" 2 "))).unwrap(), 2);
        assert!(parse_number_ready(&daemonset(json!("two"))).is_err());
        assert!(parse_number_ready(&json!({ "status": {} })).is_err());
    }

    // ==========================================================================
    // Replica convergence
    // ==========================================================================

    #[test]
    fn replica_counts_default_like_the_api_server() {
        let counts =
            ReplicaCounts::from_object(&deployment(None, None), ReplicaWorkload::Deployment);
        assert_eq!(counts, ReplicaCounts { desired: 1, observed: 0 });
        assert!(!counts.converged());
    }

    #[test]
    fn statefulsets_read_ready_replicas() {
        let obj = json!({
            "spec": { "replicas": 3 },
            "status": { "readyReplicas": 3, "availableReplicas": 1 }
        });
        assert!(ReplicaCounts::from_object(&obj, ReplicaWorkload::StatefulSet).converged());
        assert!(!ReplicaCounts::from_object(&obj, ReplicaWorkload::Deployment).converged());
    }

    #[tokio::test]
    async fn not_found_is_not_done() {
        let client = replaying(vec![Ok(None)]);
        let done = replicas_converged(&client, ReplicaWorkload::Deployment, "ns", "kibana")
            .await
            .unwrap();
        assert!(!done);

        let client = replaying(vec![Err(api_error(404))]);
        let done = replicas_converged(&client, ReplicaWorkload::Deployment, "ns", "kibana")
            .await
            .unwrap();
        assert!(!done);
    }

    #[tokio::test]
    async fn exact_match_is_done() {
        let client = replaying(vec![
            Ok(Some(deployment(Some(2), Some(1)))),
            Ok(Some(deployment(Some(2), Some(2)))),
            Ok(Some(deployment(Some(2), Some(3)))),
        ]);
        let mut results = Vec::new();
        for _ in 0..3 {
            results.push(
                replicas_converged(&client, ReplicaWorkload::Deployment, "ns", "kibana")
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(results, [false, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn other_fetch_errors_abort_the_wait() {
        let client = replaying(vec![Ok(None), Err(api_error(403))]);
        let workload = ReplicaWorkload::Deployment;
        let err = wait_for_replicas(&client, workload, "ns", "kibana", INTERVAL, TIMEOUT)
            .await
            .unwrap_err();
        assert!(!err.is_timeout());
        assert!(!err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_replicas_names_the_resource_on_timeout() {
        let mut mock = MockClusterClient::new();
        mock.expect_get()
            .returning(|_| Ok(Some(deployment(Some(1), Some(0)))));

        let workload = ReplicaWorkload::StatefulSet;
        let err = wait_for_replicas(&mock, workload, "ns", "es", INTERVAL, INTERVAL * 3)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("StatefulSet ns/es"));
    }

    // ==========================================================================
    // Pod-list predicates
    // ==========================================================================

    fn pod(name: &str, ready: &[bool]) -> PodSummary {
        PodSummary {
            name: name.to_string(),
            containers_ready: ready.to_vec(),
        }
    }

    #[tokio::test]
    async fn drained_when_nothing_matches() {
        let mut mock = MockClusterClient::new();
        mock.expect_list_pods()
            .withf(|ns, selector| ns == "openshift-logging" && selector == "component in (fluentd)")
            .times(1)
            .returning(|_, _| Ok(vec![]));
        assert!(pods_drained(&mock, "openshift-logging", "component in (fluentd)")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn not_drained_while_pods_remain_or_on_not_found() {
        let mut mock = MockClusterClient::new();
        mock.expect_list_pods()
            .times(1)
            .returning(|_, _| Ok(vec![pod("fluentd-abc", &[true])]));
        assert!(!pods_drained(&mock, "ns", "component=fluentd").await.unwrap());

        let mut mock = MockClusterClient::new();
        mock.expect_list_pods().times(1).returning(|_, _| Err(api_error(404)));
        assert!(!pods_drained(&mock, "ns", "component=fluentd").await.unwrap());
    }

    #[tokio::test]
    async fn store_pods_need_every_container_ready() {
        let mut mock = MockClusterClient::new();
        let mut rounds = VecDeque::from(vec![
            vec![],
            vec![pod("es-0", &[true, false])],
            vec![pod("es-0", &[true, true]), pod("es-1", &[true])],
        ]);
        mock.expect_list_pods()
            .times(3)
            .returning(move |_, _| Ok(rounds.pop_front().unwrap_or_default()));

        let mut results = Vec::new();
        for _ in 0..3 {
            results.push(store_pods_ready(&mock, "ns", "component=elasticsearch").await.unwrap());
        }
        assert_eq!(results, [false, false, true]);
    }

    #[tokio::test]
    async fn store_pod_list_failures_are_fatal() {
        let mut mock = MockClusterClient::new();
        mock.expect_list_pods().returning(|_, _| Err(api_error(401)));
        assert!(store_pods_ready(&mock, "ns", "component=elasticsearch").await.is_err());
    }
}

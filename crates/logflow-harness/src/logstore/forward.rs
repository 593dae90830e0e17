//! Log store backed by a forward-protocol receiver
//!
//! The receiver buffers each category to `/tmp/<key>.logs*` inside its pod,
//! so every query is an exec into that pod.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use logflow_common::poll::DEFAULT_POLL_INTERVAL;
use logflow_common::Error;
use tracing::{debug, trace};

use super::{present_within, LogCategory, LogStore};
use crate::client::{ClusterClient, ExecTarget};

/// Port the receiver listens on
pub const FORWARD_PORT: u16 = 24224;

/// Container inside the receiver pod that holds the buffers
pub const RECEIVER_CONTAINER: &str = "fluent-receiver";

const BUFFER_DIR: &str = "/tmp";

/// Queries a receiver deployed by the harness
pub struct ForwardReceiverLogStore {
    client: Arc<dyn ClusterClient>,
    name: String,
    namespace: String,
    interval: Duration,
}

impl ForwardReceiverLogStore {
    /// A store for the receiver `name` in `namespace`; its pods carry `component=<name>`
    pub fn new(
        client: Arc<dyn ClusterClient>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            client,
            name: name.into(),
            namespace: namespace.into(),
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the interval between presence checks
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The receiver pod, `None` while no pod matches the selector yet
    async fn find_receiver_pod(&self) -> Result<Option<ExecTarget>, Error> {
        let selector = format!("component={}", self.name);
        let pod = self
            .client
            .list_pods(&self.namespace, &selector)
            .await?
            .into_iter()
            .next();
        if pod.is_none() {
            trace!(%selector, namespace = %self.namespace, "no receiver pod yet");
        }
        Ok(pod.map(|pod| ExecTarget::new(&self.namespace, pod.name, RECEIVER_CONTAINER)))
    }

    async fn receiver_pod(&self) -> Result<ExecTarget, Error> {
        self.find_receiver_pod().await?.ok_or_else(|| {
            Error::query(
                "forward-receiver",
                format!("no pod matching component={} in {}", self.name, self.namespace),
            )
        })
    }

    async fn shell_on(&self, target: &ExecTarget, script: String) -> Result<String, Error> {
        trace!(pod = %target.pod, %script, "querying receiver");
        self.client
            .exec(target, vec!["sh".to_string(), "-c".to_string(), script])
            .await
    }

    async fn shell(&self, script: String) -> Result<String, Error> {
        let target = self.receiver_pod().await?;
        self.shell_on(&target, script).await
    }

    /// Like [`Self::shell`], but `None` while the receiver pod is not visible
    async fn try_shell(&self, script: String) -> Result<Option<String>, Error> {
        match self.find_receiver_pod().await? {
            Some(target) => self.shell_on(&target, script).await.map(Some),
            None => Ok(None),
        }
    }

    /// One look at the buffer files for `category`
    async fn has_buffers(&self, category: LogCategory) -> Result<bool, Error> {
        let script = format!("ls {BUFFER_DIR}/{}.logs* 2>/dev/null | wc -l", category.key());
        let Some(out) = self.try_shell(script).await? else {
            return Ok(false);
        };
        match out.trim().parse::<u64>() {
            Ok(files) => Ok(files > 0),
            Err(_) => {
                debug!(output = %out.trim(), "unexpected file count, retrying");
                Ok(false)
            }
        }
    }

    async fn read_buffers(&self, category: LogCategory) -> Result<String, Error> {
        let script = format!("cat {BUFFER_DIR}/{}.logs* 2>/dev/null || true", category.key());
        self.shell(script).await
    }
}

#[async_trait]
impl LogStore for ForwardReceiverLogStore {
    async fn has_logs(&self, category: LogCategory, wait: Duration) -> Result<bool, Error> {
        let description = format!("{category} logs in {}", self.name);
        let found = present_within(&description, self.interval, wait, || {
            self.has_buffers(category)
        })
        .await?;
        debug!(receiver = %self.name, %category, found, "presence check finished");
        Ok(found)
    }

    async fn application_logs(&self, wait: Duration) -> Result<Vec<serde_json::Value>, Error> {
        if !self.has_logs(LogCategory::Application, wait).await? {
            return Ok(Vec::new());
        }
        let raw = self.read_buffers(LogCategory::Application).await?;
        Ok(parse_records(&raw))
    }

    async fn grep_logs(&self, expr: &str, wait: Duration) -> Result<String, Error> {
        let script = format!(
            "grep -h -- {} {BUFFER_DIR}/*.logs* 2>/dev/null || true",
            shell_escape::escape(expr.into())
        );
        let matched = OnceLock::new();
        let matched_ref = &matched;
        let script = script.as_str();
        let description = format!("`{expr}` in {}", self.name);

        let found = present_within(&description, self.interval, wait, move || async move {
            let Some(out) = self.try_shell(script.to_string()).await? else {
                return Ok(false);
            };
            if out.trim().is_empty() {
                return Ok(false);
            }
            let _ = matched_ref.set(out);
            Ok(true)
        })
        .await?;

        if !found {
            debug!(receiver = %self.name, expr, "no match within wait");
        }
        Ok(matched.into_inner().unwrap_or_default())
    }

    async fn retrieve_logs(&self) -> Result<BTreeMap<String, String>, Error> {
        let listing = self
            .shell(format!("ls {BUFFER_DIR}/*.logs* 2>/dev/null || true"))
            .await?;

        let mut logs = BTreeMap::new();
        for file in listing.split_whitespace() {
            let script = format!("cat {}", shell_escape::escape(file.into()));
            let content = self.shell(script).await?;
            logs.insert(file.to_string(), content);
        }
        Ok(logs)
    }

    fn cluster_local_endpoint(&self) -> String {
        format!("tcp://{}.{}.svc:{FORWARD_PORT}", self.name, self.namespace)
    }
}

/// One JSON record per line; anything else is skipped
fn parse_records(raw: &str) -> Vec<serde_json::Value> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(record) => Some(record),
            Err(e) => {
                trace!(error = %e, "skipping non-JSON line");
                None
            }
        })
        .collect()
}

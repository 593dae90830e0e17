//! Log store verification
//!
//! A [`LogStore`] answers "did records of this category arrive?" for one
//! destination. Backends differ only in how they query; the scenarios use
//! the trait.

mod elasticsearch;
mod forward;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use logflow_common::poll::poll_until;
use logflow_common::Error;

#[cfg(test)]
use mockall::automock;

pub use elasticsearch::{ElasticLogStore, ELASTICSEARCH_SELECTOR};
pub use forward::{ForwardReceiverLogStore, FORWARD_PORT, RECEIVER_CONTAINER};

/// Classes of log records the pipeline routes separately
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// Container logs from user workloads
    Application,
    /// Node and platform logs
    Infrastructure,
    /// Audit logs
    Audit,
}

impl LogCategory {
    /// All categories, in pipeline order
    pub const ALL: [LogCategory; 3] = [Self::Application, Self::Infrastructure, Self::Audit];

    /// Short key stores use to file records of this category
    pub fn key(self) -> &'static str {
        match self {
            Self::Application => "app",
            Self::Infrastructure => "infra",
            Self::Audit => "audit",
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Application => "application",
            Self::Infrastructure => "infrastructure",
            Self::Audit => "audit",
        })
    }
}

/// Read-only view of one log destination
///
/// Presence checks poll within `wait` and stop at the first observation of
/// a record. `Ok(false)` means nothing arrived in time, which is different
/// from a failed query (`Err`).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Whether records of `category` appear within `wait`
    async fn has_logs(&self, category: LogCategory, wait: Duration) -> Result<bool, Error>;

    /// Whether application records appear within `wait`
    async fn has_application_logs(&self, wait: Duration) -> Result<bool, Error> {
        self.has_logs(LogCategory::Application, wait).await
    }

    /// Whether infrastructure records appear within `wait`
    async fn has_infrastructure_logs(&self, wait: Duration) -> Result<bool, Error> {
        self.has_logs(LogCategory::Infrastructure, wait).await
    }

    /// Whether audit records appear within `wait`
    async fn has_audit_logs(&self, wait: Duration) -> Result<bool, Error> {
        self.has_logs(LogCategory::Audit, wait).await
    }

    /// Application records as parsed JSON, empty if none appear within `wait`
    async fn application_logs(&self, wait: Duration) -> Result<Vec<serde_json::Value>, Error>;

    /// Text matching `expr`, empty if nothing matches within `wait`
    async fn grep_logs(&self, expr: &str, wait: Duration) -> Result<String, Error>;

    /// Everything stored, keyed by wherever the backend keeps it
    async fn retrieve_logs(&self) -> Result<BTreeMap<String, String>, Error>;

    /// Locator usable from inside the cluster
    fn cluster_local_endpoint(&self) -> String;
}

/// Poll `condition` for up to `wait`, mapping a timeout to `Ok(false)`
pub(crate) async fn present_within<F, Fut>(
    description: &str,
    interval: Duration,
    wait: Duration,
    condition: F,
) -> Result<bool, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    match poll_until(description, interval, wait, condition).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_timeout() => Ok(false),
        Err(e) => Err(e),
    }
}

//! Log store backed by the operator-managed search engine
//!
//! Queries run through `es_util` inside the store pod, which already holds
//! the admin client certificates.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use logflow_common::poll::DEFAULT_POLL_INTERVAL;
use logflow_common::Error;
use serde_json::Value;
use tracing::{debug, trace};

use super::{present_within, LogCategory, LogStore};
use crate::client::{ClusterClient, ExecTarget};

/// Label selector of the store pods
pub const ELASTICSEARCH_SELECTOR: &str = "component=elasticsearch";

const ES_CONTAINER: &str = "elasticsearch";
const ES_PORT: u16 = 9200;
const SEARCH_SIZE: u32 = 1000;

/// Queries the search-engine store in the logging namespace
pub struct ElasticLogStore {
    client: Arc<dyn ClusterClient>,
    namespace: String,
    interval: Duration,
}

impl ElasticLogStore {
    /// A store for the search engine deployed in `namespace`
    pub fn new(client: Arc<dyn ClusterClient>, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the interval between presence checks
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The first store pod, `None` while no pod matches yet
    async fn find_store_pod(&self) -> Result<Option<ExecTarget>, Error> {
        let pod = self
            .client
            .list_pods(&self.namespace, ELASTICSEARCH_SELECTOR)
            .await?
            .into_iter()
            .next();
        Ok(pod.map(|pod| ExecTarget::new(&self.namespace, pod.name, ES_CONTAINER)))
    }

    async fn es_util_on(&self, target: &ExecTarget, query: &str) -> Result<Value, Error> {
        trace!(pod = %target.pod, query, "querying store");
        let out = self
            .client
            .exec(target, vec!["es_util".to_string(), format!("--query={query}")])
            .await?;

        serde_json::from_str(&out).map_err(|e| {
            Error::query("elasticsearch", format!("unparsable response to {query}: {e}"))
        })
    }

    async fn es_util(&self, query: &str) -> Result<Value, Error> {
        let target = self.find_store_pod().await?.ok_or_else(|| {
            Error::query(
                "elasticsearch",
                format!("no pod matching {ELASTICSEARCH_SELECTOR} in {}", self.namespace),
            )
        })?;
        self.es_util_on(&target, query).await
    }

    /// Like [`Self::es_util`], but `None` while no store pod is visible
    async fn try_es_util(&self, query: &str) -> Result<Option<Value>, Error> {
        match self.find_store_pod().await? {
            Some(target) => self.es_util_on(&target, query).await.map(Some),
            None => {
                trace!(namespace = %self.namespace, "no store pod yet");
                Ok(None)
            }
        }
    }

    /// One look at the document count for `category`.
    ///
    /// A missing index or store pod reads as "not yet".
    async fn has_documents(&self, category: LogCategory) -> Result<bool, Error> {
        let query = format!("{}-*/_count", category.key());
        let Some(response) = self.try_es_util(&query).await? else {
            return Ok(false);
        };
        let count = response.get("count").and_then(Value::as_u64).unwrap_or(0);
        trace!(%category, count, "document count");
        Ok(count > 0)
    }

    async fn search(&self, query: &str) -> Result<Vec<Value>, Error> {
        let response = self.es_util(query).await?;
        Ok(hit_sources(&response))
    }
}

#[async_trait]
impl LogStore for ElasticLogStore {
    async fn has_logs(&self, category: LogCategory, wait: Duration) -> Result<bool, Error> {
        let description = format!("{category} logs in elasticsearch");
        let found = present_within(&description, self.interval, wait, || {
            self.has_documents(category)
        })
        .await?;
        debug!(%category, found, "presence check finished");
        Ok(found)
    }

    async fn application_logs(&self, wait: Duration) -> Result<Vec<Value>, Error> {
        if !self.has_logs(LogCategory::Application, wait).await? {
            return Ok(Vec::new());
        }
        let query = format!("{}-*/_search?size={SEARCH_SIZE}", LogCategory::Application.key());
        self.search(&query).await
    }

    async fn grep_logs(&self, expr: &str, wait: Duration) -> Result<String, Error> {
        let query = format!("*/_search?size={SEARCH_SIZE}&q={}", urlencoding::encode(expr));
        let matched = std::sync::OnceLock::new();
        let matched_ref = &matched;
        let query = query.as_str();
        let description = format!("`{expr}` in elasticsearch");

        present_within(&description, self.interval, wait, move || async move {
            let Some(response) = self.try_es_util(query).await? else {
                return Ok(false);
            };
            let hits = hit_sources(&response);
            if hits.is_empty() {
                return Ok(false);
            }
            let _ = matched_ref.set(render_lines(&hits));
            Ok(true)
        })
        .await?;

        Ok(matched.into_inner().unwrap_or_default())
    }

    async fn retrieve_logs(&self) -> Result<BTreeMap<String, String>, Error> {
        let mut logs = BTreeMap::new();
        for category in LogCategory::ALL {
            let index = format!("{}-*", category.key());
            let hits = self
                .search(&format!("{index}/_search?size={SEARCH_SIZE}"))
                .await?;
            logs.insert(index, render_lines(&hits));
        }
        Ok(logs)
    }

    fn cluster_local_endpoint(&self) -> String {
        format!("https://elasticsearch.{}.svc:{ES_PORT}", self.namespace)
    }
}

/// `hits.hits[]._source` of a search response
fn hit_sources(response: &Value) -> Vec<Value> {
    response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| hits.iter().filter_map(|h| h.get("_source").cloned()).collect())
        .unwrap_or_default()
}

fn render_lines(records: &[Value]) -> String {
    records
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

//! Orchestration API seam
//!
//! Everything the harness does against the cluster goes through
//! [`ClusterClient`], so predicates, log stores, and bootstrap logic can be
//! tested against a mock while scenarios use the real API.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::{Client, ResourceExt};
use logflow_common::{Error, FIELD_MANAGER};
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};

#[cfg(test)]
use mockall::automock;

use crate::resource::{ResourceKind, ResourceRef};

/// What the harness needs to know about a pod
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodSummary {
    /// Pod name
    pub name: String,
    /// Readiness of each container, in status order
    pub containers_ready: Vec<bool>,
}

impl PodSummary {
    /// True when the pod reports at least one container and all are ready
    pub fn all_containers_ready(&self) -> bool {
        !self.containers_ready.is_empty() && self.containers_ready.iter().all(|ready| *ready)
    }
}

/// Where to run a command
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecTarget {
    /// Pod namespace
    pub namespace: String,
    /// Pod name
    pub pod: String,
    /// Container, `None` for the pod's default container
    pub container: Option<String>,
}

impl ExecTarget {
    /// Target a specific container in a pod
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: Some(container.into()),
        }
    }
}

/// Trait abstracting the orchestration API verbs the harness uses
///
/// Absence is not an error for [`ClusterClient::get`]: a missing object is
/// `Ok(None)`, which is how predicates tell "not propagated yet" from a
/// failed query.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create an object from a manifest and return a reference to it.
    ///
    /// The namespace comes from the manifest's `metadata.namespace`.
    async fn create(
        &self,
        kind: ResourceKind,
        manifest: &serde_json::Value,
    ) -> Result<ResourceRef, Error>;

    /// Delete an object
    async fn delete(&self, resource: &ResourceRef) -> Result<(), Error>;

    /// Fetch an object as raw JSON, `None` when it does not exist
    async fn get(&self, resource: &ResourceRef) -> Result<Option<serde_json::Value>, Error>;

    /// List pods in a namespace matching a label selector
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodSummary>, Error>;

    /// Run a command in a container and return its stdout
    async fn exec(&self, target: &ExecTarget, command: Vec<String>) -> Result<String, Error>;
}

/// Real client backed by kube-rs, using DynamicObject for untyped access
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Wrap a connected kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        match namespace {
            Some(ns) if kind.is_namespaced() => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create(
        &self,
        kind: ResourceKind,
        manifest: &serde_json::Value,
    ) -> Result<ResourceRef, Error> {
        let obj: DynamicObject = serde_json::from_value(manifest.clone())
            .map_err(|e| Error::serialization_for(kind.kind(), e.to_string()))?;
        let namespace = obj.metadata.namespace.clone();

        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let created = self
            .api(kind, namespace.as_deref())
            .create(&params, &obj)
            .await?;

        let resource = ResourceRef {
            kind,
            namespace: if kind.is_namespaced() {
                created.namespace().or(namespace)
            } else {
                None
            },
            name: created.name_any(),
        };
        debug!(resource = %resource, "created");
        Ok(resource)
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<(), Error> {
        self.api(resource.kind, resource.namespace.as_deref())
            .delete(&resource.name, &DeleteParams::default())
            .await?;
        debug!(resource = %resource, "deleted");
        Ok(())
    }

    async fn get(&self, resource: &ResourceRef) -> Result<Option<serde_json::Value>, Error> {
        let obj = self
            .api(resource.kind, resource.namespace.as_deref())
            .get_opt(&resource.name)
            .await?;
        obj.map(serde_json::to_value).transpose().map_err(Error::from)
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodSummary>, Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default().labels(selector)).await?;

        Ok(list
            .items
            .into_iter()
            .map(|pod| {
                let containers_ready = pod
                    .status
                    .as_ref()
                    .and_then(|s| s.container_statuses.as_ref())
                    .map(|statuses| statuses.iter().map(|c| c.ready).collect())
                    .unwrap_or_default();
                PodSummary {
                    name: pod.name_any(),
                    containers_ready,
                }
            })
            .collect())
    }

    async fn exec(&self, target: &ExecTarget, command: Vec<String>) -> Result<String, Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let mut params = AttachParams::default().stdout(true).stderr(true);
        if let Some(container) = &target.container {
            params = params.container(container.clone());
        }

        let command_line = command.join(" ");
        trace!(pod = %target.pod, command = %command_line, "exec");

        let mut attached = pods.exec(&target.pod, command, &params).await?;
        let stdout_reader = attached.stdout();
        let stderr_reader = attached.stderr();
        let status = attached.take_status();

        let read_stdout = async {
            let mut out = String::new();
            if let Some(mut reader) = stdout_reader {
                reader.read_to_string(&mut out).await?;
            }
            Ok::<_, std::io::Error>(out)
        };
        let read_stderr = async {
            let mut out = String::new();
            if let Some(mut reader) = stderr_reader {
                reader.read_to_string(&mut out).await?;
            }
            Ok::<_, std::io::Error>(out)
        };
        let (stdout, stderr) = tokio::join!(read_stdout, read_stderr);
        let stdout = stdout.map_err(|e| Error::query("exec", format!("reading stdout: {e}")))?;
        let stderr = stderr.map_err(|e| Error::query("exec", format!("reading stderr: {e}")))?;

        if let Some(status) = status {
            if let Some(status) = status.await {
                if status.status.as_deref() == Some("Failure") {
                    let reason = status.message.unwrap_or_default();
                    return Err(Error::query(
                        "exec",
                        format!(
                            "`{command_line}` in {}/{} failed: {reason} {}",
                            target.namespace,
                            target.pod,
                            stderr.trim()
                        ),
                    ));
                }
            }
        }

        attached
            .join()
            .await
            .map_err(|e| Error::query("exec", e.to_string()))?;
        Ok(stdout)
    }
}

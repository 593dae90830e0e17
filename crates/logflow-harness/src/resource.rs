//! The closed set of resource kinds the harness creates, reads, and deletes

use std::fmt;

use kube::discovery::ApiResource;
use logflow_common::kube_utils::build_api_resource;

/// Every kind of object the harness touches
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Core Namespace (cluster scoped)
    Namespace,
    /// Core Secret
    Secret,
    /// Core ConfigMap
    ConfigMap,
    /// Core Service
    Service,
    /// Replica-scaled workload
    Deployment,
    /// Node-pinned workload, one instance per eligible node
    DaemonSet,
    /// Ordinal workload
    StatefulSet,
    /// A single workload instance
    Pod,
    /// Logging operator instance resource
    ClusterLogging,
    /// Log-pipeline configuration resource
    ClusterLogForwarder,
}

impl ResourceKind {
    /// apiVersion the harness uses for this kind
    pub fn api_version(self) -> &'static str {
        match self {
            Self::Namespace | Self::Secret | Self::ConfigMap | Self::Service | Self::Pod => "v1",
            Self::Deployment | Self::DaemonSet | Self::StatefulSet => "apps/v1",
            Self::ClusterLogging | Self::ClusterLogForwarder => crate::crd::LOGGING_API_VERSION,
        }
    }

    /// Kind name as it appears in manifests
    pub fn kind(self) -> &'static str {
        match self {
            Self::Namespace => "Namespace",
            Self::Secret => "Secret",
            Self::ConfigMap => "ConfigMap",
            Self::Service => "Service",
            Self::Deployment => "Deployment",
            Self::DaemonSet => "DaemonSet",
            Self::StatefulSet => "StatefulSet",
            Self::Pod => "Pod",
            Self::ClusterLogging => "ClusterLogging",
            Self::ClusterLogForwarder => "ClusterLogForwarder",
        }
    }

    /// Whether objects of this kind live in a namespace
    pub fn is_namespaced(self) -> bool {
        !matches!(self, Self::Namespace)
    }

    /// Dynamic API descriptor for untyped access
    pub fn api_resource(self) -> ApiResource {
        build_api_resource(self.api_version(), self.kind())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Identifies one object in the cluster
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// Object kind
    pub kind: ResourceKind,
    /// Namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ResourceRef {
    /// Reference a namespaced object
    pub fn namespaced(
        kind: ResourceKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Reference a cluster-scoped object
    pub fn cluster(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Workloads with a declared replica count and an observed one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicaWorkload {
    /// Converged when `availableReplicas` matches
    Deployment,
    /// Converged when `readyReplicas` matches
    StatefulSet,
}

impl ReplicaWorkload {
    /// The resource kind backing this workload
    pub fn kind(self) -> ResourceKind {
        match self {
            Self::Deployment => ResourceKind::Deployment,
            Self::StatefulSet => ResourceKind::StatefulSet,
        }
    }

    /// Status field holding the observed count
    pub fn observed_field(self) -> &'static str {
        match self {
            Self::Deployment => "availableReplicas",
            Self::StatefulSet => "readyReplicas",
        }
    }
}

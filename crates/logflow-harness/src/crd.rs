//! Logging-pipeline custom resources
//!
//! Only the fields the scenarios set are modelled. The operator owns the full
//! schema; the harness just needs to create instances of it.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group/version of the logging resources
pub const LOGGING_API_VERSION: &str = "logging.openshift.io/v1";

/// Name the operator expects for its singleton resources
pub const INSTANCE_NAME: &str = "instance";

/// Pipeline input for container logs from user workloads
pub const INPUT_NAME_APPLICATION: &str = "application";
/// Pipeline input for node and platform logs
pub const INPUT_NAME_INFRASTRUCTURE: &str = "infrastructure";
/// Pipeline input for audit logs
pub const INPUT_NAME_AUDIT: &str = "audit";

/// Output type for a fluentd forward-protocol receiver
pub const OUTPUT_TYPE_FLUENTD_FORWARD: &str = "fluentdForward";

/// Stack components the operator can deploy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentType {
    /// Node-pinned log collector
    Collector,
    /// Search-engine log store
    Store,
    /// Log browsing UI
    Visualization,
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Collector => "collector",
            Self::Store => "store",
            Self::Visualization => "visualization",
        })
    }
}

/// Spec for the logging operator instance
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "logging.openshift.io",
    version = "v1",
    kind = "ClusterLogging",
    plural = "clusterloggings",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLoggingSpec {
    /// "Managed" or "Unmanaged"
    pub management_state: String,

    /// Collector configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<CollectionSpec>,

    /// Log store configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_store: Option<LogStoreSpec>,

    /// Visualization configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization: Option<VisualizationSpec>,
}

/// Collector section
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct CollectionSpec {
    /// Log collection settings
    pub logs: CollectorLogsSpec,
}

/// Which collector implementation to run
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct CollectorLogsSpec {
    /// Collector type, e.g. "fluentd"
    #[serde(rename = "type")]
    pub type_: String,
    /// Collector-specific settings
    #[serde(default)]
    pub fluentd: BTreeMap<String, serde_json::Value>,
}

/// Log store section
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct LogStoreSpec {
    /// Store type, e.g. "elasticsearch"
    #[serde(rename = "type")]
    pub type_: String,
    /// Search-engine settings
    pub elasticsearch: ElasticsearchSpec,
}

/// Search-engine store sizing
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchSpec {
    /// Number of store nodes
    pub node_count: i32,
    /// Replication policy, e.g. "ZeroRedundancy"
    pub redundancy_policy: String,
    /// Storage settings; empty means ephemeral
    #[serde(default)]
    pub storage: BTreeMap<String, serde_json::Value>,
}

/// Visualization section
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct VisualizationSpec {
    /// Visualization type, e.g. "kibana"
    #[serde(rename = "type")]
    pub type_: String,
    /// UI settings
    pub kibana: KibanaSpec,
}

/// UI replica settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct KibanaSpec {
    /// Number of UI replicas
    pub replicas: i32,
}

impl ClusterLoggingSpec {
    /// A managed instance running exactly the given components
    pub fn with_components(components: &[ComponentType]) -> Self {
        let mut spec = Self {
            management_state: "Managed".to_string(),
            ..Default::default()
        };
        for component in components {
            match component {
                ComponentType::Collector => {
                    spec.collection = Some(CollectionSpec {
                        logs: CollectorLogsSpec {
                            type_: "fluentd".to_string(),
                            fluentd: BTreeMap::new(),
                        },
                    });
                }
                ComponentType::Store => {
                    spec.log_store = Some(LogStoreSpec {
                        type_: "elasticsearch".to_string(),
                        elasticsearch: ElasticsearchSpec {
                            node_count: 1,
                            redundancy_policy: "ZeroRedundancy".to_string(),
                            storage: BTreeMap::new(),
                        },
                    });
                }
                ComponentType::Visualization => {
                    spec.visualization = Some(VisualizationSpec {
                        type_: "kibana".to_string(),
                        kibana: KibanaSpec { replicas: 1 },
                    });
                }
            }
        }
        spec
    }
}

/// Spec for the log-pipeline configuration: where each category goes
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "logging.openshift.io",
    version = "v1",
    kind = "ClusterLogForwarder",
    plural = "clusterlogforwarders",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLogForwarderSpec {
    /// Destinations
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    /// Routes from inputs to outputs
    #[serde(default)]
    pub pipelines: Vec<PipelineSpec>,
}

/// A named destination
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct OutputSpec {
    /// Output name referenced by pipelines
    pub name: String,
    /// Output type, e.g. [`OUTPUT_TYPE_FLUENTD_FORWARD`]
    #[serde(rename = "type")]
    pub type_: String,
    /// Destination URL
    pub url: String,
    /// Secret holding credentials for the destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<OutputSecretSpec>,
}

/// Reference to an output's credentials secret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct OutputSecretSpec {
    /// Secret name in the logging namespace
    pub name: String,
}

/// A route from inputs to outputs
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    /// Pipeline name
    pub name: String,
    /// Input names
    pub input_refs: Vec<String>,
    /// Output names
    pub output_refs: Vec<String>,
    /// Labels added to every record on this pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

impl OutputSpec {
    /// A forward-protocol output, optionally authenticated by a secret of the same name
    pub fn fluentd_forward(name: impl Into<String>, url: impl Into<String>, secured: bool) -> Self {
        let name = name.into();
        Self {
            secret: secured.then(|| OutputSecretSpec { name: name.clone() }),
            name,
            type_: OUTPUT_TYPE_FLUENTD_FORWARD.to_string(),
            url: url.into(),
        }
    }
}

impl ClusterLogForwarderSpec {
    /// Route application, infrastructure, and audit logs to a single output,
    /// one pipeline per category.
    ///
    /// With `label_pipelines` each pipeline tags its records with
    /// `log-type: app|infra|audit`.
    pub fn route_all_to(output: OutputSpec, label_pipelines: bool) -> Self {
        let pipelines = [
            ("test-app", INPUT_NAME_APPLICATION, "app"),
            ("test-infra", INPUT_NAME_INFRASTRUCTURE, "infra"),
            ("test-audit", INPUT_NAME_AUDIT, "audit"),
        ]
        .into_iter()
        .map(|(name, input, log_type)| PipelineSpec {
            name: name.to_string(),
            input_refs: vec![input.to_string()],
            output_refs: vec![output.name.clone()],
            labels: label_pipelines
                .then(|| BTreeMap::from([("log-type".to_string(), log_type.to_string())])),
        })
        .collect();

        Self {
            outputs: vec![output],
            pipelines,
        }
    }
}

//! Manifests for the objects the harness provisions
//!
//! Typed k8s-openapi objects, turned into raw JSON for [`ClusterClient::create`].
//!
//! [`ClusterClient::create`]: crate::client::ClusterClient::create

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, Namespace, PodSpec,
    PodTemplateSpec, Secret, SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use logflow_common::Error;
use serde::Serialize;

use crate::logstore::{FORWARD_PORT, RECEIVER_CONTAINER};

/// Name of the generator workloads
pub const LOG_GENERATOR_NAME: &str = "log-generator";

const BUSYBOX_IMAGE: &str = "busybox";
const PYTHON_IMAGE: &str = "python:3.11-alpine";
const FLUENTD_IMAGE: &str = "fluent/fluentd:v1.16-1";

const RECEIVER_CONFIG_DIR: &str = "/fluentd/etc";
const RECEIVER_SECRET_DIR: &str = "/etc/fluentd/secrets";

/// Serialize a typed object into a manifest
pub fn to_manifest<T: Serialize>(kind: &str, obj: &T) -> Result<serde_json::Value, Error> {
    serde_json::to_value(obj).map_err(|e| Error::serialization_for(kind, e.to_string()))
}

fn metadata(name: &str, namespace: Option<&str>, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: (!labels.is_empty()).then_some(labels),
        ..Default::default()
    }
}

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A bare namespace
pub fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: metadata(name, None, BTreeMap::new()),
        ..Default::default()
    }
}

/// A secret holding raw bytes under each key
pub fn secret(name: &str, namespace: &str, data: BTreeMap<String, Vec<u8>>) -> Secret {
    Secret {
        metadata: metadata(name, Some(namespace), BTreeMap::new()),
        data: Some(data.into_iter().map(|(k, v)| (k, ByteString(v))).collect()),
        ..Default::default()
    }
}

/// Single-replica Deployment whose pods carry `labels`
fn deployment(
    name: &str,
    namespace: &str,
    labels: BTreeMap<String, String>,
    pod: PodSpec,
) -> Deployment {
    Deployment {
        metadata: metadata(name, Some(namespace), labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn generator_labels() -> BTreeMap<String, String> {
    labels(&[
        ("provider", "openshift"),
        ("component", "test"),
        ("logging-infra", LOG_GENERATOR_NAME),
    ])
}

/// Busybox workload printing a numbered line every second
pub fn log_generator(namespace: &str) -> Deployment {
    let container = Container {
        name: LOG_GENERATOR_NAME.to_string(),
        image: Some(BUSYBOX_IMAGE.to_string()),
        image_pull_policy: Some("Always".to_string()),
        args: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            "i=0; while true; do echo $i: My life is my message; i=$((i+1)) ; sleep 1; done".to_string(),
        ]),
        ..Default::default()
    };
    deployment(
        LOG_GENERATOR_NAME,
        namespace,
        generator_labels(),
        PodSpec {
            containers: vec![container],
            ..Default::default()
        },
    )
}

const JSON_GENERATOR_SCRIPT: &str = r#"
import datetime, json, os, sys, time
extra = json.loads(os.environ.get("EXTRA_FIELDS", "{}"))
i = 0
while True:
    i += 1
    data = {"timestamp": datetime.datetime.now().strftime("%Y-%m-%d %H:%M:%S"), "index": i}
    data.update(extra)
    print(json.dumps(data))
    sys.stdout.flush()
    time.sleep(1)
"#;

/// Workload printing one JSON object per second, with `fields` added to each
pub fn json_log_generator(
    namespace: &str,
    fields: &BTreeMap<String, String>,
) -> Result<Deployment, Error> {
    let extra = serde_json::to_string(fields)?;
    let container = Container {
        name: LOG_GENERATOR_NAME.to_string(),
        image: Some(PYTHON_IMAGE.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec![
            "python3".to_string(),
            "-c".to_string(),
            JSON_GENERATOR_SCRIPT.to_string(),
        ]),
        env: Some(vec![EnvVar {
            name: "EXTRA_FIELDS".to_string(),
            value: Some(extra),
            ..Default::default()
        }]),
        ..Default::default()
    };
    Ok(deployment(
        LOG_GENERATOR_NAME,
        namespace,
        generator_labels(),
        PodSpec {
            containers: vec![container],
            ..Default::default()
        },
    ))
}

/// fluentd configuration for a receiver that files records by category
pub fn receiver_config(tls: bool) -> String {
    let transport = if tls {
        format!(
            "  <transport tls>\n    cert_path {RECEIVER_SECRET_DIR}/tls.crt\n    private_key_path {RECEIVER_SECRET_DIR}/tls.key\n  </transport>\n"
        )
    } else {
        String::new()
    };

    let output = |tags: &str, key: &str| {
        format!(
            "<match {tags}>\n  @type file\n  path /tmp/{key}.logs\n  append true\n  <format>\n    @type json\n  </format>\n  <buffer>\n    flush_interval 1s\n  </buffer>\n</match>\n"
        )
    };

    let mut conf = format!(
        "<system>\n  log_level info\n</system>\n<source>\n  @type forward\n  port {FORWARD_PORT}\n  bind 0.0.0.0\n{transport}</source>\n"
    );
    conf.push_str(&output(
        "linux-audit.log** k8s-audit.log** openshift-audit.log**",
        "audit",
    ));
    conf.push_str(&output(
        "kubernetes.var.log.containers.**_openshift*_** kubernetes.var.log.containers.**_kube-*_** kubernetes.var.log.containers.**_default_** journal.** system.var.log**",
        "infra",
    ));
    conf.push_str(&output("kubernetes.**", "app"));
    conf.push_str(&output("**", "infra"));
    conf
}

fn receiver_labels(name: &str) -> BTreeMap<String, String> {
    labels(&[("component", name), ("provider", "openshift")])
}

/// ConfigMap carrying the receiver's fluent.conf
pub fn receiver_config_map(name: &str, namespace: &str, tls: bool) -> ConfigMap {
    ConfigMap {
        metadata: metadata(name, Some(namespace), receiver_labels(name)),
        data: Some(BTreeMap::from([("fluent.conf".to_string(), receiver_config(tls))])),
        ..Default::default()
    }
}

/// The receiver workload; with `tls` the secret of the same name is mounted
pub fn receiver_deployment(name: &str, namespace: &str, tls: bool) -> Deployment {
    let mut volumes = vec![Volume {
        name: "config".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: name.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut mounts = vec![VolumeMount {
        name: "config".to_string(),
        mount_path: RECEIVER_CONFIG_DIR.to_string(),
        read_only: Some(true),
        ..Default::default()
    }];
    if tls {
        volumes.push(Volume {
            name: "certs".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(name.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: "certs".to_string(),
            mount_path: RECEIVER_SECRET_DIR.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    let container = Container {
        name: RECEIVER_CONTAINER.to_string(),
        image: Some(FLUENTD_IMAGE.to_string()),
        args: Some(vec![
            "fluentd".to_string(),
            "-c".to_string(),
            format!("{RECEIVER_CONFIG_DIR}/fluent.conf"),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some("fluentd".to_string()),
            container_port: i32::from(FORWARD_PORT),
            ..Default::default()
        }]),
        volume_mounts: Some(mounts),
        ..Default::default()
    };

    deployment(
        name,
        namespace,
        receiver_labels(name),
        PodSpec {
            containers: vec![container],
            volumes: Some(volumes),
            ..Default::default()
        },
    )
}

/// Service exposing the receiver's forward port
pub fn receiver_service(name: &str, namespace: &str) -> Service {
    Service {
        metadata: metadata(name, Some(namespace), receiver_labels(name)),
        spec: Some(ServiceSpec {
            selector: Some(labels(&[("component", name)])),
            ports: Some(vec![ServicePort {
                name: Some("fluentd".to_string()),
                port: i32::from(FORWARD_PORT),
                target_port: Some(IntOrString::Int(i32::from(FORWARD_PORT))),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

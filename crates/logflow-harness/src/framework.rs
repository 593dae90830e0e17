//! Per-scenario test framework
//!
//! A [`Framework`] owns everything one scenario provisions. Each successful
//! create registers its undo before returning, so a scenario that fails
//! halfway still tears down whatever it managed to create.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use logflow_common::config::HarnessConfig;
use logflow_common::kube_utils::create_client;
use logflow_common::Error;
use rand::Rng;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::cleanup::{CleanupAction, CleanupPipeline, CleanupReport};
use crate::client::{ClusterClient, ExecTarget, KubeClusterClient};
use crate::crd::{
    ClusterLogForwarder, ClusterLogging, ClusterLoggingSpec, ComponentType, OutputSpec,
    INSTANCE_NAME,
};
use crate::logstore::{ElasticLogStore, ForwardReceiverLogStore, LogStore, ELASTICSEARCH_SELECTOR};
use crate::manifests::{self, to_manifest, LOG_GENERATOR_NAME};
use crate::readiness::{
    wait_for_node_pinned_workload, wait_for_pods_drained, wait_for_replicas, wait_for_store_pods,
    COLLECTOR_READY_THRESHOLD,
};
use crate::resource::{ReplicaWorkload, ResourceKind, ResourceRef};

/// Name of the node-pinned collector workload
pub const COLLECTOR_NAME: &str = "fluentd";

/// Name of the visualization Deployment
pub const VISUALIZATION_NAME: &str = "kibana";

/// Name of the forward receiver and of the log store registered for it
pub const RECEIVER_NAME: &str = "fluent-receiver";

/// Name the search-engine log store is registered under
pub const ELASTICSEARCH_STORE: &str = "elasticsearch";

/// Budget for the collector's debounced readiness
pub const COLLECTOR_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const TEST_NAMESPACE_PREFIX: &str = "logflow-test";

/// Certificate material for a secured receiver
#[derive(Clone, Debug, Default)]
pub struct ReceiverTls {
    /// Secret data: `tls.crt`, `tls.key`, `ca-bundle.crt`
    pub data: BTreeMap<String, Vec<u8>>,
}

impl ReceiverTls {
    /// Files every secured receiver needs
    pub const FILES: [&'static str; 3] = ["tls.crt", "tls.key", "ca-bundle.crt"];

    /// Read [`Self::FILES`] from a directory
    pub async fn from_dir(dir: &Path) -> Result<Self, Error> {
        let mut data = BTreeMap::new();
        for file in Self::FILES {
            let path = dir.join(file);
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
            data.insert(file.to_string(), bytes);
        }
        Ok(Self { data })
    }
}

/// A receiver deployed by [`Framework::deploy_forward_receiver`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardReceiver {
    /// Deployment, Service, and log store name
    pub name: String,
    /// Namespace it runs in
    pub namespace: String,
    /// Whether it only accepts TLS
    pub secured: bool,
}

impl ForwardReceiver {
    /// Address of the receiver's Service
    pub fn url(&self) -> String {
        format!("tcp://{}.{}.svc:{}", self.name, self.namespace, crate::logstore::FORWARD_PORT)
    }

    /// Forwarder output pointing at this receiver; secured receivers reference
    /// the secret of the same name
    pub fn output(&self) -> OutputSpec {
        OutputSpec::fluentd_forward(&self.name, self.url(), self.secured)
    }
}

/// Owns the resources, log stores, and cleanup of one scenario
pub struct Framework {
    client: Arc<dyn ClusterClient>,
    config: HarnessConfig,
    log_stores: HashMap<String, Arc<dyn LogStore>>,
    cleanup: CleanupPipeline,
}

impl Framework {
    /// Connect to the cluster named by `config`
    pub async fn connect(config: HarnessConfig) -> Result<Self, Error> {
        let client = create_client(config.kubeconfig.as_deref()).await?;
        Ok(Self::new(Arc::new(KubeClusterClient::new(client)), config))
    }

    /// Build a framework over an existing client
    pub fn new(client: Arc<dyn ClusterClient>, config: HarnessConfig) -> Self {
        let cleanup = CleanupPipeline::new(&config);
        Self {
            client,
            config,
            log_stores: HashMap::new(),
            cleanup,
        }
    }

    /// The orchestration client
    pub fn client(&self) -> &Arc<dyn ClusterClient> {
        &self.client
    }

    /// The configuration this framework was built with
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Register an undo step
    pub fn add_cleanup(&mut self, action: CleanupAction) {
        self.cleanup.register(action);
    }

    /// Number of undo steps waiting to run
    pub fn pending_cleanups(&self) -> usize {
        self.cleanup.len()
    }

    /// Make a log store available under `name`, replacing any previous one
    pub fn register_log_store(&mut self, name: impl Into<String>, store: Arc<dyn LogStore>) {
        let name = name.into();
        debug!(store = %name, "registered log store");
        self.log_stores.insert(name, store);
    }

    /// Look up a registered log store
    pub fn log_store(&self, name: &str) -> Option<Arc<dyn LogStore>> {
        self.log_stores.get(name).cloned()
    }

    /// Create an object and register its deletion
    async fn create_owned(
        &mut self,
        kind: ResourceKind,
        manifest: &Value,
    ) -> Result<ResourceRef, Error> {
        let resource = self.client.create(kind, manifest).await?;
        self.cleanup
            .register(CleanupAction::delete(Arc::clone(&self.client), resource.clone()));
        Ok(resource)
    }

    /// Create the namespace generators run in.
    ///
    /// With a namespace override that already exists, the namespace is
    /// reused and left in place at cleanup.
    pub async fn create_test_namespace(&mut self) -> Result<String, Error> {
        let name = match &self.config.namespace_override {
            Some(name) => name.clone(),
            None => format!(
                "{TEST_NAMESPACE_PREFIX}-{}",
                rand::thread_rng().gen_range(0..10000)
            ),
        };
        let manifest = to_manifest("Namespace", &manifests::namespace(&name))?;

        match self.create_owned(ResourceKind::Namespace, &manifest).await {
            Ok(_) => {
                info!(namespace = %name, "created test namespace");
                Ok(name)
            }
            Err(e) if e.is_already_exists() && self.config.namespace_override.is_some() => {
                info!(namespace = %name, "reusing existing namespace");
                Ok(name)
            }
            Err(e) => Err(e),
        }
    }

    /// Deploy the plain-text generator into a fresh namespace and wait for it.
    ///
    /// Returns the namespace.
    pub async fn deploy_log_generator(&mut self) -> Result<String, Error> {
        let namespace = self.create_test_namespace().await?;
        let deployment = manifests::log_generator(&namespace);
        info!(name = LOG_GENERATOR_NAME, %namespace, "deploying log generator");
        self.create_owned(ResourceKind::Deployment, &to_manifest("Deployment", &deployment)?)
            .await?;
        self.wait_for_deployment(&namespace, LOG_GENERATOR_NAME).await?;
        Ok(namespace)
    }

    /// Deploy the JSON generator with `fields` added to each record.
    ///
    /// Returns the namespace and the generator pod's name.
    pub async fn deploy_json_log_generator(
        &mut self,
        fields: &BTreeMap<String, String>,
    ) -> Result<(String, String), Error> {
        let namespace = self.create_test_namespace().await?;
        let deployment = manifests::json_log_generator(&namespace, fields)?;
        info!(name = LOG_GENERATOR_NAME, %namespace, "deploying JSON log generator");
        self.create_owned(ResourceKind::Deployment, &to_manifest("Deployment", &deployment)?)
            .await?;
        self.wait_for_deployment(&namespace, LOG_GENERATOR_NAME).await?;

        let selector = format!("logging-infra={LOG_GENERATOR_NAME}");
        let pod = self
            .client
            .list_pods(&namespace, &selector)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::query(
                    "log-generator",
                    format!("no pod matching {selector} in {namespace}"),
                )
            })?;
        Ok((namespace, pod.name))
    }

    /// Create a secret in the logging namespace for a pipeline output.
    ///
    /// `data` holds the certificate material; generating it is up to the caller.
    pub async fn create_pipeline_secret(
        &mut self,
        log_store_name: &str,
        secret_name: &str,
        data: BTreeMap<String, Vec<u8>>,
    ) -> Result<ResourceRef, Error> {
        let namespace = self.config.logging_namespace.clone();
        debug!(secret = secret_name, log_store = log_store_name, "creating pipeline secret");
        let secret = manifests::secret(secret_name, &namespace, data);
        self.create_owned(ResourceKind::Secret, &to_manifest("Secret", &secret)?)
            .await
    }

    /// Create the operator instance with `components` and register the
    /// search-engine store
    pub async fn setup_cluster_logging(
        &mut self,
        components: &[ComponentType],
    ) -> Result<ResourceRef, Error> {
        let store = ElasticLogStore::new(Arc::clone(&self.client), &self.config.logging_namespace)
            .with_poll_interval(self.config.poll_interval);
        self.register_log_store(ELASTICSEARCH_STORE, Arc::new(store));

        let spec = ClusterLoggingSpec::with_components(components);
        let cr = ClusterLogging::new(INSTANCE_NAME, spec);
        self.create_cluster_logging(cr).await
    }

    /// Create a ClusterLogging; defaults to the logging namespace
    pub async fn create_cluster_logging(
        &mut self,
        mut cr: ClusterLogging,
    ) -> Result<ResourceRef, Error> {
        cr.metadata
            .namespace
            .get_or_insert_with(|| self.config.logging_namespace.clone());
        let manifest = to_manifest("ClusterLogging", &cr)?;
        debug!(%manifest, "creating ClusterLogging");
        self.create_owned(ResourceKind::ClusterLogging, &manifest).await
    }

    /// Create a ClusterLogForwarder; defaults to the logging namespace
    pub async fn create_cluster_log_forwarder(
        &mut self,
        mut cr: ClusterLogForwarder,
    ) -> Result<ResourceRef, Error> {
        cr.metadata
            .namespace
            .get_or_insert_with(|| self.config.logging_namespace.clone());
        let manifest = to_manifest("ClusterLogForwarder", &cr)?;
        debug!(%manifest, "creating ClusterLogForwarder");
        self.create_owned(ResourceKind::ClusterLogForwarder, &manifest).await
    }

    /// Deploy a forward receiver in the logging namespace, register its log
    /// store, and wait for it.
    ///
    /// With `tls` the certificate secret is created first and the receiver
    /// only accepts TLS connections.
    pub async fn deploy_forward_receiver(
        &mut self,
        tls: Option<ReceiverTls>,
    ) -> Result<ForwardReceiver, Error> {
        let namespace = self.config.logging_namespace.clone();
        let secured = tls.is_some();
        info!(name = RECEIVER_NAME, %namespace, secured, "deploying forward receiver");

        if let Some(tls) = tls {
            self.create_pipeline_secret(RECEIVER_NAME, RECEIVER_NAME, tls.data)
                .await?;
        }

        let config_map = manifests::receiver_config_map(RECEIVER_NAME, &namespace, secured);
        self.create_owned(ResourceKind::ConfigMap, &to_manifest("ConfigMap", &config_map)?)
            .await?;

        let deployment = manifests::receiver_deployment(RECEIVER_NAME, &namespace, secured);
        self.create_owned(ResourceKind::Deployment, &to_manifest("Deployment", &deployment)?)
            .await?;

        let service = manifests::receiver_service(RECEIVER_NAME, &namespace);
        self.create_owned(ResourceKind::Service, &to_manifest("Service", &service)?)
            .await?;

        let store =
            ForwardReceiverLogStore::new(Arc::clone(&self.client), RECEIVER_NAME, &namespace)
                .with_poll_interval(self.config.poll_interval);
        self.register_log_store(RECEIVER_NAME, Arc::new(store));

        self.wait_for_deployment(&namespace, RECEIVER_NAME).await?;
        Ok(ForwardReceiver {
            name: RECEIVER_NAME.to_string(),
            namespace,
            secured,
        })
    }

    /// Block until a component of the logging stack is ready
    pub async fn wait_for(&self, component: ComponentType) -> Result<(), Error> {
        let namespace = self.config.logging_namespace.as_str();
        debug!(%component, "waiting for component");
        match component {
            ComponentType::Collector => {
                wait_for_node_pinned_workload(
                    self.client.as_ref(),
                    namespace,
                    COLLECTOR_NAME,
                    COLLECTOR_READY_THRESHOLD,
                    self.config.poll_interval,
                    COLLECTOR_TIMEOUT,
                )
                .await
            }
            ComponentType::Store => {
                wait_for_store_pods(
                    self.client.as_ref(),
                    namespace,
                    ELASTICSEARCH_SELECTOR,
                    self.config.poll_interval,
                    self.config.ready_timeout,
                )
                .await
            }
            ComponentType::Visualization => {
                self.wait_for_deployment(namespace, VISUALIZATION_NAME)
                    .await
            }
        }
    }

    /// Block until a Deployment's available replicas match its desired count
    pub async fn wait_for_deployment(&self, namespace: &str, name: &str) -> Result<(), Error> {
        wait_for_replicas(
            self.client.as_ref(),
            ReplicaWorkload::Deployment,
            namespace,
            name,
            self.config.poll_interval,
            self.config.ready_timeout,
        )
        .await
    }

    /// Block until a StatefulSet's ready replicas match its desired count
    pub async fn wait_for_stateful_set(&self, namespace: &str, name: &str) -> Result<(), Error> {
        wait_for_replicas(
            self.client.as_ref(),
            ReplicaWorkload::StatefulSet,
            namespace,
            name,
            self.config.poll_interval,
            self.config.ready_timeout,
        )
        .await
    }

    /// Wait for pods whose `component` label is one of `components` to be
    /// gone. Failures are logged, not returned.
    pub async fn wait_for_cleanup_completion(&self, namespace: &str, components: &[&str]) {
        let selector = format!("component in ({})", components.join(","));
        info!(%namespace, %selector, "waiting for pods to go away");
        if let Err(e) = wait_for_pods_drained(
            self.client.as_ref(),
            namespace,
            &selector,
            self.config.poll_interval,
            self.config.ready_timeout,
        )
        .await
        {
            error!(%namespace, %selector, error = %e, "cleanup completion failed");
        }
    }

    /// Run a command in a container and return its stdout
    pub async fn pod_exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<String, Error> {
        self.client
            .exec(&ExecTarget::new(namespace, pod, container), command)
            .await
    }

    /// Run the cleanup pipeline. Never fails; see [`CleanupPipeline::run`].
    pub async fn cleanup(&mut self) -> CleanupReport {
        self.cleanup.run().await
    }
}

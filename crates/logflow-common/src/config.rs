//! Harness configuration
//!
//! The harness never reads the environment on its own. Scenarios build a
//! [`HarnessConfig`] (usually with [`HarnessConfig::from_env`]) and hand it to
//! the framework constructor.

use std::path::PathBuf;
use std::time::Duration;

use crate::poll::{
    DEFAULT_CLEANUP_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT, DEFAULT_WAIT_FOR_LOGS_TIMEOUT,
};
use crate::DEFAULT_LOGGING_NAMESPACE;

/// Toggle for the cleanup pipeline. Unset, empty, or `true` runs it.
pub const ENV_DO_CLEANUP: &str = "DO_CLEANUP";
/// External cleanup command, run before the registered cleanup actions
pub const ENV_CLEANUP_CMD: &str = "CLEANUP_CMD";
/// Fixed name for the generated test namespace
pub const ENV_GENERATOR_NS: &str = "GENERATOR_NS";
/// Path to a kubeconfig; unset means the inferred/in-cluster config
pub const ENV_KUBECONFIG: &str = "KUBECONFIG";

/// Source of environment-style settings
///
/// Abstracts the process environment so configuration loading can be tested
/// without touching global state.
#[cfg_attr(test, mockall::automock)]
pub trait EnvSource: Send + Sync {
    /// Look up a variable, `None` when unset
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads from the process environment
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEnv;

impl EnvSource for OsEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Configuration for one framework instance
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    /// Skip the whole cleanup pipeline (hook and registered actions)
    pub skip_cleanup: bool,
    /// External cleanup command. `None` when not configured, `Some("")`
    /// when explicitly configured as empty.
    pub cleanup_command: Option<String>,
    /// How long the external cleanup command may run
    pub cleanup_timeout: Duration,
    /// Use this name for the generated test namespace instead of a random one
    pub namespace_override: Option<String>,
    /// Kubeconfig to connect with; `None` infers the config
    pub kubeconfig: Option<PathBuf>,
    /// Namespace the logging operator, collector, and stores run in
    pub logging_namespace: String,
    /// Interval between readiness polls
    pub poll_interval: Duration,
    /// Budget for workloads to converge
    pub ready_timeout: Duration,
    /// Default budget for log presence checks
    pub log_wait_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            skip_cleanup: false,
            cleanup_command: None,
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
            namespace_override: None,
            kubeconfig: None,
            logging_namespace: DEFAULT_LOGGING_NAMESPACE.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            ready_timeout: DEFAULT_TIMEOUT,
            log_wait_timeout: DEFAULT_WAIT_FOR_LOGS_TIMEOUT,
        }
    }
}

impl HarnessConfig {
    /// Load from the process environment
    pub fn from_env() -> Self {
        Self::from_source(&OsEnv)
    }

    /// Load from an arbitrary environment source, defaults for the rest
    pub fn from_source(env: &dyn EnvSource) -> Self {
        Self {
            skip_cleanup: !cleanup_enabled(env.var(ENV_DO_CLEANUP).as_deref()),
            cleanup_command: env.var(ENV_CLEANUP_CMD),
            namespace_override: env
                .var(ENV_GENERATOR_NS)
                .filter(|ns| !ns.trim().is_empty()),
            kubeconfig: env
                .var(ENV_KUBECONFIG)
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            ..Default::default()
        }
    }

    /// Set the namespace the logging stack runs in
    pub fn with_logging_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.logging_namespace = namespace.into();
        self
    }

    /// Set the readiness poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Interpret the cleanup toggle: unset, blank, or `true` (any case) runs cleanup
pub fn cleanup_enabled(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None | Some("") => true,
        Some(v) => v.eq_ignore_ascii_case("true"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_with(vars: &[(&str, &str)]) -> MockEnvSource {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut mock = MockEnvSource::new();
        mock.expect_var().returning(move |key| vars.get(key).cloned());
        mock
    }

    #[test]
    fn cleanup_toggle_defaults_to_run() {
        assert!(cleanup_enabled(None));
        assert!(cleanup_enabled(Some("")));
        assert!(cleanup_enabled(Some("  ")));
        assert!(cleanup_enabled(Some("true")));
        assert!(cleanup_enabled(Some(" TRUE ")));
        assert!(!cleanup_enabled(Some("false")));
        assert!(!cleanup_enabled(Some("no")));
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = HarnessConfig::from_source(&env_with(&[]));
        assert!(!config.skip_cleanup);
        assert!(config.cleanup_command.is_none());
        assert!(config.namespace_override.is_none());
        assert!(config.kubeconfig.is_none());
        assert_eq!(config.logging_namespace, DEFAULT_LOGGING_NAMESPACE);
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.ready_timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn environment_overrides_are_read() {
        let config = HarnessConfig::from_source(&env_with(&[
            (ENV_DO_CLEANUP, "false"),
            (ENV_CLEANUP_CMD, "hack/cleanup.sh --all"),
            (ENV_GENERATOR_NS, "my-generator"),
            (ENV_KUBECONFIG, "/tmp/kubeconfig"),
        ]));
        assert!(config.skip_cleanup);
        assert_eq!(config.cleanup_command.as_deref(), Some("hack/cleanup.sh --all"));
        assert_eq!(config.namespace_override.as_deref(), Some("my-generator"));
        assert_eq!(config.kubeconfig, Some(PathBuf::from("/tmp/kubeconfig")));
    }

    #[test]
    fn explicitly_empty_cleanup_command_is_kept() {
        let config = HarnessConfig::from_source(&env_with(&[(ENV_CLEANUP_CMD, "")]));
        assert_eq!(config.cleanup_command.as_deref(), Some(""));
    }

    #[test]
    fn blank_namespace_override_is_ignored() {
        let config = HarnessConfig::from_source(&env_with(&[(ENV_GENERATOR_NS, " ")]));
        assert!(config.namespace_override.is_none());
    }

    #[test]
    fn builders_override_fields() {
        let config = HarnessConfig::default()
            .with_logging_namespace("logging")
            .with_poll_interval(Duration::from_millis(250));
        assert_eq!(config.logging_namespace, "logging");
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }
}

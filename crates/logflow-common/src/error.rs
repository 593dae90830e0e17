//! Error types for the logflow harness
//!
//! Errors carry enough context (what was being waited on, which command
//! failed) to explain a failed scenario without re-running it.

use std::time::Duration;

use thiserror::Error;

/// Main error type for harness operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A poll exhausted its budget before the condition completed
    #[error("timed out after {timeout:?} waiting for {description}")]
    Timeout {
        /// What was being waited on (predicate and resource)
        description: String,
        /// The budget that elapsed
        timeout: Duration,
    },

    /// A query against the cluster or a log store failed in a way that
    /// retrying will not fix
    #[error("query error [{context}]: {message}")]
    Query {
        /// Where the query was issued (e.g., "forward-receiver", "exec")
        context: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// An external command failed to run or exited unsuccessfully
    #[error("command `{command}` failed: {message}")]
    Command {
        /// The command line that was run
        command: String,
        /// Description of what failed
        message: String,
    },

    /// Invalid harness configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },
}

impl Error {
    /// Create a timeout error for the given description and budget
    pub fn timeout(description: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            description: description.into(),
            timeout,
        }
    }

    /// Create a query error with context
    pub fn query(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Query {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error for a specific resource kind
    pub fn serialization_for(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a command error
    pub fn command(command: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether this is an API "not found" (404) response.
    ///
    /// Absence is how a not-yet-propagated resource shows up, so predicates
    /// use this to tell "keep waiting" apart from real failures.
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// Whether this is an API "already exists" (409) response
    pub fn is_already_exists(&self) -> bool {
        self.api_code() == Some(409)
    }

    /// Whether this error came from a poll running out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    fn api_code(&self) -> Option<u16> {
        match self {
            Self::Kube {
                source: kube::Error::Api(resp),
            } => Some(resp.code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} for test"),
            reason: reason.to_string(),
            code,
        }))
    }

    #[test]
    fn timeout_names_what_was_awaited_and_the_bound() {
        let err = Error::timeout("daemonset openshift-logging/fluentd", Duration::from_secs(300));
        let msg = err.to_string();
        assert!(msg.contains("daemonset openshift-logging/fluentd"));
        assert!(msg.contains("300s"));
        assert!(err.is_timeout());
    }

    #[test]
    fn api_codes_are_classified() {
        assert!(api_error(404, "NotFound").is_not_found());
        assert!(!api_error(404, "NotFound").is_already_exists());
        assert!(api_error(409, "AlreadyExists").is_already_exists());
        assert!(!api_error(403, "Forbidden").is_not_found());
        assert!(!api_error(403, "Forbidden").is_timeout());
    }

    #[test]
    fn non_api_errors_are_never_not_found() {
        assert!(!Error::query("exec", "boom").is_not_found());
        assert!(!Error::config("bad").is_already_exists());
    }

    #[test]
    fn serialization_error_from_serde() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{")
            .map_err(Error::from)
            .unwrap_err();
        match err {
            Error::Serialization { kind, .. } => assert!(kind.is_none()),
            other => panic!("expected Serialization, got {other:?}"),
        }
    }

    #[test]
    fn command_error_includes_command_line() {
        let err = Error::command("/bin/false", "exit status: 1");
        assert_eq!(err.to_string(), "command `/bin/false` failed: exit status: 1");
    }
}

//! Best-effort teardown
//!
//! Every resource the framework creates registers an undo action right
//! after the create succeeds. [`CleanupPipeline::run`] then runs the
//! optional external hook and every action, in registration order, logging
//! and swallowing each failure so one stuck resource cannot leak the rest.

use std::fmt;
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use logflow_common::config::HarnessConfig;
use logflow_common::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::client::ClusterClient;
use crate::resource::ResourceRef;

type UndoFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), Error>> + Send>;

/// A single registered undo step
pub struct CleanupAction {
    description: String,
    run: UndoFn,
}

impl CleanupAction {
    /// Wrap an async closure as an undo step
    pub fn new<F, Fut>(description: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Self {
            description: description.into(),
            run: Box::new(move || Box::pin(f())),
        }
    }

    /// Undo step that deletes `resource`
    pub fn delete(client: Arc<dyn ClusterClient>, resource: ResourceRef) -> Self {
        Self::new(format!("delete {resource}"), move || async move {
            client.delete(&resource).await
        })
    }

    /// What this step undoes
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupAction")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// What a cleanup run did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// The whole pipeline was disabled
    pub skipped: bool,
    /// Actions invoked
    pub attempted: usize,
    /// Actions that returned an error
    pub failed: usize,
}

/// Ordered undo actions plus the external hook
#[derive(Debug)]
pub struct CleanupPipeline {
    actions: Vec<CleanupAction>,
    skip: bool,
    command: Option<String>,
    command_timeout: Duration,
}

impl CleanupPipeline {
    /// An empty pipeline honouring the skip toggle and hook from `config`
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            actions: Vec::new(),
            skip: config.skip_cleanup,
            command: config.cleanup_command.clone(),
            command_timeout: config.cleanup_timeout,
        }
    }

    /// Append an undo step; it runs after everything registered before it
    pub fn register(&mut self, action: CleanupAction) {
        debug!(
            action = %action.description,
            position = self.actions.len(),
            "registered cleanup"
        );
        self.actions.push(action);
    }

    /// Number of pending undo steps
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run the hook, then every pending action. Never fails.
    ///
    /// Actions are consumed; a second run only repeats the hook.
    pub async fn run(&mut self) -> CleanupReport {
        if self.skip {
            info!(
                pending = self.actions.len(),
                "cleanup disabled, leaving resources in place"
            );
            return CleanupReport {
                skipped: true,
                ..Default::default()
            };
        }

        info!("running cleanup");
        match self.command.as_deref() {
            None => {}
            Some(command) if command.trim().is_empty() => info!("no cleanup script provided"),
            Some(command) => match run_cleanup_command(command, self.command_timeout).await {
                Ok(output) => info!(command, %output, "cleanup script finished"),
                Err(e) => warn!(command, error = %e, "cleanup script failed"),
            },
        }

        let actions = std::mem::take(&mut self.actions);
        debug!(count = actions.len(), "running cleanup actions");

        let mut report = CleanupReport::default();
        for action in actions {
            report.attempted += 1;
            let CleanupAction { description, run } = action;
            match run().await {
                Ok(()) => debug!(action = %description, "cleanup action succeeded"),
                Err(e) => {
                    report.failed += 1;
                    warn!(action = %description, error = %e, "cleanup action failed");
                }
            }
        }

        info!(attempted = report.attempted, failed = report.failed, "cleanup finished");
        report
    }
}

/// Run an external command line with an empty environment.
///
/// The line is split on whitespace; there is no shell quoting. Returns the
/// combined stdout and stderr, or an error if the command cannot start,
/// exits unsuccessfully, or outlives `timeout`.
pub async fn run_cleanup_command(command: &str, timeout: Duration) -> Result<String, Error> {
    let mut parts = command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| Error::command(command, "empty command line"))?;

    let child = Command::new(program)
        .args(parts)
        .env_clear()
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| Error::timeout(format!("cleanup command `{command}`"), timeout))?
        .map_err(|e| Error::command(command, e.to_string()))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if output.status.success() {
        Ok(combined)
    } else {
        Err(Error::command(
            command,
            format!("{}: {}", output.status, combined.trim()),
        ))
    }
}

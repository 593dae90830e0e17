//! Fixed-interval condition polling
//!
//! Every wait in the harness goes through [`poll_until`]: readiness checks,
//! log presence checks, and teardown verification. Polling is sequential and
//! fixed-interval; there is no backoff and no external cancellation. The
//! only ways out are the condition finishing, the condition failing, or the
//! budget running out.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::Error;

/// Interval between polls when the caller has no reason to pick another
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Budget for a workload to converge
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Budget for log records to show up in a store
pub const DEFAULT_WAIT_FOR_LOGS_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Budget for teardown steps that run external commands
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Poll a condition until it completes, fails, or the timeout elapses.
///
/// The condition runs immediately and then once per `interval`:
/// - `Ok(true)` - done, return `Ok(())` without calling it again
/// - `Ok(false)` - not yet, sleep and retry
/// - `Err(e)` - fatal, return `e` unchanged without retrying
///
/// The poller has no opinion on which failures are transient. A condition
/// that wants to ride out a flaky observation returns `Ok(false)` for it.
///
/// When the budget runs out the result is [`Error::Timeout`] naming
/// `description` and `timeout`. For a condition that never completes this
/// happens no earlier than `timeout` and no later than `timeout + interval`
/// (plus the time the condition itself takes).
pub async fn poll_until<F, Fut>(
    description: &str,
    interval: Duration,
    timeout: Duration,
    mut condition: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = Instant::now();

    loop {
        if start.elapsed() > timeout {
            return Err(Error::timeout(description, timeout));
        }

        if condition().await? {
            return Ok(());
        }

        trace!(
            description,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "condition not met, retrying"
        );
        tokio::time::sleep(interval).await;
    }
}

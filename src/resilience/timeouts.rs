//! Deadlines and cancellation for suspending calls.
//!
//! # Responsibilities
//! - Bound deployer calls and backend connects with a deadline
//! - Unblock promptly when the caller's token is cancelled

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Why a guarded call did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Cancelled,
    TimedOut {
        operation: &'static str,
        after: Duration,
    },
}

/// Run `fut` until it completes, `limit` elapses, or `cancel` fires.
pub async fn with_deadline<T, E, F>(
    cancel: &CancellationToken,
    limit: Duration,
    operation: &'static str,
    fut: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<Interrupted>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Cancelled.into()),
        result = tokio::time::timeout(limit, fut) => match result {
            Ok(inner) => inner,
            Err(_) => Err(Interrupted::TimedOut { operation, after: limit }.into()),
        },
    }
}

//! Deadline guard for a single asynchronous operation.

use std::{future::Future, time::Duration};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// How long a timed-out operation gets to acknowledge cancellation.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_millis(100);

/// The deadline passed before the operation completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Operation timed out after {deadline:?}")]
pub struct TimeoutError {
    pub deadline: Duration,
}

/// Why a guarded operation did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error(transparent)]
    TimedOut(#[from] TimeoutError),
    #[error("Operation cancelled")]
    Cancelled,
}

/// Races an operation against a deadline and a parent cancellation token.
///
/// The operation receives a child token. When the deadline passes or the
/// parent is cancelled, the child token fires and the guard keeps polling
/// the operation for up to `grace` so it can wind down before being dropped.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutGuard {
    deadline: Duration,
    grace: Duration,
}

impl TimeoutGuard {
    /// Create a guard with the default cancellation grace.
    #[must_use]
    pub const fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            grace: DEFAULT_CANCEL_GRACE,
        }
    }

    /// Override the cancellation grace.
    #[must_use]
    pub const fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Configured deadline.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run `op` under the guard.
    ///
    /// The operation's own output, success or error, is passed through
    /// unchanged.
    ///
    /// # Errors
    /// Returns [`Interrupted`] if the deadline passed or `cancel` fired first.
    pub async fn run<F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<Fut::Output, Interrupted>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future,
    {
        let token = cancel.child_token();
        let fut = op(token.clone());
        tokio::pin!(fut);

        let interrupted = tokio::select! {
            biased;
            out = &mut fut => return Ok(out),
            () = cancel.cancelled() => Interrupted::Cancelled,
            () = tokio::time::sleep(self.deadline) => Interrupted::TimedOut(TimeoutError {
                deadline: self.deadline,
            }),
        };

        token.cancel();
        if tokio::time::timeout(self.grace, &mut fut).await.is_err() {
            tracing::debug!(grace = ?self.grace, "Operation did not acknowledge cancellation");
        }
        Err(interrupted)
    }
}

/// Run `op` with `deadline` and the default grace.
///
/// # Errors
/// Returns [`Interrupted`] if the deadline passed or `cancel` fired first.
pub async fn with_timeout<F, Fut>(
    deadline: Duration,
    cancel: &CancellationToken,
    op: F,
) -> Result<Fut::Output, Interrupted>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future,
{
    TimeoutGuard::new(deadline).run(cancel, op).await
}

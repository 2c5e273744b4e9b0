//! Bounded fixed-delay retry around transport calls.

use std::{future::Future, time::Duration};

use mcp_resilience_core::{Invocation, NormalizedResult, Transport, TransportError, normalize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    policy::{RetryPolicy, TimeoutPolicy},
    timeout::{DEFAULT_CANCEL_GRACE, Interrupted, TimeoutError, TimeoutGuard},
};

/// Failure of a single attempt.
#[derive(Debug, Clone, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    TimedOut(#[from] TimeoutError),
}

impl AttemptError {
    /// Whether retrying cannot help.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_fatal(),
            Self::TimedOut(_) => false,
        }
    }
}

/// What happened on one attempt and what comes next.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt_number: u32,
    /// Why the attempt failed.
    pub error: AttemptError,
    /// Delay before the next attempt, or `None` if this was the last one.
    pub next_delay: Option<Duration>,
}

/// Final failure of a retried operation.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    #[error("{operation} failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last_error: AttemptError,
    },
    #[error("{operation} cancelled after {attempts} attempt(s)")]
    Cancelled { operation: String, attempts: u32 },
}

impl RunError {
    /// Attempts made before giving up.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// Whether the failure left the session unusable.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Exhausted { last_error, .. } => last_error.is_fatal(),
            Self::Cancelled { .. } => false,
        }
    }
}

/// Runs transport calls with a per-attempt deadline and fixed-delay retry.
///
/// Holds only policy. The session is passed into every call and never
/// stored.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    retry: RetryPolicy,
    timeouts: TimeoutPolicy,
    grace: Duration,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), TimeoutPolicy::default())
    }
}

impl RetryExecutor {
    /// Create an executor.
    #[must_use]
    pub fn new(retry: RetryPolicy, timeouts: TimeoutPolicy) -> Self {
        Self {
            retry,
            timeouts,
            grace: DEFAULT_CANCEL_GRACE,
        }
    }

    /// Override how long a timed-out call gets to acknowledge cancellation.
    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Timeout policy.
    #[must_use]
    pub const fn timeout_policy(&self) -> &TimeoutPolicy {
        &self.timeouts
    }

    /// Call a remote operation and normalize its response.
    ///
    /// # Errors
    /// Returns [`RunError::Exhausted`] once every attempt failed, or
    /// [`RunError::Cancelled`] if `cancel` fired.
    pub async fn run<T>(
        &self,
        session: &T,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<NormalizedResult, RunError>
    where
        T: Transport + ?Sized,
    {
        let deadline = self.timeouts.for_operation(&invocation.name);
        let raw = self
            .run_with(&invocation.name, deadline, cancel, |token| {
                session.call_operation(&invocation.name, &invocation.arguments, token)
            })
            .await?;
        Ok(normalize(&raw))
    }

    /// Read a remote resource and normalize it, with the default deadline.
    ///
    /// # Errors
    /// Same as [`RetryExecutor::run`].
    pub async fn read<T>(
        &self,
        session: &T,
        uri: &str,
        cancel: &CancellationToken,
    ) -> Result<NormalizedResult, RunError>
    where
        T: Transport + ?Sized,
    {
        let deadline = self.timeouts.default_timeout();
        let raw = self
            .run_with(uri, deadline, cancel, |token| session.read_resource(uri, token))
            .await?;
        Ok(normalize(&raw))
    }

    /// Attempt loop shared by operations and resource reads.
    ///
    /// Attempts run strictly one after another. Intermediate failures are
    /// logged, only the final one is returned.
    ///
    /// # Errors
    /// Same as [`RetryExecutor::run`].
    pub async fn run_with<F, Fut, R>(
        &self,
        operation: &str,
        deadline: Duration,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<R, RunError>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = Result<R, TransportError>>,
    {
        let cancelled = |attempts| RunError::Cancelled {
            operation: operation.to_string(),
            attempts,
        };
        let guard = TimeoutGuard::new(deadline).with_grace(self.grace);
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(attempts));
            }
            attempts += 1;

            let error = match guard.run(cancel, &call).await {
                Ok(Ok(value)) => {
                    if attempts > 1 {
                        tracing::debug!(operation, attempts, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(Interrupted::Cancelled) => return Err(cancelled(attempts)),
                Ok(Err(_)) if cancel.is_cancelled() => return Err(cancelled(attempts)),
                Ok(Err(e)) => AttemptError::from(e),
                Err(Interrupted::TimedOut(e)) => AttemptError::from(e),
            };

            let record = self.record(attempts, error);
            let Some(delay) = record.next_delay else {
                tracing::error!(
                    operation,
                    attempts,
                    error = %record.error,
                    "Operation failed, giving up"
                );
                return Err(RunError::Exhausted {
                    operation: operation.to_string(),
                    attempts,
                    last_error: record.error,
                });
            };

            tracing::warn!(
                operation,
                attempt = record.attempt_number,
                max_retries = self.retry.max_retries,
                delay = ?delay,
                error = %record.error,
                "Operation failed, retrying"
            );

            tokio::select! {
                () = cancel.cancelled() => return Err(cancelled(attempts)),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Decide whether a failed attempt is retried.
    #[must_use]
    pub fn record(&self, attempt_number: u32, error: AttemptError) -> AttemptRecord {
        let next_delay = if error.is_fatal() {
            None
        } else {
            self.retry.delay_after(attempt_number)
        };
        AttemptRecord {
            attempt_number,
            error,
            next_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicU32, Ordering},
        },
    };

    use async_trait::async_trait;
    use mcp_resilience_core::{Arguments, OperationInfo, RawResponse};
    use serde_json::json;
    use tokio::time::Instant;

    use super::*;

    enum Step {
        Fail(TransportError),
        Hang,
        Reply(RawResponse),
    }

    struct Scripted {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(steps: impl IntoIterator<Item = Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into_iter().collect()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        async fn next(&self, cancel: CancellationToken) -> Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Fail(e)) => Err(e),
                Some(Step::Reply(v)) => Ok(v),
                Some(Step::Hang) | None => {
                    cancel.cancelled().await;
                    Err(TransportError::Cancelled)
                }
            }
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn initialize(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn list_operations(&self) -> Result<Vec<OperationInfo>, TransportError> {
            Ok(Vec::new())
        }

        async fn call_operation(
            &self,
            _name: &str,
            _arguments: &Arguments,
            cancel: CancellationToken,
        ) -> Result<RawResponse, TransportError> {
            self.next(cancel).await
        }

        async fn read_resource(
            &self,
            _uri: &str,
            cancel: CancellationToken,
        ) -> Result<RawResponse, TransportError> {
            self.next(cancel).await
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn executor(max_retries: u32) -> RetryExecutor {
        RetryExecutor::new(
            RetryPolicy::new(max_retries, Duration::from_secs(2)),
            TimeoutPolicy::new(Duration::from_secs(30)),
        )
    }

    fn io_error() -> Step {
        Step::Fail(TransportError::Io("connection reset".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_k_failures_then_success() {
        for k in 0..=3 {
            let steps = (0..k)
                .map(|_| io_error())
                .chain([Step::Reply(json!({"content": [{"text": "{\"ok\": true}"}]}))]);
            let session = Scripted::new(steps);
            let start = Instant::now();

            let result = executor(3)
                .run(&session, &Invocation::new("read_query"), &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(result, NormalizedResult::Structured(json!({"ok": true})));
            assert_eq!(session.calls(), k + 1);
            assert_eq!(start.elapsed(), Duration::from_secs(2) * k);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_attempts_and_last_error() {
        let session = Scripted::new((0..3).map(|_| io_error()));

        let err = executor(2)
            .run(&session, &Invocation::new("read_query"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), 3);
        assert_eq!(session.calls(), 3);
        match err {
            RunError::Exhausted {
                operation,
                last_error: AttemptError::Transport(TransportError::Io(msg)),
                ..
            } => {
                assert_eq!(operation, "read_query");
                assert_eq!(msg, "connection reset");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failed_attempt() {
        let session = Scripted::new([Step::Hang, Step::Reply(json!({"content": [{"text": "[[1]]"}]}))]);
        let start = Instant::now();

        let result = executor(3)
            .run(
                &session,
                &Invocation::new("read_query").arg("query", "SELECT 1"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result, NormalizedResult::Structured(json!([[1]])));
        assert_eq!(session.calls(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(32));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_stops_retrying() {
        let session = Scripted::new([Step::Fail(TransportError::Disconnected("eof".into()))]);

        let err = executor(5)
            .run(&session, &Invocation::new("list_tables"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(err.attempts(), 1);
        assert_eq!(session.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay_prevents_retry() {
        let session = Scripted::new((0..5).map(|_| io_error()));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = executor(5)
            .run(&session, &Invocation::new("read_query"), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Cancelled { attempts: 1, .. }));
        assert_eq!(session.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_call_reports_cancelled() {
        let session = Scripted::new([Step::Hang]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = executor(5)
            .run(&session, &Invocation::new("read_query"), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Cancelled { attempts: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_uses_default_deadline() {
        let session = Scripted::new([Step::Reply(json!({"content": {"text": "memo body"}}))]);

        let result = executor(0)
            .read(&session, "memo://insights", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result, NormalizedResult::Opaque("memo body".into()));
    }

    #[test]
    fn test_record_stops_at_budget() {
        let exec = executor(1);
        let timeout = AttemptError::from(TimeoutError {
            deadline: Duration::from_secs(30),
        });
        assert_eq!(exec.record(1, timeout.clone()).next_delay, Some(Duration::from_secs(2)));
        assert_eq!(exec.record(2, timeout).next_delay, None);
    }
}

//! Session lifecycle: connect, serve, and one teardown path.

use std::{
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, PoisonError, Weak},
    time::Duration,
};

use async_trait::async_trait;
use futures::FutureExt;
use mcp_resilience_core::{Transport, TransportError};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// How long a single teardown step may take before it is abandoned.
pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type returned by [`ScopedResource::release`].
pub type ReleaseError = Box<dyn std::error::Error + Send + Sync>;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Disconnected,
    Connecting,
    Ready,
    Closing,
    Closed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Lifecycle error.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Session already started (state: {0})")]
    AlreadyStarted(LifecycleState),
    #[error("Handshake failed: {0}")]
    Handshake(#[source] TransportError),
    #[error("Session not ready (state: {0})")]
    NotReady(LifecycleState),
}

/// A teardown step that failed. Logged and collected, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to release {resource}: {message}")]
pub struct TeardownError {
    pub resource: String,
    pub message: String,
}

/// Outcome of a teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub failures: Vec<TeardownError>,
}

impl TeardownReport {
    /// Whether every step succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A resource owned by the session scope and released exactly once on close.
#[async_trait]
pub trait ScopedResource: Send {
    /// Name used in logs and teardown reports.
    fn name(&self) -> &str;

    /// Release the resource.
    async fn release(self: Box<Self>) -> Result<(), ReleaseError>;
}

/// Background tasks spawned on behalf of the session.
///
/// Releasing cancels the tasks' token and waits for all of them to finish.
pub struct TaskScope {
    name: String,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl TaskScope {
    #[must_use]
    pub fn new(name: impl Into<String>, tracker: TaskTracker, cancel: CancellationToken) -> Self {
        Self {
            name: name.into(),
            tracker,
            cancel,
        }
    }
}

#[async_trait]
impl ScopedResource for TaskScope {
    fn name(&self) -> &str {
        &self.name
    }

    async fn release(self: Box<Self>) -> Result<(), ReleaseError> {
        self.tracker.close();
        self.cancel.cancel();
        self.tracker.wait().await;
        Ok(())
    }
}

struct Scope<T> {
    session: Option<Arc<T>>,
    resources: Vec<Box<dyn ScopedResource>>,
}

struct Inner<T: Transport + 'static> {
    state: watch::Sender<LifecycleState>,
    scope: Mutex<Scope<T>>,
    cancel: CancellationToken,
    release_timeout: Duration,
}

impl<T: Transport + 'static> Drop for Inner<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
        if matches!(
            *self.state.borrow(),
            LifecycleState::Closing | LifecycleState::Closed
        ) {
            return;
        }

        let scope = self.scope.get_mut().unwrap_or_else(PoisonError::into_inner);
        let session = scope.session.take();
        let resources = std::mem::take(&mut scope.resources);
        if session.is_none() && resources.is_empty() {
            return;
        }

        let limit = self.release_timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::warn!("Session dropped without close, tearing down");
                runtime.spawn(async move {
                    let report = teardown(session, resources, limit).await;
                    if !report.is_clean() {
                        tracing::warn!(failures = report.failures.len(), "Dropped session closed with teardown failures");
                    }
                });
            }
            Err(_) => {
                tracing::error!("Session dropped outside a runtime, teardown skipped");
            }
        }
    }
}

/// Owns a session handle and everything acquired with it.
///
/// `Disconnected -> Connecting -> Ready -> Closing -> Closed`. Closing can
/// start from any state; handshake failure goes straight to teardown. Every
/// exit path (explicit close, cancellation, fatal error) runs the same
/// teardown: the session handle is closed first, then the scoped resources
/// in reverse acquisition order. Teardown runs on its own task, so it
/// finishes even when the caller is cancelled.
pub struct SessionLifecycle<T: Transport + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport + 'static> Clone for SessionLifecycle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport + 'static> Default for SessionLifecycle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport + 'static> SessionLifecycle<T> {
    /// Create a disconnected lifecycle.
    #[must_use]
    pub fn new() -> Self {
        Self::with_release_timeout(DEFAULT_RELEASE_TIMEOUT)
    }

    /// Create a disconnected lifecycle with a custom per-step teardown limit.
    #[must_use]
    pub fn with_release_timeout(release_timeout: Duration) -> Self {
        let (state, _) = watch::channel(LifecycleState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                state,
                scope: Mutex::new(Scope {
                    session: None,
                    resources: Vec::new(),
                }),
                cancel: CancellationToken::new(),
                release_timeout,
            }),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.inner.state.borrow()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.inner.state.subscribe()
    }

    /// Root cancellation token. Fires when the session closes.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Cancel the session. Teardown follows on a background task.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    /// Take ownership of `transport` and `resources`, then handshake.
    ///
    /// Resources are released in reverse order during teardown.
    ///
    /// # Errors
    /// Returns [`LifecycleError::AlreadyStarted`] unless disconnected, and
    /// [`LifecycleError::Handshake`] if the handshake fails. A failed
    /// handshake leaves the lifecycle closed.
    pub async fn connect(
        &self,
        transport: T,
        resources: Vec<Box<dyn ScopedResource>>,
    ) -> Result<(), LifecycleError> {
        // The session is registered under the scope lock before `Connecting`
        // is published, so a concurrent close always finds it.
        let session = Arc::new(transport);
        {
            let mut scope = self.lock_scope();
            let claimed = self.inner.state.send_if_modified(|state| {
                if *state == LifecycleState::Disconnected {
                    *state = LifecycleState::Connecting;
                    true
                } else {
                    false
                }
            });
            if !claimed {
                return Err(LifecycleError::AlreadyStarted(self.state()));
            }
            scope.session = Some(Arc::clone(&session));
            scope.resources = resources;
        }

        tracing::debug!("Starting session handshake");
        let handshake = tokio::select! {
            result = session.initialize() => result,
            () = self.inner.cancel.cancelled() => Err(TransportError::Cancelled),
        };
        if let Err(e) = handshake {
            tracing::error!(error = %e, "Session handshake failed");
            self.close().await;
            return Err(LifecycleError::Handshake(e));
        }

        let ready = self.inner.state.send_if_modified(|state| {
            if *state == LifecycleState::Connecting {
                *state = LifecycleState::Ready;
                true
            } else {
                false
            }
        });
        if !ready {
            return Err(LifecycleError::NotReady(self.state()));
        }

        self.spawn_cancel_watcher();
        tracing::info!("Session ready");
        Ok(())
    }

    /// The live session handle.
    ///
    /// # Errors
    /// Returns [`LifecycleError::NotReady`] unless the session is ready.
    pub fn handle(&self) -> Result<Arc<T>, LifecycleError> {
        let state = self.state();
        if state != LifecycleState::Ready {
            return Err(LifecycleError::NotReady(state));
        }
        self.lock_scope()
            .session
            .clone()
            .ok_or(LifecycleError::NotReady(state))
    }

    /// Tear the session down.
    ///
    /// Idempotent. The first caller performs the teardown; later or
    /// concurrent callers wait until the state reaches `Closed` and get an
    /// empty report.
    pub async fn close(&self) -> TeardownReport {
        let claimed = self.inner.state.send_if_modified(|state| match state {
            LifecycleState::Closing | LifecycleState::Closed => false,
            _ => {
                *state = LifecycleState::Closing;
                true
            }
        });
        if !claimed {
            self.closed().await;
            return TeardownReport::default();
        }

        tracing::info!("Closing session");
        self.inner.cancel.cancel();

        let (session, resources) = {
            let mut scope = self.lock_scope();
            (scope.session.take(), std::mem::take(&mut scope.resources))
        };

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let report = teardown(session, resources, inner.release_timeout).await;
            inner.state.send_replace(LifecycleState::Closed);
            report
        });

        match task.await {
            Ok(report) => {
                if report.is_clean() {
                    tracing::info!("Session closed");
                } else {
                    tracing::warn!(failures = report.failures.len(), "Session closed with teardown failures");
                }
                report
            }
            Err(e) => {
                tracing::error!(error = %e, "Teardown task failed");
                self.inner.state.send_replace(LifecycleState::Closed);
                TeardownReport {
                    failures: vec![TeardownError {
                        resource: "teardown".to_string(),
                        message: e.to_string(),
                    }],
                }
            }
        }
    }

    /// Wait until the lifecycle reaches `Closed`.
    pub async fn closed(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| *state == LifecycleState::Closed).await;
    }

    fn spawn_cancel_watcher(&self) {
        let token = self.inner.cancel.clone();
        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            token.cancelled().await;
            if let Some(inner) = weak.upgrade() {
                tracing::debug!("Session cancelled, tearing down");
                Self { inner }.close().await;
            }
        });
    }

    fn lock_scope(&self) -> std::sync::MutexGuard<'_, Scope<T>> {
        self.inner
            .scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn teardown<T: Transport>(
    session: Option<Arc<T>>,
    resources: Vec<Box<dyn ScopedResource>>,
    limit: Duration,
) -> TeardownReport {
    let mut report = TeardownReport::default();

    if let Some(session) = session {
        if let Some(failure) = release_step("session", limit, session.close()).await {
            report.failures.push(failure);
        }
    }

    for resource in resources.into_iter().rev() {
        let name = resource.name().to_string();
        if let Some(failure) = release_step(&name, limit, resource.release()).await {
            report.failures.push(failure);
        }
    }

    report
}

async fn release_step<F, E>(resource: &str, limit: Duration, step: F) -> Option<TeardownError>
where
    F: Future<Output = Result<(), E>>,
    E: fmt::Display,
{
    let message = match tokio::time::timeout(limit, AssertUnwindSafe(step).catch_unwind()).await {
        Ok(Ok(Ok(()))) => {
            tracing::debug!(resource, "Released");
            return None;
        }
        Ok(Ok(Err(e))) => e.to_string(),
        Ok(Err(_)) => "panicked during release".to_string(),
        Err(_) => format!("release timed out after {limit:?}"),
    };
    tracing::error!(resource, "Teardown step failed: {message}");
    Some(TeardownError {
        resource: resource.to_string(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use mcp_resilience_core::{Arguments, OperationInfo, RawResponse};
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[derive(Default)]
    struct FakeTransport {
        fail_handshake: bool,
        hang_handshake: bool,
        fail_close: bool,
        closes: Arc<AtomicUsize>,
        log: Log,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn initialize(&self) -> Result<(), TransportError> {
            if self.hang_handshake {
                std::future::pending::<()>().await;
            }
            if self.fail_handshake {
                Err(TransportError::Io("refused".into()))
            } else {
                Ok(())
            }
        }

        async fn list_operations(&self) -> Result<Vec<OperationInfo>, TransportError> {
            Ok(Vec::new())
        }

        async fn call_operation(
            &self,
            _name: &str,
            _arguments: &Arguments,
            _cancel: CancellationToken,
        ) -> Result<RawResponse, TransportError> {
            Ok(RawResponse::Null)
        }

        async fn read_resource(
            &self,
            _uri: &str,
            _cancel: CancellationToken,
        ) -> Result<RawResponse, TransportError> {
            Ok(RawResponse::Null)
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push("session".into());
            if self.fail_close {
                Err(TransportError::Io("broken pipe".into()))
            } else {
                Ok(())
            }
        }
    }

    enum Behavior {
        Ok,
        Fail,
        Hang,
    }

    struct Tracked {
        name: String,
        behavior: Behavior,
        log: Log,
    }

    fn tracked(name: &str, behavior: Behavior, log: &Log) -> Box<dyn ScopedResource> {
        Box::new(Tracked {
            name: name.to_string(),
            behavior,
            log: Arc::clone(log),
        })
    }

    #[async_trait]
    impl ScopedResource for Tracked {
        fn name(&self) -> &str {
            &self.name
        }

        async fn release(self: Box<Self>) -> Result<(), ReleaseError> {
            self.log.lock().unwrap().push(self.name.clone());
            match self.behavior {
                Behavior::Ok => Ok(()),
                Behavior::Fail => Err("refused".into()),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }
        }
    }

    #[tokio::test]
    async fn test_connect_and_close() {
        let log = Log::default();
        let transport = FakeTransport {
            log: Arc::clone(&log),
            ..Default::default()
        };
        let closes = Arc::clone(&transport.closes);
        let lifecycle = SessionLifecycle::new();

        assert_ok!(
            lifecycle
                .connect(transport, vec![tracked("first", Behavior::Ok, &log), tracked("second", Behavior::Ok, &log)])
                .await
        );
        assert_eq!(lifecycle.state(), LifecycleState::Ready);
        assert_ok!(lifecycle.handle());

        let report = lifecycle.close().await;
        assert!(report.is_clean());
        assert_eq!(lifecycle.state(), LifecycleState::Closed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(entries(&log), ["session", "second", "first"]);
        assert!(lifecycle.cancellation().is_cancelled());
    }

    #[tokio::test]
    async fn test_handle_requires_ready() {
        let lifecycle = SessionLifecycle::<FakeTransport>::new();
        assert!(matches!(
            lifecycle.handle(),
            Err(LifecycleError::NotReady(LifecycleState::Disconnected))
        ));

        assert_ok!(lifecycle.connect(FakeTransport::default(), Vec::new()).await);
        lifecycle.close().await;
        assert!(matches!(
            lifecycle.handle(),
            Err(LifecycleError::NotReady(LifecycleState::Closed))
        ));
    }

    #[tokio::test]
    async fn test_connect_twice() {
        let lifecycle = SessionLifecycle::new();
        assert_ok!(lifecycle.connect(FakeTransport::default(), Vec::new()).await);
        let err = assert_err!(lifecycle.connect(FakeTransport::default(), Vec::new()).await);
        assert!(matches!(err, LifecycleError::AlreadyStarted(LifecycleState::Ready)));
    }

    #[tokio::test]
    async fn test_handshake_failure_tears_down() {
        let log = Log::default();
        let transport = FakeTransport {
            fail_handshake: true,
            log: Arc::clone(&log),
            ..Default::default()
        };
        let lifecycle = SessionLifecycle::new();

        let err = assert_err!(
            lifecycle
                .connect(transport, vec![tracked("tasks", Behavior::Ok, &log)])
                .await
        );
        assert!(matches!(err, LifecycleError::Handshake(_)));
        assert_eq!(lifecycle.state(), LifecycleState::Closed);
        assert_eq!(entries(&log), ["session", "tasks"]);
    }

    #[tokio::test]
    async fn test_concurrent_close_tears_down_once() {
        let transport = FakeTransport::default();
        let closes = Arc::clone(&transport.closes);
        let lifecycle = SessionLifecycle::new();
        assert_ok!(lifecycle.connect(transport, Vec::new()).await);

        let (a, b) = tokio::join!(lifecycle.close(), lifecycle.close());
        assert!(a.is_clean() && b.is_clean());
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        lifecycle.close().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_teardown() {
        let log = Log::default();
        let transport = FakeTransport {
            fail_close: true,
            log: Arc::clone(&log),
            ..Default::default()
        };
        let lifecycle = SessionLifecycle::new();
        assert_ok!(
            lifecycle
                .connect(transport, vec![tracked("a", Behavior::Ok, &log), tracked("b", Behavior::Fail, &log)])
                .await
        );

        let report = lifecycle.close().await;
        assert_eq!(lifecycle.state(), LifecycleState::Closed);
        assert_eq!(entries(&log), ["session", "b", "a"]);
        let failed: Vec<_> = report.failures.iter().map(|f| f.resource.as_str()).collect();
        assert_eq!(failed, ["session", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_resource_is_abandoned() {
        let log = Log::default();
        let lifecycle = SessionLifecycle::with_release_timeout(Duration::from_secs(1));
        assert_ok!(
            lifecycle
                .connect(
                    FakeTransport::default(),
                    vec![tracked("after", Behavior::Ok, &log), tracked("stuck", Behavior::Hang, &log)],
                )
                .await
        );

        let report = lifecycle.close().await;
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].message.contains("timed out"));
        assert_eq!(entries(&log), ["stuck", "after"]);
        assert_eq!(lifecycle.state(), LifecycleState::Closed);
    }

    #[tokio::test]
    async fn test_cancel_triggers_teardown() {
        let transport = FakeTransport::default();
        let closes = Arc::clone(&transport.closes);
        let lifecycle = SessionLifecycle::new();
        assert_ok!(lifecycle.connect(transport, Vec::new()).await);

        lifecycle.cancel();
        lifecycle.closed().await;
        assert_eq!(lifecycle.state(), LifecycleState::Closed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_survives_dropped_caller() {
        let log = Log::default();
        let lifecycle = SessionLifecycle::with_release_timeout(Duration::from_secs(10));
        assert_ok!(
            lifecycle
                .connect(FakeTransport::default(), vec![tracked("stuck", Behavior::Hang, &log)])
                .await
        );

        let dropped = tokio::time::timeout(Duration::from_millis(10), lifecycle.close()).await;
        assert!(dropped.is_err());
        assert_eq!(lifecycle.state(), LifecycleState::Closing);

        lifecycle.closed().await;
        assert_eq!(lifecycle.state(), LifecycleState::Closed);
    }

    #[tokio::test]
    async fn test_task_scope_drains_tasks() {
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let token = cancel.clone();
            let finished = Arc::clone(&finished);
            tracker.spawn(async move {
                token.cancelled().await;
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }

        let scope = Box::new(TaskScope::new("tasks", tracker, cancel));
        assert_eq!(scope.name(), "tasks");
        assert_ok!(scope.release().await);
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_during_handshake_closes_session() {
        let transport = FakeTransport {
            hang_handshake: true,
            ..Default::default()
        };
        let closes = Arc::clone(&transport.closes);
        let lifecycle = SessionLifecycle::new();
        let mut states = lifecycle.subscribe();

        let connecting = tokio::spawn({
            let lifecycle = lifecycle.clone();
            async move { lifecycle.connect(transport, Vec::new()).await }
        });
        assert_ok!(states.wait_for(|s| *s == LifecycleState::Connecting).await);

        lifecycle.close().await;
        let result = assert_ok!(connecting.await);
        assert!(matches!(
            result,
            Err(LifecycleError::Handshake(TransportError::Cancelled))
        ));
        assert_eq!(lifecycle.state(), LifecycleState::Closed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_lifecycle_tears_down() {
        let log = Log::default();
        let transport = FakeTransport {
            log: Arc::clone(&log),
            ..Default::default()
        };
        let closes = Arc::clone(&transport.closes);
        let lifecycle = SessionLifecycle::new();
        assert_ok!(
            lifecycle
                .connect(transport, vec![tracked("first", Behavior::Ok, &log)])
                .await
        );
        let token = lifecycle.cancellation();

        drop(lifecycle);
        assert!(token.is_cancelled());
        assert_ok!(
            tokio::time::timeout(Duration::from_secs(5), async {
                while entries(&log).len() < 2 {
                    tokio::task::yield_now().await;
                }
            })
            .await
        );
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(entries(&log), ["session", "first"]);
    }
}

//! Resilient client façade.

use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use mcp_resilience_core::{
    Arguments, Invocation, NormalizedResult, Note, NoteStorage, OperationInfo, ResultCache,
    Transport,
};
use mcp_resilience_executor::{RetryExecutor, RunError};
use mcp_resilience_session::{
    FallbackStore, LifecycleState, MemoryNoteStore, ScopedResource, SessionLifecycle,
    TeardownReport,
};

use crate::{config::ClientConfig, error::ClientError, memo, mirror::SessionMirror};

/// Options for [`ResilientClient::invoke`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvokeOptions {
    /// Serve from and store into the result cache.
    pub cacheable: bool,
    /// TTL for the stored result instead of the cache default.
    pub ttl_override: Option<Duration>,
}

impl InvokeOptions {
    /// Cacheable with the default TTL.
    #[must_use]
    pub const fn cached() -> Self {
        Self {
            cacheable: true,
            ttl_override: None,
        }
    }

    /// Cacheable with a custom TTL.
    #[must_use]
    pub const fn cached_for(ttl: Duration) -> Self {
        Self {
            cacheable: true,
            ttl_override: Some(ttl),
        }
    }
}

/// Options for [`ResilientClient::append_note`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOptions {
    /// Wait for the remote write (bounded by its timeout) before returning.
    pub blocking: bool,
}

/// Client for a single remote session.
///
/// Owns the session lifecycle. Every remote call is routed through the
/// retry executor, which borrows the session handle for the duration of the
/// call. Cancelling the client, or dropping an in-flight `invoke`, tears the
/// session down through the same path as [`ResilientClient::shutdown`].
pub struct ResilientClient<T: Transport + 'static> {
    lifecycle: SessionLifecycle<T>,
    executor: RetryExecutor,
    cache: ResultCache<NormalizedResult>,
    operations: RwLock<Vec<OperationInfo>>,
    mirror: Arc<SessionMirror<T>>,
    notes: FallbackStore,
}

impl<T: Transport + 'static> ResilientClient<T> {
    /// Connect over `transport` with in-memory note storage.
    ///
    /// # Errors
    /// Returns [`ClientError::Connect`] if the handshake fails, or the
    /// failure of the initial operation listing.
    pub async fn connect(transport: T, config: ClientConfig) -> Result<Self, ClientError> {
        Self::connect_with_storage(transport, config, Arc::new(MemoryNoteStore::new())).await
    }

    /// Connect over `transport`, keeping notes in `storage`.
    ///
    /// # Errors
    /// Same as [`ResilientClient::connect`].
    pub async fn connect_with_storage(
        transport: T,
        config: ClientConfig,
        storage: Arc<dyn NoteStorage>,
    ) -> Result<Self, ClientError> {
        let lifecycle = SessionLifecycle::with_release_timeout(config.release_timeout);
        let mirror = Arc::new(SessionMirror::new(
            lifecycle.clone(),
            config.mirror_executor(),
            config.mirror.clone(),
        ));
        let notes = FallbackStore::new(storage, config.fallback_config())
            .with_mirror(mirror.clone())
            .with_cancellation(lifecycle.cancellation().child_token());

        let tasks: Box<dyn ScopedResource> = Box::new(notes.task_scope());
        lifecycle.connect(transport, vec![tasks]).await?;

        let client = Self {
            lifecycle,
            executor: config.executor(),
            cache: ResultCache::new(config.cache_max_size, config.cache_ttl),
            operations: RwLock::new(Vec::new()),
            mirror,
            notes,
        };

        match client.refresh_operations().await {
            Ok(operations) => {
                let names: Vec<&str> = operations.iter().map(|op| op.name.as_str()).collect();
                tracing::info!(operations = ?names, "Connected");
                Ok(client)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to list operations, closing session");
                client.lifecycle.close().await;
                Err(e)
            }
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Call a remote operation.
    ///
    /// With `cacheable`, a live cached result is returned without touching
    /// the transport, and a fresh result is stored. A fatal transport error
    /// or cancellation closes the session.
    ///
    /// # Errors
    /// Returns [`ClientError::RetryExhausted`] when every attempt failed,
    /// [`ClientError::Cancelled`] if the client was cancelled, and
    /// [`ClientError::NotReady`] if the session is not open.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Arguments,
        options: InvokeOptions,
    ) -> Result<NormalizedResult, ClientError> {
        let session = self.lifecycle.handle()?;
        let invocation = Invocation::with_arguments(name, arguments);

        let key = options.cacheable.then(|| invocation.cache_key());
        if let Some(hit) = key.as_deref().and_then(|key| self.cache.get(key)) {
            tracing::debug!(operation = name, "Cache hit");
            return Ok(hit);
        }

        let cancel = self.lifecycle.cancellation();
        let guard = cancel.clone().drop_guard();
        let outcome = self.executor.run(session.as_ref(), &invocation, &cancel).await;
        guard.disarm();
        drop(session);

        match outcome {
            Ok(result) => {
                if let Some(key) = key {
                    match options.ttl_override {
                        Some(ttl) => self.cache.set_with_ttl(key, result.clone(), ttl),
                        None => self.cache.set(key, result.clone()),
                    }
                }
                Ok(result)
            }
            Err(e) => {
                self.close_if_unusable(&e).await;
                Err(e.into())
            }
        }
    }

    /// Append a durable note. Never fails.
    ///
    /// Non-blocking appends return the local note at once; blocking appends
    /// wait for the remote write and report `Both` when it succeeded.
    pub async fn append_note(&self, text: &str, category: &str, options: AppendOptions) -> Note {
        if options.blocking {
            self.notes.append_confirmed(text, category).await
        } else {
            self.notes.append(text, category)
        }
    }

    /// Notes of a category, oldest first. Never fails.
    pub async fn read_notes(&self, category: &str) -> Vec<Note> {
        self.notes.read(category).await
    }

    /// Operations cached at connect or at the last refresh.
    #[must_use]
    pub fn list_operations(&self) -> Vec<OperationInfo> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Look up one cached operation.
    #[must_use]
    pub fn operation(&self, name: &str) -> Option<OperationInfo> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|op| op.name == name)
            .cloned()
    }

    /// Fetch the operation list again and replace the cached copy.
    ///
    /// # Errors
    /// Same as [`ResilientClient::invoke`].
    pub async fn refresh_operations(&self) -> Result<Vec<OperationInfo>, ClientError> {
        let session = self.lifecycle.handle()?;
        let cancel = self.lifecycle.cancellation();
        let deadline = self.executor.timeout_policy().default_timeout();

        let outcome = self
            .executor
            .run_with("list_operations", deadline, &cancel, |_| session.list_operations())
            .await;
        let operations = match outcome {
            Ok(operations) => operations,
            Err(e) => {
                self.close_if_unusable(&e).await;
                return Err(e.into());
            }
        };

        *self.operations.write().unwrap_or_else(PoisonError::into_inner) = operations.clone();
        Ok(operations)
    }

    /// Category of the notes making up the insights memo.
    #[must_use]
    pub fn insight_category(&self) -> &str {
        &self.mirror.config().insight_category
    }

    /// The insights memo.
    ///
    /// Read from the remote memo resource; rendered from the local insight
    /// notes when the resource cannot be read.
    pub async fn insights_memo(&self) -> String {
        let category = self.insight_category();
        let cancel = self.lifecycle.cancellation();

        match self.mirror.read_memo(category, &cancel).await {
            Ok(NormalizedResult::Empty) => memo::render_local(&self.notes.local(category)),
            Ok(NormalizedResult::Opaque(text)) => text,
            Ok(result) => match result.into_value() {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            },
            Err(e) => {
                tracing::warn!(error = %e, "Remote memo unavailable, rendering local insights");
                memo::render_local(&self.notes.local(category))
            }
        }
    }

    /// Drop every cached result.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Wait for background note writes started so far.
    pub async fn settle_notes(&self) {
        self.notes.settle().await;
    }

    /// Cancel in-flight calls and tear the session down in the background.
    pub fn cancel(&self) {
        self.lifecycle.cancel();
    }

    /// Close the session. Idempotent; never fails.
    pub async fn shutdown(&self) -> TeardownReport {
        let report = self.lifecycle.close().await;
        self.cache.clear();
        report
    }

    async fn close_if_unusable(&self, e: &RunError) {
        if e.is_fatal() || matches!(e, RunError::Cancelled { .. }) {
            tracing::warn!(error = %e, "Session unusable, closing");
            self.lifecycle.close().await;
        }
    }
}

impl<T: Transport + 'static> Drop for ResilientClient<T> {
    /// Cancels in-flight work; the session is torn down in the background.
    fn drop(&mut self) {
        self.lifecycle.cancel();
    }
}

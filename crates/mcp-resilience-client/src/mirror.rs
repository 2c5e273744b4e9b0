//! Note mirror backed by the live session.

use async_trait::async_trait;
use mcp_resilience_core::{
    Invocation, MirroredNote, NormalizedResult, Note, NoteMirror, Transport, TransportError,
};
use mcp_resilience_executor::{AttemptError, RetryExecutor, RunError};
use mcp_resilience_session::SessionLifecycle;
use tokio_util::sync::CancellationToken;

use crate::{config::MirrorConfig, memo};

/// Pushes notes through the append operation of their category and reads
/// them back from its memo resource. Every call is a single attempt.
pub struct SessionMirror<T: Transport + 'static> {
    lifecycle: SessionLifecycle<T>,
    executor: RetryExecutor,
    config: MirrorConfig,
}

impl<T: Transport + 'static> SessionMirror<T> {
    #[must_use]
    pub const fn new(
        lifecycle: SessionLifecycle<T>,
        executor: RetryExecutor,
        config: MirrorConfig,
    ) -> Self {
        Self {
            lifecycle,
            executor,
            config,
        }
    }

    /// Mirror settings.
    #[must_use]
    pub const fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Read the memo resource of a category.
    ///
    /// # Errors
    /// Returns [`TransportError::Remote`] if the category is not mirrored,
    /// [`TransportError::Disconnected`] if the session is not ready,
    /// otherwise the failure of the single read attempt.
    pub async fn read_memo(
        &self,
        category: &str,
        cancel: &CancellationToken,
    ) -> Result<NormalizedResult, TransportError> {
        let uri = self
            .config
            .resource_for(category)
            .ok_or_else(|| unmirrored(category))?;
        let session = self.session()?;
        self.executor
            .read(session.as_ref(), uri, cancel)
            .await
            .map_err(into_transport)
    }

    fn session(&self) -> Result<std::sync::Arc<T>, TransportError> {
        self.lifecycle
            .handle()
            .map_err(|e| TransportError::Disconnected(e.to_string()))
    }
}

#[async_trait]
impl<T: Transport + 'static> NoteMirror for SessionMirror<T> {
    fn mirrors(&self, category: &str) -> bool {
        self.config.mirrors(category)
    }

    async fn push(&self, note: &Note, cancel: CancellationToken) -> Result<(), TransportError> {
        let operation = self
            .config
            .append_operation_for(&note.category)
            .ok_or_else(|| unmirrored(&note.category))?;
        let session = self.session()?;
        let invocation = Invocation::new(operation)
            .arg(self.config.text_argument.as_str(), note.text.as_str());
        let reply = self
            .executor
            .run(session.as_ref(), &invocation, &cancel)
            .await
            .map_err(into_transport)?;
        tracing::debug!(category = %note.category, reply = ?reply.as_text(), "Note appended remotely");
        Ok(())
    }

    async fn fetch(
        &self,
        category: &str,
        cancel: CancellationToken,
    ) -> Result<Vec<MirroredNote>, TransportError> {
        let memo = self.read_memo(category, &cancel).await?;
        Ok(memo::parse_entries(&memo))
    }
}

fn unmirrored(category: &str) -> TransportError {
    TransportError::Remote(format!("no remote memo for category {category}"))
}

fn into_transport(e: RunError) -> TransportError {
    match e {
        RunError::Exhausted {
            last_error: AttemptError::Transport(e),
            ..
        } => e,
        RunError::Exhausted {
            last_error: AttemptError::TimedOut(e),
            ..
        } => TransportError::Io(e.to_string()),
        RunError::Cancelled { .. } => TransportError::Cancelled,
    }
}

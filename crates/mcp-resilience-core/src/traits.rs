//! Boundary traits for the remote session and the note mirror.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    invocation::Arguments,
    note::{MirroredNote, Note, NoteId},
};

/// Raw, not yet normalized response payload.
pub type RawResponse = Value;

/// A remote operation as advertised by the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationInfo {
    /// Operation name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments.
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

/// Transport error.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The session is gone and will not come back.
    #[error("Disconnected: {0}")]
    Disconnected(String),
    #[error("I/O error: {0}")]
    Io(String),
    /// The remote side answered with an error.
    #[error("Remote error: {0}")]
    Remote(String),
    /// The call stopped after its cancellation token fired.
    #[error("Call cancelled")]
    Cancelled,
}

impl TransportError {
    /// Whether the session cannot serve further calls.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Trait for the remote session collaborator.
///
/// Implementations handle connection setup, framing, and capability
/// negotiation. Long-running calls should watch `cancel` and return
/// [`TransportError::Cancelled`] promptly once it fires.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the protocol handshake.
    async fn initialize(&self) -> Result<(), TransportError>;

    /// List the operations the session exposes.
    async fn list_operations(&self) -> Result<Vec<OperationInfo>, TransportError>;

    /// Call a named operation.
    async fn call_operation(
        &self,
        name: &str,
        arguments: &Arguments,
        cancel: CancellationToken,
    ) -> Result<RawResponse, TransportError>;

    /// Read an addressable resource.
    async fn read_resource(
        &self,
        uri: &str,
        cancel: CancellationToken,
    ) -> Result<RawResponse, TransportError>;

    /// Close the session.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Remote mirror for durable notes.
#[async_trait]
pub trait NoteMirror: Send + Sync {
    /// Whether notes of `category` have a remote copy. Notes of other
    /// categories are neither pushed nor fetched.
    fn mirrors(&self, _category: &str) -> bool {
        true
    }

    /// Persist a note remotely.
    async fn push(&self, note: &Note, cancel: CancellationToken) -> Result<(), TransportError>;

    /// Fetch the remote notes of a category.
    async fn fetch(
        &self,
        category: &str,
        cancel: CancellationToken,
    ) -> Result<Vec<MirroredNote>, TransportError>;
}

/// Local note storage.
///
/// Writes are assumed reliable, so nothing here can fail.
pub trait NoteStorage: Send + Sync {
    /// Store a new note.
    fn insert(&self, note: Note);

    /// Record that the remote mirror holds a note. Returns the updated note.
    fn mark_mirrored(&self, id: NoteId) -> Option<Note>;

    /// Notes of a category, oldest first.
    fn list(&self, category: &str) -> Vec<Note>;
}

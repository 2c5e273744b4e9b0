//! Resilient client for remote tool-invocation sessions.
//!
//! `ResilientClient` composes the lower layers: cached, retried and
//! normalized operation calls, local-first durable notes, and a session
//! lifecycle with a single teardown path.

pub mod client;
pub mod config;
pub mod error;
pub mod insight;
pub mod memo;
pub mod mirror;
pub mod query;
pub mod sqlite;

pub use client::{AppendOptions, InvokeOptions, ResilientClient};
pub use config::{ClientConfig, ClientSettings, MirrorConfig, MirrorTarget};
pub use error::ClientError;
pub use mirror::SessionMirror;
pub use query::{QueryError, QueryType, validate_query};
pub use sqlite::Row;

pub use mcp_resilience_core::{
    Arguments, NormalizedResult, Note, OperationInfo, Origin, Transport, TransportError,
};
pub use mcp_resilience_session::{LifecycleState, TeardownReport};

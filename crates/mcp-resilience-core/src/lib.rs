//! Core types for resilient remote tool invocation.
//!
//! This crate provides the fundamental building blocks:
//! - `Invocation` - Named remote call with a stable cache key
//! - `normalize` - Reduce any response payload to a `NormalizedResult`
//! - `ResultCache` - Bounded TTL cache with oldest-insertion eviction
//! - `Note` - Durable note records
//! - Transport, note mirror, and note storage traits

pub mod cache;
pub mod invocation;
pub mod literal;
pub mod normalize;
pub mod note;
pub mod traits;

pub use cache::ResultCache;
pub use invocation::{Arguments, Invocation};
pub use normalize::{NormalizedResult, normalize};
pub use note::{MirroredNote, Note, NoteId, Origin};
pub use traits::{
    NoteMirror, NoteStorage, OperationInfo, RawResponse, Transport, TransportError,
};

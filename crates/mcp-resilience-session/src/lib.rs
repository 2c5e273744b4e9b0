//! Session lifecycle and note storage for resilient remote sessions.
//!
//! Provides:
//! - `SessionLifecycle` - Single-owner session state machine with one teardown path
//! - `FallbackStore` - Local-first notes with a best-effort remote mirror
//! - Storage implementations (memory)

pub mod fallback;
pub mod lifecycle;
pub mod storage;

pub use fallback::{FallbackConfig, FallbackStore};
pub use lifecycle::{
    LifecycleError, LifecycleState, ScopedResource, SessionLifecycle, TaskScope, TeardownError,
    TeardownReport,
};
#[cfg(feature = "memory")]
pub use storage::MemoryNoteStore;

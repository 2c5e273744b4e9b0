//! Timeout guard and retry executor for remote operations.
//!
//! Provides:
//! - `TimeoutGuard` - Race one operation against a deadline
//! - `RetryPolicy` / `TimeoutPolicy` - Fixed-delay retry and per-operation deadlines
//! - `RetryExecutor` - Retried, normalized transport calls

pub mod policy;
pub mod retry;
pub mod timeout;

pub use policy::{RetryPolicy, TimeoutPolicy};
pub use retry::{AttemptError, AttemptRecord, RetryExecutor, RunError};
pub use timeout::{Interrupted, TimeoutError, TimeoutGuard, with_timeout};

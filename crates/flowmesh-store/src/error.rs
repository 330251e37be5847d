//! Error types for coordination store operations.

use thiserror::Error;

/// Result type alias for coordination store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the coordination store.
///
/// Every variant is transient from the caller's point of view: control
/// loops log the error, skip the tick, and try again next interval.
/// `Backend` is what transport implementations map their own failures
/// into; the in-memory backend never produces it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("not found: {0}")]
    NotFound(String),
}

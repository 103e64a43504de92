use thiserror::Error;

/// Errors returned by a [`crate::store::StateStore`] or
/// [`crate::lock::DistributedLock`] implementation.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("backend connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("lock not held")]
    LockNotHeld,

    #[error("operation timed out")]
    Timeout,

    #[error("backend error: {0}")]
    Backend(String),
}

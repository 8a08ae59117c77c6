//! Error types for broker operations.

use std::time::Duration;

use thiserror::Error;

use super::query::CorrelationKey;

/// Errors produced by broker components.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The work queue stayed full for the whole enqueue window.
    #[error("queue full: capacity {capacity}")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },
    /// Nothing is registered under the key (never submitted or expired).
    #[error("no result registered for {0}")]
    NotFound(CorrelationKey),
    /// The result did not arrive before the wait deadline.
    #[error("timed out after {0:?} waiting for result")]
    Timeout(Duration),
    /// The waiting caller was canceled.
    #[error("wait canceled")]
    Canceled,
    /// The broker has been shut down.
    #[error("broker is shut down")]
    Shutdown,
    /// A different result was already published under the key.
    #[error("result already published for {0}")]
    AlreadyPublished(CorrelationKey),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Internal failure with context.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

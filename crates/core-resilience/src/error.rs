//! Error types for the resilience primitives

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// How a failure should be treated by retry logic.
///
/// Retry policy is a pure decision over this value; callers classify their
/// own error types into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Timeouts, network errors, rate limits, 5xx. Worth another attempt.
    Transient,
    /// Authentication and validation failures. Retrying will fail again.
    Permanent,
    /// Bad or missing configuration. Nothing changes until config is fixed.
    Configuration,
}

impl ErrorClass {
    /// Check if this class may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

/// Errors that can occur in resilience operations
#[derive(Debug, Error, Clone)]
pub enum ResilienceError {
    /// Connection pool is closed or has no permits left
    #[error("Connection pool is exhausted, no available connections")]
    PoolExhausted,

    /// Timed out waiting for a pooled connection
    #[error("Timed out after {0:?} waiting for a pooled connection")]
    AcquireTimeout(Duration),

    /// Connection creation failed
    #[error("Failed to create connection: {0}")]
    ConnectionCreation(String),

    /// Provider refused the connection (bad credentials, forbidden)
    #[error("Connection rejected: {0}")]
    ConnectionRejected(String),

    /// Connection creation failed because of configuration
    #[error("Invalid connection configuration: {0}")]
    Configuration(String),

    /// Timeout occurred
    #[error("Operation timeout after {0:?}")]
    Timeout(Duration),

    /// Cache backend failure
    #[error("Cache backend error: {0}")]
    Cache(String),

    /// A connection factory failed with its own error type.
    ///
    /// The original error is kept so callers can downcast it back.
    #[error("{error}")]
    Factory {
        class: ErrorClass,
        error: Arc<dyn std::error::Error + Send + Sync>,
    },
}

impl ResilienceError {
    /// Classify this error for retry decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            ResilienceError::PoolExhausted
            | ResilienceError::AcquireTimeout(_)
            | ResilienceError::ConnectionCreation(_)
            | ResilienceError::Timeout(_)
            | ResilienceError::Cache(_) => ErrorClass::Transient,
            ResilienceError::ConnectionRejected(_) => ErrorClass::Permanent,
            ResilienceError::Configuration(_) => ErrorClass::Configuration,
            ResilienceError::Factory { class, .. } => *class,
        }
    }

    /// Wrap a factory's own error, keeping it for a later downcast
    pub fn factory<E>(class: ErrorClass, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ResilienceError::Factory {
            class,
            error: Arc::new(error),
        }
    }

    /// Check if this error is transient and can be retried
    pub fn is_transient(&self) -> bool {
        self.class().is_retryable()
    }
}

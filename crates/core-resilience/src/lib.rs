//! Relay Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! This crate provides the building blocks the Relay engine composes into a
//! provider fallback chain. It includes:
//!
//! - **Circuit Breaker**: Stops sending work to a failing provider and tests recovery
//! - **Health Checker**: TTL-cached, deduplicated component probes
//! - **Connection Pool**: Bounded reuse of client connections with lifecycle limits
//! - **Retry Policy**: Pure retry decisions with exponential backoff and jitter
//! - **Cache**: Content-addressed result cache with TTL expiry
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Speech or any other provider domain
//! - Network protocols or vendor APIs
//! - Configuration file formats
//!
//! # Architecture
//!
//! ```text
//!            execute(op, input)
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────┐
//! │       Cache                             │  ← Skip the network on a hit
//! │  (Fingerprint → serialized result)      │
//! └─────────────┬───────────────────────────┘
//!               │ miss, for each provider:
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail-fast protection
//! │  (Consecutive + windowed failure rate)  │
//! └─────────────┬───────────────────────────┘
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Health Checker                    │  ← Skip known-bad providers
//! │  (Cached probes, short TTL)             │
//! └─────────────┬───────────────────────────┘
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Connection Pool + Retry Policy    │  ← Bounded attempts
//! │  (Reuse connections, backoff on error)  │
//! └─────────────┬───────────────────────────┘
//!               ▼
//!         External Provider
//! ```
//!
//! # Usage Example
//!
//! ```
//! use relay_core_resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     "deepgram",
//!     CircuitBreakerConfig {
//!         failure_threshold: 2,
//!         ..Default::default()
//!     },
//! );
//!
//! breaker.record_failure(Duration::from_millis(40));
//! breaker.record_failure(Duration::from_millis(40));
//! assert!(matches!(breaker.get_state(), CircuitState::Open { .. }));
//! assert!(!breaker.is_available());
//! ```

pub mod cache;
pub mod circuit_breaker;
pub mod connection_pool;
pub mod error;
pub mod health_checker;
pub mod retry;

// Re-export main types for convenience
pub use cache::{CacheBackend, CacheStats, Fingerprint, MemoryCache};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerGroup, CircuitMetrics, CircuitState,
};
pub use connection_pool::{Checkout, ConnectionFactory, ConnectionPool, PoolConfig, PoolStats};
pub use error::{ErrorClass, ResilienceError};
pub use health_checker::{
    ComponentHealth, HealthChecker, HealthCheckerConfig, HealthProbe, HealthRecord, HealthStatus,
    OverallHealth, ProbeError, ProbeOutcome, probe_fn,
};
pub use retry::{BackoffStrategy, RetryDecision, RetryPolicy};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use relay_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::cache::{CacheBackend, Fingerprint, MemoryCache};
    pub use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerGroup};
    pub use super::connection_pool::{ConnectionFactory, ConnectionPool, PoolConfig};
    pub use super::error::{ErrorClass, ResilienceError};
    pub use super::health_checker::{HealthChecker, HealthCheckerConfig, HealthProbe, HealthStatus};
    pub use super::retry::{RetryDecision, RetryPolicy};
}

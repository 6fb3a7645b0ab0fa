/*!
 * Relay - Provider orchestration and resilience engine
 *
 * Sits between application code and interchangeable external service
 * providers (speech-to-text, text-to-speech, ...) and gives each logical
 * operation:
 * - Priority-ordered failover across providers
 * - Per-provider circuit breakers
 * - Health-gated provider selection
 * - Pooled connections with classified retry and backoff
 * - A content-addressed result cache
 *
 * The primitives live in `relay-core-resilience`; this crate wires them
 * to the provider contract, configuration, logging and metrics.
 */

pub mod cli_style;
pub mod config;
pub mod connection_manager;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod provider;
pub mod registry;

// Re-export commonly used types
pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use orchestrator::{
    AggregatedFailure, ExecuteResponse, FallbackOrchestrator, OrchestratorBuilder,
    ProviderOutcome, ProviderReport, ServedBy,
};
pub use provider::{
    OperationRequest, Params, Payload, ProviderAdapter, ProviderConnection, ProviderDescriptor,
    ProviderError,
};
pub use registry::{ProviderRegistry, RegistryError};

pub use relay_core_resilience as resilience;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}

//! Prometheus metrics for the orchestration engine
//!
//! Each engine owns its own [`Registry`], so several orchestrators (or
//! parallel tests) never share counters.

use crate::error::Result;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use relay_core_resilience::CircuitState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

const ATTEMPT_OUTCOMES: [&str; 2] = ["success", "failure"];

/// Why a provider was passed over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    CircuitOpen,
    Unhealthy,
    Deadline,
    Configuration,
}

impl SkipReason {
    pub const ALL: [SkipReason; 4] = [
        SkipReason::CircuitOpen,
        SkipReason::Unhealthy,
        SkipReason::Deadline,
        SkipReason::Configuration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::CircuitOpen => "circuit_open",
            SkipReason::Unhealthy => "unhealthy",
            SkipReason::Deadline => "deadline",
            SkipReason::Configuration => "configuration",
        }
    }
}

/// Metric handles for one engine
pub struct RelayMetrics {
    registry: Registry,
    cache_lookups: CounterVec,
    provider_attempts: CounterVec,
    provider_skips: CounterVec,
    provider_latency: HistogramVec,
    breaker_state: IntGaugeVec,
    executions: CounterVec,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl RelayMetrics {
    /// Create and register all metrics
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        // Cache lookups
        let cache_lookups = CounterVec::new(
            Opts::new("relay_cache_lookups_total", "Result cache lookups"),
            &["operation", "result"],
        )?;
        registry.register(Box::new(cache_lookups.clone()))?;

        // Provider attempts
        let provider_attempts = CounterVec::new(
            Opts::new(
                "relay_provider_attempts_total",
                "Provider executions by outcome, retries included",
            ),
            &["provider", "outcome"],
        )?;
        registry.register(Box::new(provider_attempts.clone()))?;

        // Skipped providers
        let provider_skips = CounterVec::new(
            Opts::new(
                "relay_provider_skips_total",
                "Providers passed over without an attempt",
            ),
            &["provider", "reason"],
        )?;
        registry.register(Box::new(provider_skips.clone()))?;

        // Provider latency
        let provider_latency = HistogramVec::new(
            HistogramOpts::new("relay_provider_latency_seconds", "Provider execution latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["provider"],
        )?;
        registry.register(Box::new(provider_latency.clone()))?;

        // Breaker state: 0 closed, 1 open, 2 half-open
        let breaker_state = IntGaugeVec::new(
            Opts::new("relay_breaker_state", "Circuit breaker state per provider"),
            &["provider"],
        )?;
        registry.register(Box::new(breaker_state.clone()))?;

        // End-to-end executions
        let executions = CounterVec::new(
            Opts::new("relay_executions_total", "Orchestrated executions by result"),
            &["operation", "result"],
        )?;
        registry.register(Box::new(executions.clone()))?;

        Ok(Self {
            registry,
            cache_lookups,
            provider_attempts,
            provider_skips,
            provider_latency,
            breaker_state,
            executions,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_cache_hit(&self, operation: &str) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.cache_lookups.with_label_values(&[operation, "hit"]).inc();
    }

    pub fn record_cache_miss(&self, operation: &str) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.cache_lookups.with_label_values(&[operation, "miss"]).inc();
    }

    /// Cache hits and misses seen by the engine
    pub fn cache_counts(&self) -> (u64, u64) {
        (
            self.cache_hits.load(Ordering::Relaxed),
            self.cache_misses.load(Ordering::Relaxed),
        )
    }

    pub fn record_attempt(&self, provider: &str, success: bool, latency: Duration) {
        let outcome = if success { "success" } else { "failure" };
        self.provider_attempts
            .with_label_values(&[provider, outcome])
            .inc();
        self.provider_latency
            .with_label_values(&[provider])
            .observe(latency.as_secs_f64());
    }

    pub fn record_skip(&self, provider: &str, reason: SkipReason) {
        self.provider_skips
            .with_label_values(&[provider, reason.as_str()])
            .inc();
    }

    pub fn record_breaker_state(&self, provider: &str, state: &CircuitState) {
        self.breaker_state
            .with_label_values(&[provider])
            .set(state.as_gauge());
    }

    /// Drop every per-provider series of a removed provider.
    ///
    /// Series that were never recorded fail to remove; that is logged and
    /// otherwise ignored.
    pub fn forget_provider(&self, provider: &str) {
        let mut results = vec![
            ("breaker_state", self.breaker_state.remove_label_values(&[provider])),
            ("provider_latency", self.provider_latency.remove_label_values(&[provider])),
        ];
        for outcome in ATTEMPT_OUTCOMES {
            results.push((
                "provider_attempts",
                self.provider_attempts
                    .remove_label_values(&[provider, outcome]),
            ));
        }
        for reason in SkipReason::ALL {
            results.push((
                "provider_skips",
                self.provider_skips
                    .remove_label_values(&[provider, reason.as_str()]),
            ));
        }

        for (metric, result) in results {
            if let Err(e) = result {
                debug!(provider = %provider, metric, error = %e, "No series to remove");
            }
        }
    }

    pub fn record_execution(&self, operation: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.executions.with_label_values(&[operation, result]).inc();
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

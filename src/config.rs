/*!
 * Configuration types for Relay
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection_manager::ConnectionSettings;
use crate::error::{RelayError, Result};
use crate::provider::ProviderDescriptor;
use crate::registry::validate_descriptors;
use relay_core_resilience::{
    BackoffStrategy, CircuitBreakerConfig, HealthCheckerConfig, PoolConfig, RetryPolicy,
};

/// Top-level engine configuration
///
/// Every section is optional; missing sections take their defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub circuit_breaker: BreakerSettings,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Provider descriptors, in registration order
    #[serde(default)]
    pub providers: Vec<ProviderDescriptor>,
}

/// `[circuit_breaker]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,

    /// Windowed failure rate (0.0 - 1.0) that opens the circuit
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,

    /// Outcomes required in the window before the rate applies
    #[serde(default = "default_minimum_calls")]
    pub minimum_calls: usize,

    #[serde(default = "default_window_size")]
    pub window_size: usize,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Wait before an open circuit admits a trial
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,

    /// Trial successes that close the circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: usize,

    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: usize,
}

/// `[health]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSettings {
    /// How long a probe result stays valid
    #[serde(default = "default_health_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Background refresh interval; unset disables the loop
    #[serde(default)]
    pub refresh_interval_secs: Option<u64>,
}

/// `[pool]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Connections per provider
    #[serde(default = "default_pool_max_size")]
    pub max_size: usize,

    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: Option<u64>,

    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: Option<u64>,

    /// Hard per-call timeout unless the adapter declares its own
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Backoff strategy names accepted in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Linear,
    Exponential,
    #[default]
    ExponentialJitter,
}

impl BackoffKind {
    pub fn to_strategy(self) -> BackoffStrategy {
        match self {
            BackoffKind::Fixed => BackoffStrategy::Fixed,
            BackoffKind::Linear => BackoffStrategy::Linear,
            BackoffKind::Exponential => BackoffStrategy::Exponential,
            BackoffKind::ExponentialJitter => BackoffStrategy::ExponentialWithJitter,
        }
    }
}

/// `[retry]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts per provider, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default)]
    pub backoff: BackoffKind,

    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

/// `[cache]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// TTL for operation types without an override
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Per operation type; 0 disables caching for that type
    #[serde(default)]
    pub ttl_overrides: BTreeMap<String, u64>,

    /// Bound for the in-memory backend
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

/// `[orchestrator]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Overall deadline across the whole fallback chain
    #[serde(default)]
    pub deadline_ms: Option<u64>,

    /// Skip providers whose health probe reports unhealthy
    #[serde(default = "default_true")]
    pub health_gate: bool,
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Shorthand for level = debug
    #[serde(default)]
    pub verbose: bool,
}

fn default_true() -> bool {
    true
}

fn default_failure_threshold() -> usize {
    5
}

fn default_failure_rate_threshold() -> f64 {
    0.5
}

fn default_minimum_calls() -> usize {
    10
}

fn default_window_size() -> usize {
    100
}

fn default_window_secs() -> u64 {
    60
}

fn default_recovery_timeout_secs() -> u64 {
    60
}

fn default_success_threshold() -> usize {
    2
}

fn default_half_open_max_calls() -> usize {
    1
}

fn default_health_ttl_secs() -> u64 {
    30
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> usize {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_idle_timeout_secs() -> Option<u64> {
    Some(300)
}

fn default_max_lifetime_secs() -> Option<u64> {
    Some(1_800)
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter_factor() -> f64 {
    0.3
}

fn default_cache_ttl_secs() -> u64 {
    3_600
}

fn default_cache_max_entries() -> usize {
    10_000
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_rate_threshold: default_failure_rate_threshold(),
            minimum_calls: default_minimum_calls(),
            window_size: default_window_size(),
            window_secs: default_window_secs(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            success_threshold: default_success_threshold(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_health_ttl_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            refresh_interval_secs: None,
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: default_pool_max_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_lifetime_secs: default_max_lifetime_secs(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff: BackoffKind::default(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: default_cache_ttl_secs(),
            ttl_overrides: BTreeMap::new(),
            max_entries: default_cache_max_entries(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            deadline_ms: None,
            health_gate: true,
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            failure_rate_threshold: self.failure_rate_threshold,
            minimum_calls: self.minimum_calls,
            window_size: self.window_size,
            window_duration: Duration::from_secs(self.window_secs),
            recovery_timeout: Duration::from_secs(self.recovery_timeout_secs),
            success_threshold: self.success_threshold,
            half_open_max_calls: self.half_open_max_calls,
        }
    }
}

impl HealthSettings {
    pub fn to_checker_config(&self) -> HealthCheckerConfig {
        HealthCheckerConfig {
            ttl: Duration::from_secs(self.ttl_secs),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
        }
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval_secs.map(Duration::from_secs)
    }
}

impl PoolSettings {
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_size: self.max_size,
            idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
            max_lifetime: self.max_lifetime_secs.map(Duration::from_secs),
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff: self.backoff.to_strategy(),
            jitter_factor: self.jitter_factor,
        }
    }
}

impl CacheSettings {
    /// TTL for an operation type; zero means "don't cache"
    pub fn ttl_for(&self, operation: &str) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        let secs = self
            .ttl_overrides
            .get(operation)
            .copied()
            .unwrap_or(self.default_ttl_secs);
        Duration::from_secs(secs)
    }
}

impl OrchestratorSettings {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: RelayConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as pretty TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_toml_string()?)?;
        Ok(())
    }

    /// Connection manager settings
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            pool: self.pool.to_pool_config(),
            retry: self.retry.to_policy(),
            request_timeout: Duration::from_millis(self.pool.request_timeout_ms),
        }
    }

    /// Check tunables and provider descriptors
    pub fn validate(&self) -> Result<()> {
        let cb = &self.circuit_breaker;
        if cb.failure_threshold == 0 {
            return Err(RelayError::Config(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if !(cb.failure_rate_threshold > 0.0 && cb.failure_rate_threshold <= 1.0) {
            return Err(RelayError::Config(format!(
                "circuit_breaker.failure_rate_threshold must be in (0, 1], got {}",
                cb.failure_rate_threshold
            )));
        }
        if cb.window_size == 0 || cb.window_secs == 0 {
            return Err(RelayError::Config(
                "circuit_breaker window must be non-empty".to_string(),
            ));
        }
        if cb.success_threshold == 0 || cb.half_open_max_calls == 0 {
            return Err(RelayError::Config(
                "circuit_breaker.success_threshold and half_open_max_calls must be at least 1"
                    .to_string(),
            ));
        }

        if self.health.probe_timeout_ms == 0 {
            return Err(RelayError::Config(
                "health.probe_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.health.refresh_interval_secs == Some(0) {
            return Err(RelayError::Config(
                "health.refresh_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.pool.max_size == 0 {
            return Err(RelayError::Config(
                "pool.max_size must be at least 1".to_string(),
            ));
        }
        if self.pool.request_timeout_ms == 0 || self.pool.acquire_timeout_ms == 0 {
            return Err(RelayError::Config(
                "pool timeouts must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(RelayError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(RelayError::Config(format!(
                "retry.jitter_factor must be in [0, 1], got {}",
                self.retry.jitter_factor
            )));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(RelayError::Config(
                "retry.initial_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }

        if self.cache.max_entries == 0 {
            return Err(RelayError::Config(
                "cache.max_entries must be at least 1".to_string(),
            ));
        }

        if self.orchestrator.deadline_ms == Some(0) {
            return Err(RelayError::Config(
                "orchestrator.deadline_ms must be greater than 0".to_string(),
            ));
        }

        validate_descriptors(&self.providers)?;
        Ok(())
    }
}

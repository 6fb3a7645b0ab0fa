//! Fallback orchestrator
//!
//! The entry point of the engine. For one logical operation it:
//!
//! 1. computes the request fingerprint and serves a cache hit directly,
//!    bypassing breakers, health checks and providers
//! 2. walks the priority-ordered provider chain, skipping providers whose
//!    circuit is open or whose health probe reports unhealthy
//! 3. executes the first available provider through the connection
//!    manager, feeding the outcome to that provider's breaker
//! 4. writes a success through to the cache, or moves on to the next
//!    provider on failure
//!
//! If the chain is exhausted the caller gets an [`AggregatedFailure`] with
//! one [`ProviderReport`] per provider.
//!
//! # Example
//!
//! ```no_run
//! use relay::config::RelayConfig;
//! use relay::orchestrator::FallbackOrchestrator;
//! use relay::provider::{Params, Payload};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RelayConfig::from_file("relay.toml")?;
//! let orchestrator = FallbackOrchestrator::builder(config)
//!     // .constructor_fn("deepgram", |descriptor| async move { ... })
//!     .build()?;
//!
//! let response = orchestrator
//!     .execute("stt", Payload::Bytes(vec![0u8; 320]), Params::new())
//!     .await?;
//! println!("served by {}", response.served_by);
//! # Ok(())
//! # }
//! ```

use crate::config::RelayConfig;
use crate::connection_manager::ConnectionManager;
use crate::error::Result;
use crate::metrics::{RelayMetrics, SkipReason};
use crate::provider::{OperationRequest, Params, Payload, ProviderAdapter, ProviderDescriptor, ProviderError};
use crate::registry::{
    constructor_fn, ProviderConstructor, ProviderEntry, ProviderRegistry, RegistrySnapshot,
};
use async_trait::async_trait;
use relay_core_resilience::{
    CacheBackend, CacheStats, CircuitBreakerGroup, CircuitMetrics, ErrorClass, Fingerprint,
    HealthChecker, HealthProbe, HealthRecord, MemoryCache, OverallHealth, PoolStats,
    ProbeError, ProbeOutcome,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Per-operation input normalization used for fingerprinting
pub type Normalizer = Arc<dyn Fn(&Payload) -> Vec<u8> + Send + Sync>;

/// Where a response came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServedBy {
    Cache,
    Provider(String),
}

impl fmt::Display for ServedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServedBy::Cache => f.write_str("cache"),
            ServedBy::Provider(name) => f.write_str(name),
        }
    }
}

/// What happened to one provider during an execution
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutcome {
    /// Breaker was open
    SkippedCircuitOpen,
    /// Health probe reported unhealthy
    SkippedUnhealthy,
    /// Overall deadline expired before this provider's turn
    SkippedDeadline,
    /// Adapter could not be constructed
    ConfigurationError(String),
    /// Attempted and failed after retries
    Failed {
        attempts: u32,
        class: ErrorClass,
        error: ProviderError,
    },
    /// Attempt abandoned when the overall deadline expired
    DeadlineExceeded,
    Succeeded {
        attempts: u32,
    },
}

impl ProviderOutcome {
    /// Passed over without a call
    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            ProviderOutcome::SkippedCircuitOpen
                | ProviderOutcome::SkippedUnhealthy
                | ProviderOutcome::SkippedDeadline
                | ProviderOutcome::ConfigurationError(_)
        )
    }

    /// A call was made
    pub fn is_attempted(&self) -> bool {
        !self.is_skipped()
    }
}

impl fmt::Display for ProviderOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderOutcome::SkippedCircuitOpen => write!(f, "skipped (circuit open)"),
            ProviderOutcome::SkippedUnhealthy => write!(f, "skipped (unhealthy)"),
            ProviderOutcome::SkippedDeadline => write!(f, "skipped (deadline exceeded)"),
            ProviderOutcome::ConfigurationError(msg) => {
                write!(f, "skipped (configuration error: {})", msg)
            }
            ProviderOutcome::Failed {
                attempts,
                class,
                error,
            } => write!(
                f,
                "failed after {} attempt(s) ({:?}): {}",
                attempts, class, error
            ),
            ProviderOutcome::DeadlineExceeded => write!(f, "abandoned at deadline"),
            ProviderOutcome::Succeeded { attempts } => {
                write!(f, "succeeded after {} attempt(s)", attempts)
            }
        }
    }
}

/// Outcome of one provider in the chain
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReport {
    pub provider: String,
    pub outcome: ProviderOutcome,
}

impl ProviderReport {
    fn new(provider: impl Into<String>, outcome: ProviderOutcome) -> Self {
        Self {
            provider: provider.into(),
            outcome,
        }
    }
}

/// Successful execution
#[derive(Debug, Clone)]
pub struct ExecuteResponse {
    pub payload: Payload,
    pub served_by: ServedBy,
    /// Providers visited on the way, the serving one last. Empty for cache hits.
    pub attempts: Vec<ProviderReport>,
}

/// Every provider in the chain was skipped or failed
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedFailure {
    pub operation: String,
    pub reports: Vec<ProviderReport>,
    pub deadline_exceeded: bool,
}

impl AggregatedFailure {
    pub fn skipped(&self) -> impl Iterator<Item = &ProviderReport> {
        self.reports.iter().filter(|r| r.outcome.is_skipped())
    }

    pub fn attempted(&self) -> impl Iterator<Item = &ProviderReport> {
        self.reports.iter().filter(|r| r.outcome.is_attempted())
    }

    /// No provider is configured for the operation
    pub fn no_providers(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn outcome_of(&self, provider: &str) -> Option<&ProviderOutcome> {
        self.reports
            .iter()
            .find(|r| r.provider == provider)
            .map(|r| &r.outcome)
    }
}

impl fmt::Display for AggregatedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reports.is_empty() {
            return write!(f, "no providers configured for operation '{}'", self.operation);
        }
        write!(
            f,
            "all {} provider(s) for operation '{}' were unavailable or failed",
            self.reports.len(),
            self.operation
        )?;
        for report in &self.reports {
            write!(f, "; {}: {}", report.provider, report.outcome)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregatedFailure {}

/// Health probe backed by a provider adapter
///
/// A provider that cannot be constructed reports `Unknown`: that is a
/// configuration problem, surfaced by `execute` as a configuration error.
struct ProviderProbe {
    entry: Arc<ProviderEntry>,
}

#[async_trait]
impl HealthProbe for ProviderProbe {
    async fn probe(&self) -> std::result::Result<ProbeOutcome, ProbeError> {
        match self.entry.instance().await {
            Ok(adapter) => Ok(adapter.health_probe().await?),
            Err(e) => Ok(ProbeOutcome::unknown(format!("not constructed: {}", e))),
        }
    }
}

/// Configuration and provider chain one execution runs against
struct ActiveState {
    config: Arc<RelayConfig>,
    providers: Arc<RegistrySnapshot>,
}

/// Builder for [`FallbackOrchestrator`]
pub struct OrchestratorBuilder {
    config: RelayConfig,
    registry: ProviderRegistry,
    cache: Option<Arc<dyn CacheBackend>>,
    dependencies: Vec<(String, bool, Arc<dyn HealthProbe>)>,
    normalizers: HashMap<String, Normalizer>,
}

impl OrchestratorBuilder {
    /// Register a provider constructor for a kind
    pub fn constructor(self, kind: impl Into<String>, constructor: ProviderConstructor) -> Self {
        self.registry.register(kind, constructor);
        self
    }

    /// Register an async closure as a provider constructor
    pub fn constructor_fn<F, Fut>(self, kind: impl Into<String>, f: F) -> Self
    where
        F: Fn(ProviderDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Arc<dyn ProviderAdapter>, ProviderError>>
            + Send
            + 'static,
    {
        self.registry.register(kind, constructor_fn(f));
        self
    }

    /// Use a custom cache backend instead of the in-memory one
    pub fn cache_backend(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Monitor a non-provider dependency
    pub fn dependency(
        mut self,
        name: impl Into<String>,
        required: bool,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        self.dependencies.push((name.into(), required, probe));
        self
    }

    /// Input normalization for an operation type
    pub fn normalizer<F>(mut self, operation: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Payload) -> Vec<u8> + Send + Sync + 'static,
    {
        self.normalizers.insert(operation.into(), Arc::new(f));
        self
    }

    pub fn build(self) -> Result<FallbackOrchestrator> {
        let config = self.config;
        config.validate()?;
        let providers = Arc::new(self.registry.prepare(config.providers.clone())?);
        self.registry.install(providers.clone());

        let (cache, memory_cache) = match self.cache {
            Some(cache) => (cache, None),
            None => {
                let memory = Arc::new(MemoryCache::new(config.cache.max_entries));
                (memory.clone() as Arc<dyn CacheBackend>, Some(memory))
            }
        };

        let health = Arc::new(HealthChecker::new(config.health.to_checker_config()));
        for (name, required, probe) in self.dependencies {
            health.register(name, required, probe);
        }

        let orchestrator = FallbackOrchestrator {
            registry: self.registry,
            breakers: CircuitBreakerGroup::new(config.circuit_breaker.to_breaker_config()),
            health,
            connections: ConnectionManager::new(config.connection_settings()),
            cache,
            memory_cache,
            normalizers: RwLock::new(self.normalizers),
            metrics: RelayMetrics::new()?,
            provider_probes: Mutex::new(HashSet::new()),
            refresh_task: Mutex::new(None),
            active: RwLock::new(Arc::new(ActiveState {
                config: Arc::new(config),
                providers: providers.clone(),
            })),
        };
        orchestrator.sync_provider_probes(&providers);

        info!(
            providers = providers.entries().len(),
            "Fallback orchestrator ready"
        );
        Ok(orchestrator)
    }
}

/// Priority-ordered failover across providers
pub struct FallbackOrchestrator {
    registry: ProviderRegistry,
    breakers: CircuitBreakerGroup,
    health: Arc<HealthChecker>,
    connections: ConnectionManager,
    cache: Arc<dyn CacheBackend>,
    memory_cache: Option<Arc<MemoryCache>>,
    normalizers: RwLock<HashMap<String, Normalizer>>,
    metrics: RelayMetrics,
    provider_probes: Mutex<HashSet<String>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    active: RwLock<Arc<ActiveState>>,
}

impl FallbackOrchestrator {
    pub fn builder(config: RelayConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            registry: ProviderRegistry::new(),
            cache: None,
            dependencies: Vec::new(),
            normalizers: HashMap::new(),
        }
    }

    fn active(&self) -> Arc<ActiveState> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Active configuration
    pub fn config(&self) -> Arc<RelayConfig> {
        self.active().config.clone()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    /// Fingerprint of a request, using the operation's normalizer
    pub fn fingerprint(&self, operation: &str, payload: &Payload, params: &Params) -> Fingerprint {
        let normalizer = self
            .normalizers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(operation)
            .cloned();
        let normalized = match normalizer {
            Some(normalize) => normalize(payload),
            None => payload.canonical_bytes(),
        };
        Fingerprint::compute(operation, &normalized, params)
    }

    /// Execute an operation with caching and provider failover
    pub async fn execute(
        &self,
        operation: &str,
        payload: Payload,
        params: Params,
    ) -> std::result::Result<ExecuteResponse, AggregatedFailure> {
        let active = self.active();
        let config = &active.config;
        let ttl = config.cache.ttl_for(operation);
        let fingerprint = (!ttl.is_zero()).then(|| self.fingerprint(operation, &payload, &params));

        if let Some(fingerprint) = &fingerprint {
            if let Some(payload) = self.cache_lookup(operation, fingerprint).await {
                debug!(operation = %operation, fingerprint = %fingerprint, "Cache hit");
                self.metrics.record_execution(operation, true);
                return Ok(ExecuteResponse {
                    payload,
                    served_by: ServedBy::Cache,
                    attempts: Vec::new(),
                });
            }
        }

        let providers = active.providers.ordered(operation);
        if providers.is_empty() {
            warn!(operation = %operation, "No providers configured for operation");
        }

        let deadline = config.orchestrator.deadline().map(|d| Instant::now() + d);
        let request = OperationRequest {
            operation: operation.to_string(),
            payload,
            params,
        };
        let mut reports = Vec::with_capacity(providers.len());
        let mut deadline_exceeded = false;

        for entry in providers {
            let name = entry.name();

            if deadline_exceeded || deadline.is_some_and(|d| Instant::now() >= d) {
                deadline_exceeded = true;
                self.metrics.record_skip(name, SkipReason::Deadline);
                reports.push(ProviderReport::new(name, ProviderOutcome::SkippedDeadline));
                continue;
            }

            let breaker = self.breakers.get(name);
            if !breaker.is_available() {
                debug!(provider = %name, "Circuit open, skipping provider");
                self.metrics.record_skip(name, SkipReason::CircuitOpen);
                reports.push(ProviderReport::new(name, ProviderOutcome::SkippedCircuitOpen));
                continue;
            }

            let adapter = match entry.instance().await {
                Ok(adapter) => adapter,
                Err(e) => {
                    breaker.release_trial();
                    self.metrics.record_skip(name, SkipReason::Configuration);
                    reports.push(ProviderReport::new(
                        name,
                        ProviderOutcome::ConfigurationError(e.to_string()),
                    ));
                    continue;
                }
            };

            if config.orchestrator.health_gate && !self.health.is_provider_healthy(name).await {
                breaker.release_trial();
                debug!(provider = %name, "Provider unhealthy, skipping");
                self.metrics.record_skip(name, SkipReason::Unhealthy);
                reports.push(ProviderReport::new(name, ProviderOutcome::SkippedUnhealthy));
                continue;
            }

            let attempt = self.connections.execute(name, &adapter, &request);
            let result = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, attempt).await.ok(),
                None => Some(attempt.await),
            };

            match result {
                None => {
                    // Cut short by the deadline, not the provider's fault
                    breaker.release_trial();
                    deadline_exceeded = true;
                    warn!(provider = %name, operation = %operation, "Deadline expired during provider call");
                    reports.push(ProviderReport::new(name, ProviderOutcome::DeadlineExceeded));
                }
                Some(Ok(success)) => {
                    breaker.record_success(success.latency);
                    self.metrics.record_attempt(name, true, success.latency);
                    self.metrics.record_breaker_state(name, &breaker.get_state());
                    reports.push(ProviderReport::new(
                        name,
                        ProviderOutcome::Succeeded {
                            attempts: success.attempts,
                        },
                    ));

                    if let Some(fingerprint) = &fingerprint {
                        self.cache_store(fingerprint, &success.payload, ttl).await;
                    }

                    debug!(
                        provider = %name,
                        operation = %operation,
                        attempts = success.attempts,
                        "Provider call succeeded"
                    );
                    self.metrics.record_execution(operation, true);
                    return Ok(ExecuteResponse {
                        payload: success.payload,
                        served_by: ServedBy::Provider(name.to_string()),
                        attempts: reports,
                    });
                }
                Some(Err(failure)) => {
                    breaker.record_failure(failure.latency);
                    self.metrics.record_attempt(name, false, failure.latency);
                    self.metrics.record_breaker_state(name, &breaker.get_state());
                    warn!(
                        provider = %name,
                        operation = %operation,
                        attempts = failure.attempts,
                        error = %failure.error,
                        "Provider failed, falling back"
                    );
                    reports.push(ProviderReport::new(
                        name,
                        ProviderOutcome::Failed {
                            attempts: failure.attempts,
                            class: failure.class,
                            error: failure.error,
                        },
                    ));
                }
            }
        }

        self.metrics.record_execution(operation, false);
        let failure = AggregatedFailure {
            operation: operation.to_string(),
            reports,
            deadline_exceeded,
        };
        warn!(error = %failure, "Fallback chain exhausted");
        Err(failure)
    }

    async fn cache_lookup(&self, operation: &str, fingerprint: &Fingerprint) -> Option<Payload> {
        match self.cache.get(fingerprint).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Payload>(&bytes) {
                Ok(payload) => {
                    self.metrics.record_cache_hit(operation);
                    Some(payload)
                }
                Err(e) => {
                    warn!(fingerprint = %fingerprint, error = %e, "Dropping undecodable cache entry");
                    if let Err(e) = self.cache.invalidate(fingerprint).await {
                        warn!(fingerprint = %fingerprint, error = %e, "Failed to drop undecodable cache entry");
                    }
                    self.metrics.record_cache_miss(operation);
                    None
                }
            },
            Ok(None) => {
                self.metrics.record_cache_miss(operation);
                None
            }
            Err(e) => {
                warn!(error = %e, "Cache lookup failed, treating as miss");
                self.metrics.record_cache_miss(operation);
                None
            }
        }
    }

    async fn cache_store(&self, fingerprint: &Fingerprint, payload: &Payload, ttl: Duration) {
        let bytes = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to encode result for caching");
                return;
            }
        };
        if let Err(e) = self.cache.put(fingerprint, bytes, ttl).await {
            warn!(error = %e, "Cache write failed, result not cached");
        }
    }

    /// Drop the cached result for a request
    pub async fn invalidate(&self, operation: &str, payload: &Payload, params: &Params) -> bool {
        let fingerprint = self.fingerprint(operation, payload, params);
        match self.cache.invalidate(&fingerprint).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Cache invalidation failed");
                false
            }
        }
    }

    /// Empty the result cache
    pub async fn clear_cache(&self) -> Result<()> {
        self.cache
            .clear()
            .await
            .map_err(|e| crate::error::RelayError::Config(format!("Failed to clear cache: {}", e)))
    }

    /// Replace the configuration atomically.
    ///
    /// The new configuration is validated as a whole first; on error the
    /// old one stays active. Settings and provider chain are swapped
    /// together, so an execution sees either the old pair or the new one.
    /// Breakers of surviving providers keep their state and pick up the
    /// new tunables.
    pub async fn reload(&self, config: RelayConfig) -> Result<()> {
        config.validate()?;
        let providers = Arc::new(self.registry.prepare(config.providers.clone())?);
        let config = Arc::new(config);

        let previous = std::mem::replace(
            &mut *self.active.write().unwrap_or_else(PoisonError::into_inner),
            Arc::new(ActiveState {
                config: config.clone(),
                providers: providers.clone(),
            }),
        );
        self.registry.install(providers.clone());

        let names = providers.enabled_names();
        self.breakers
            .reconfigure(config.circuit_breaker.to_breaker_config());
        self.breakers.retain(&names);
        for removed in previous
            .providers
            .enabled_names()
            .iter()
            .filter(|p| !names.contains(p))
        {
            self.metrics.forget_provider(removed);
        }

        self.health.reconfigure(config.health.to_checker_config());
        self.sync_provider_probes(&providers);
        self.connections
            .reconfigure(config.connection_settings())
            .await;

        let interval_changed = previous.config.health.refresh_interval_secs
            != config.health.refresh_interval_secs;
        if interval_changed && self.stop_health_refresh() {
            self.start_health_refresh();
        }

        info!(providers = names.len(), "Configuration reloaded");
        Ok(())
    }

    /// Register a health probe for every enabled provider, replacing the
    /// probes of the previous configuration. Providers of an unknown kind
    /// get no probe.
    fn sync_provider_probes(&self, snapshot: &RegistrySnapshot) {
        let mut registered = self
            .provider_probes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        for name in registered.drain() {
            self.health.unregister(&name);
        }

        for entry in snapshot.entries() {
            if !entry.descriptor().health_check {
                continue;
            }
            if !entry.has_constructor() {
                debug!(provider = %entry.name(), "No constructor for provider, not probing");
                continue;
            }
            let name = entry.name().to_string();
            self.health
                .register(name.clone(), false, Arc::new(ProviderProbe { entry }));
            registered.insert(name);
        }
    }

    /// Start the background health refresh loop if an interval is configured.
    ///
    /// Must be called from within a Tokio runtime. Returns false if no
    /// interval is configured or the loop is already running.
    pub fn start_health_refresh(&self) -> bool {
        let Some(interval) = self.config().health.refresh_interval() else {
            return false;
        };
        let mut task = self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return false;
        }
        *task = Some(self.health.clone().spawn_refresh_loop(interval));
        true
    }

    /// Stop the background health refresh loop. Returns false if it was not running.
    pub fn stop_health_refresh(&self) -> bool {
        let task = self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match task {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Breaker metrics for every provider seen so far
    pub fn breaker_metrics(&self) -> BTreeMap<String, CircuitMetrics> {
        self.breakers.snapshot()
    }

    /// Force a provider's breaker closed. Returns false for unknown providers.
    pub fn reset_breaker(&self, name: &str) -> bool {
        let reset = self.breakers.reset(name);
        if reset {
            info!(provider = %name, "Circuit breaker reset by operator");
            self.metrics
                .record_breaker_state(name, &self.breakers.get(name).get_state());
        }
        reset
    }

    pub fn reset_all_breakers(&self) {
        self.breakers.reset_all();
        info!("All circuit breakers reset by operator");
    }

    /// Aggregated health from cached records
    pub fn overall_health(&self) -> OverallHealth {
        self.health.get_overall_health()
    }

    /// Probe every component now
    pub async fn refresh_health(&self) -> Vec<HealthRecord> {
        self.health.refresh_all().await
    }

    /// Cache counters. Entry and eviction counts are only known for the
    /// in-memory backend.
    pub fn cache_stats(&self) -> CacheStats {
        let (hits, misses) = self.metrics.cache_counts();
        let backend = self
            .memory_cache
            .as_ref()
            .map(|cache| cache.stats())
            .unwrap_or_default();
        CacheStats {
            hits,
            misses,
            ..backend
        }
    }

    pub async fn pool_stats(&self) -> BTreeMap<String, PoolStats> {
        self.connections.pool_stats().await
    }

    /// Prometheus text exposition of the engine's metrics
    pub fn metrics_text(&self) -> Result<String> {
        for (name, metrics) in self.breakers.snapshot() {
            self.metrics.record_breaker_state(&name, &metrics.state);
        }
        self.metrics.render()
    }
}

impl Drop for FallbackOrchestrator {
    fn drop(&mut self) {
        self.stop_health_refresh();
    }
}

//! Health Checker: cached, deduplicated component probes
//!
//! Every registered component (a provider, a cache backend, an object store)
//! has a caller-supplied probe. Results are cached for a short TTL; a record
//! older than the TTL counts as [`HealthStatus::Unknown`] until refreshed.
//!
//! Probes never propagate failures. Errors, timeouts and panics are all
//! recorded as [`HealthStatus::Unhealthy`] with the cause in the metadata.
//!
//! Concurrent checks of the same component are serialized per component, so
//! only one probe runs at a time; late callers reuse the record it produced.
//!
//! # Example
//!
//! ```
//! use relay_core_resilience::health_checker::{probe_fn, HealthChecker, HealthCheckerConfig, ProbeOutcome};
//!
//! # async fn example() {
//! let checker = HealthChecker::new(HealthCheckerConfig::default());
//! checker.register("cache", true, probe_fn(|| async { Ok(ProbeOutcome::healthy()) }));
//!
//! let record = checker.check_health("cache").await;
//! assert!(record.status.is_usable());
//! # }
//! ```

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Error type returned by probes
pub type ProbeError = Box<dyn std::error::Error + Send + Sync>;

/// Health of a single component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }

    /// Anything but unhealthy may still receive traffic
    pub fn is_usable(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for health checking
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheckerConfig {
    /// How long a record stays valid
    pub ttl: Duration,
    /// Upper bound on a single probe
    pub probe_timeout: Duration,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// What a probe reports when it completes
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub status: HealthStatus,
    pub detail: Option<String>,
}

impl ProbeOutcome {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            detail: None,
        }
    }

    pub fn degraded(detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            detail: Some(detail.into()),
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            detail: Some(detail.into()),
        }
    }

    /// The component could not be checked at all
    pub fn unknown(detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unknown,
            detail: Some(detail.into()),
        }
    }
}

/// A lightweight liveness check for one component
#[async_trait::async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<ProbeOutcome, ProbeError>;
}

struct FnProbe<F>(F);

#[async_trait::async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<ProbeOutcome, ProbeError>> + Send,
{
    async fn probe(&self) -> Result<ProbeOutcome, ProbeError> {
        (self.0)().await
    }
}

/// Wrap an async closure as a probe
pub fn probe_fn<F, Fut>(f: F) -> Arc<dyn HealthProbe>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ProbeOutcome, ProbeError>> + Send + 'static,
{
    Arc::new(FnProbe(f))
}

/// Result of the most recent probe of a component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthRecord {
    pub component: String,
    pub status: HealthStatus,
    #[serde(skip)]
    pub checked_at: Instant,
    pub checked_at_wall: DateTime<Utc>,
    /// Probe latency
    pub latency: Duration,
    pub metadata: BTreeMap<String, String>,
}

impl HealthRecord {
    fn unknown(component: &str, reason: &str) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("detail".to_string(), reason.to_string());
        Self {
            component: component.to_string(),
            status: HealthStatus::Unknown,
            checked_at: Instant::now(),
            checked_at_wall: Utc::now(),
            latency: Duration::ZERO,
            metadata,
        }
    }

    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.checked_at.elapsed() > ttl
    }

    /// Status, or `Unknown` once the record has outlived its TTL
    pub fn effective_status(&self, ttl: Duration) -> HealthStatus {
        if self.is_stale(ttl) {
            HealthStatus::Unknown
        } else {
            self.status
        }
    }
}

/// Aggregated view of one component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealth {
    /// Effective status (stale or never-checked components are `Unknown`)
    pub status: HealthStatus,
    pub required: bool,
    pub record: Option<HealthRecord>,
}

/// Aggregated view of every registered component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallHealth {
    pub status: HealthStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

struct ComponentSlot {
    probe: Arc<dyn HealthProbe>,
    required: bool,
    check_lock: tokio::sync::Mutex<()>,
    record: RwLock<Option<HealthRecord>>,
}

impl ComponentSlot {
    fn record(&self) -> Option<HealthRecord> {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn fresh_record(&self, ttl: Duration) -> Option<HealthRecord> {
        self.record().filter(|r| !r.is_stale(ttl))
    }

    fn store(&self, record: HealthRecord) {
        *self.record.write().unwrap_or_else(PoisonError::into_inner) = Some(record);
    }
}

/// Health checker owning one cached record per registered component
pub struct HealthChecker {
    config: RwLock<HealthCheckerConfig>,
    components: RwLock<HashMap<String, Arc<ComponentSlot>>>,
}

impl HealthChecker {
    pub fn new(config: HealthCheckerConfig) -> Self {
        Self {
            config: RwLock::new(config),
            components: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> HealthCheckerConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reconfigure(&self, config: HealthCheckerConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// Register (or replace) a component and its probe.
    ///
    /// Required components make the overall status unhealthy when they fail.
    pub fn register(
        &self,
        component: impl Into<String>,
        required: bool,
        probe: Arc<dyn HealthProbe>,
    ) {
        let component = component.into();
        debug!(component = %component, required, "Registering health probe");
        let slot = Arc::new(ComponentSlot {
            probe,
            required,
            check_lock: tokio::sync::Mutex::new(()),
            record: RwLock::new(None),
        });
        self.components
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(component, slot);
    }

    /// Remove a component. Returns false if it was not registered.
    pub fn unregister(&self, component: &str) -> bool {
        self.components
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(component)
            .is_some()
    }

    pub fn is_registered(&self, component: &str) -> bool {
        self.components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(component)
    }

    /// Names of all registered components, sorted
    pub fn components(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn slot(&self, component: &str) -> Option<Arc<ComponentSlot>> {
        self.components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(component)
            .cloned()
    }

    /// Return the cached record if it is within its TTL, otherwise probe.
    ///
    /// Unregistered components report `Unknown` without probing.
    pub async fn check_health(&self, component: &str) -> HealthRecord {
        let Some(slot) = self.slot(component) else {
            return HealthRecord::unknown(component, "component not registered");
        };
        let config = self.config();

        if let Some(record) = slot.fresh_record(config.ttl) {
            return record;
        }

        let _guard = slot.check_lock.lock().await;

        // Another caller may have refreshed while we waited
        if let Some(record) = slot.fresh_record(config.ttl) {
            return record;
        }

        self.probe_and_store(component, &slot, &config).await
    }

    /// Probe now regardless of TTL.
    ///
    /// A probe that finished while this call waited for the component lock
    /// satisfies the request.
    pub async fn refresh(&self, component: &str) -> HealthRecord {
        let Some(slot) = self.slot(component) else {
            return HealthRecord::unknown(component, "component not registered");
        };
        let config = self.config();
        let requested = Instant::now();

        let _guard = slot.check_lock.lock().await;

        if let Some(record) = slot.record().filter(|r| r.checked_at > requested) {
            return record;
        }

        self.probe_and_store(component, &slot, &config).await
    }

    /// Refresh every registered component concurrently
    pub async fn refresh_all(&self) -> Vec<HealthRecord> {
        let names = self.components();
        join_all(names.iter().map(|name| self.refresh(name))).await
    }

    /// Convenience projection used before attempting a provider.
    ///
    /// Providers without a registered probe are considered healthy.
    pub async fn is_provider_healthy(&self, name: &str) -> bool {
        if !self.is_registered(name) {
            return true;
        }
        self.check_health(name).await.status.is_usable()
    }

    /// Aggregate all cached records without probing.
    ///
    /// Unhealthy if any required component is unhealthy; degraded if any
    /// component is degraded, stale, never checked, or an optional component
    /// is unhealthy; healthy otherwise.
    pub fn get_overall_health(&self) -> OverallHealth {
        let ttl = self.config().ttl;
        let slots: Vec<(String, Arc<ComponentSlot>)> = self
            .components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, slot)| (name.clone(), slot.clone()))
            .collect();

        let mut overall = HealthStatus::Healthy;
        let mut components = BTreeMap::new();

        for (name, slot) in slots {
            let record = slot.record();
            let status = record
                .as_ref()
                .map(|r| r.effective_status(ttl))
                .unwrap_or(HealthStatus::Unknown);

            match status {
                HealthStatus::Unhealthy if slot.required => overall = HealthStatus::Unhealthy,
                HealthStatus::Healthy => {}
                _ => {
                    if overall == HealthStatus::Healthy {
                        overall = HealthStatus::Degraded;
                    }
                }
            }

            components.insert(
                name,
                ComponentHealth {
                    status,
                    required: slot.required,
                    record,
                },
            );
        }

        OverallHealth {
            status: overall,
            components,
        }
    }

    /// Spawn a background task that refreshes every component on a timer.
    ///
    /// Abort the returned handle to stop it.
    pub fn spawn_refresh_loop(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs_f64(), "Health refresh loop started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.refresh_all().await;
            }
        })
    }

    async fn probe_and_store(
        &self,
        component: &str,
        slot: &ComponentSlot,
        config: &HealthCheckerConfig,
    ) -> HealthRecord {
        let previous = slot.record().map(|r| r.status);
        let record = run_probe(component, slot.probe.clone(), config.probe_timeout).await;

        if previous != Some(record.status) {
            match record.status {
                HealthStatus::Unhealthy => warn!(
                    component = %component,
                    detail = record.metadata.get("error").map(String::as_str).unwrap_or(""),
                    "Component is unhealthy"
                ),
                status => info!(component = %component, status = %status, "Component health changed"),
            }
        }

        slot.store(record.clone());
        record
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthCheckerConfig::default())
    }
}

async fn run_probe(
    component: &str,
    probe: Arc<dyn HealthProbe>,
    timeout: Duration,
) -> HealthRecord {
    let started = Instant::now();
    let result = tokio::time::timeout(timeout, AssertUnwindSafe(probe.probe()).catch_unwind()).await;
    let latency = started.elapsed();

    let mut metadata = BTreeMap::new();
    let status = match result {
        Err(_) => {
            metadata.insert(
                "error".to_string(),
                format!("probe timed out after {:?}", timeout),
            );
            HealthStatus::Unhealthy
        }
        Ok(Err(_panic)) => {
            metadata.insert("error".to_string(), "probe panicked".to_string());
            HealthStatus::Unhealthy
        }
        Ok(Ok(Err(e))) => {
            metadata.insert("error".to_string(), e.to_string());
            HealthStatus::Unhealthy
        }
        Ok(Ok(Ok(outcome))) => {
            if let Some(detail) = outcome.detail {
                metadata.insert("detail".to_string(), detail);
            }
            outcome.status
        }
    };

    HealthRecord {
        component: component.to_string(),
        status,
        checked_at: Instant::now(),
        checked_at_wall: Utc::now(),
        latency,
        metadata,
    }
}

//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker stops sending work to a provider that is failing and
//! periodically tests whether it has recovered. It has three states:
//! - Closed: Normal operation, requests pass through
//! - Open: Provider is unhealthy, requests are refused
//! - HalfOpen: A limited number of trial requests test recovery
//!
//! The breaker never raises. It answers yes/no through [`CircuitBreaker::is_available`]
//! and records outcomes through [`CircuitBreaker::record_success`] and
//! [`CircuitBreaker::record_failure`]. Callers act on a `false` answer.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests are refused
    /// Next probe time indicates when to try half-open
    Open { next_probe: Instant },
    /// Circuit is half-open, testing provider recovery
    HalfOpen,
}

impl CircuitState {
    /// Short lowercase name, used for logs and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Numeric encoding for gauges: closed=0, open=1, half_open=2
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open { .. } => 1,
            CircuitState::HalfOpen => 2,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, CircuitState::Open { .. })
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: usize,
    /// Windowed failure rate (0.0 - 1.0) that opens the circuit
    pub failure_rate_threshold: f64,
    /// Outcomes the window must hold before the failure rate is considered
    pub minimum_calls: usize,
    /// Maximum number of outcomes kept in the sliding window
    pub window_size: usize,
    /// Outcomes older than this fall out of the sliding window
    pub window_duration: Duration,
    /// Duration to wait before transitioning from open to half-open
    pub recovery_timeout: Duration,
    /// Number of successes in half-open to close circuit
    pub success_threshold: usize,
    /// Concurrent trial requests admitted while half-open
    pub half_open_max_calls: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: 0.5,
            minimum_calls: 10,
            window_size: 100,
            window_duration: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
            half_open_max_calls: 1,
        }
    }
}

/// Point-in-time view of a breaker, for monitoring
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    /// Failure rate over the sliding window (0.0 - 1.0)
    pub failure_rate: f64,
    pub consecutive_failures: usize,
    /// Outcomes currently held in the sliding window
    pub window_calls: usize,
    pub total_calls: u64,
    pub total_failures: u64,
    /// Availability checks refused while open or while half-open was saturated
    pub rejected_calls: u64,
    /// Mean latency of all recorded calls
    pub average_latency: Option<Duration>,
    /// Wall-clock time of the last state transition
    pub last_transition_at: DateTime<Utc>,
    /// Time since the last state transition
    pub since_transition: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    at: Instant,
    failed: bool,
}

/// Internal state of the circuit breaker
#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    /// Successes recorded since entering half-open
    consecutive_successes: usize,
    /// Trials admitted while half-open that have not reported back
    half_open_in_flight: usize,
    window: VecDeque<Outcome>,
    last_transition: Instant,
    last_transition_wall: DateTime<Utc>,
    total_calls: u64,
    total_failures: u64,
    rejected_calls: u64,
    latency_total: Duration,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            half_open_in_flight: 0,
            window: VecDeque::new(),
            last_transition: Instant::now(),
            last_transition_wall: Utc::now(),
            total_calls: 0,
            total_failures: 0,
            rejected_calls: 0,
            latency_total: Duration::ZERO,
        }
    }

    fn prune(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        while let Some(front) = self.window.front() {
            if now.saturating_duration_since(front.at) > config.window_duration {
                self.window.pop_front();
            } else {
                break;
            }
        }
        while self.window.len() > config.window_size {
            self.window.pop_front();
        }
    }

    fn push(&mut self, config: &CircuitBreakerConfig, failed: bool, latency: Duration) {
        let now = Instant::now();
        self.window.push_back(Outcome { at: now, failed });
        self.prune(config, now);
        self.total_calls += 1;
        if failed {
            self.total_failures += 1;
        }
        self.latency_total += latency;
    }

    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|o| o.failed).count();
        failures as f64 / self.window.len() as f64
    }
}

/// Per-provider circuit breaker
///
/// All state lives behind a single mutex so concurrent callers never lose
/// counter updates. No lock is held across an await point.
///
/// # Example
/// ```
/// use relay_core_resilience::{CircuitBreaker, CircuitBreakerConfig};
/// use std::time::Duration;
///
/// let breaker = CircuitBreaker::new("deepgram", CircuitBreakerConfig::default());
///
/// if breaker.is_available() {
///     // call the provider...
///     breaker.record_success(Duration::from_millis(120));
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<RwLock<Arc<CircuitBreakerConfig>>>,
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: Arc::from(name.into()),
            config: Arc::new(RwLock::new(Arc::new(config))),
            state: Arc::new(Mutex::new(CircuitBreakerState::new())),
        }
    }

    /// Create a new circuit breaker with default configuration
    pub fn new_default(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> Arc<CircuitBreakerConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap the tunables without touching state or counters.
    ///
    /// An open circuit keeps its scheduled probe time; a changed
    /// `recovery_timeout` applies from the next time the circuit opens.
    pub fn set_config(&self, config: CircuitBreakerConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether a request may be sent to the provider.
    ///
    /// The only side effect besides counting rejections is the
    /// open to half-open transition once the recovery timeout has elapsed.
    /// A `true` answer while half-open admits one trial; a caller that then
    /// decides not to attempt must hand it back with [`Self::release_trial`].
    pub fn is_available(&self) -> bool {
        let config = self.config();
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open { next_probe } => {
                if Instant::now() >= next_probe {
                    self.transition(&mut state, CircuitState::HalfOpen);
                    state.half_open_in_flight = 1;
                    true
                } else {
                    state.rejected_calls += 1;
                    false
                }
            }
            CircuitState::HalfOpen => {
                if state.half_open_in_flight < config.half_open_max_calls {
                    state.half_open_in_flight += 1;
                    true
                } else {
                    state.rejected_calls += 1;
                    false
                }
            }
        }
    }

    /// Return a half-open trial slot that was admitted but not used
    pub fn release_trial(&self) {
        let mut state = self.lock();
        if state.state == CircuitState::HalfOpen {
            state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Record a successful call and its latency
    pub fn record_success(&self, latency: Duration) {
        let config = self.config();
        let mut state = self.lock();
        state.push(&config, false, latency);

        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
                state.consecutive_successes += 1;

                if state.consecutive_successes >= config.success_threshold {
                    self.transition(&mut state, CircuitState::Closed);
                }
            }
            CircuitState::Open { .. } => {
                // Late result from a call admitted before the circuit opened
                debug!(breaker = %self.name, "Ignoring success reported while open");
            }
        }
    }

    /// Record a failed call and its latency
    pub fn record_failure(&self, latency: Duration) {
        let config = self.config();
        let mut state = self.lock();
        state.push(&config, true, latency);

        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;

                let rate = state.failure_rate();
                let rate_tripped = state.window.len() >= config.minimum_calls
                    && rate >= config.failure_rate_threshold;

                if state.consecutive_failures >= config.failure_threshold || rate_tripped {
                    warn!(
                        breaker = %self.name,
                        consecutive_failures = state.consecutive_failures,
                        failure_rate = rate,
                        "Failure threshold reached, opening circuit"
                    );
                    self.open(&mut state, &config);
                }
            }
            CircuitState::HalfOpen => {
                state.consecutive_failures += 1;
                warn!(breaker = %self.name, "Trial request failed, reopening circuit");
                self.open(&mut state, &config);
            }
            CircuitState::Open { .. } => {
                state.consecutive_failures += 1;
            }
        }
    }

    /// Get the current state of the circuit breaker
    pub fn get_state(&self) -> CircuitState {
        self.lock().state
    }

    /// Get current consecutive failure count
    pub fn get_failure_count(&self) -> usize {
        self.lock().consecutive_failures
    }

    /// Snapshot the breaker for monitoring
    pub fn get_metrics(&self) -> CircuitMetrics {
        let config = self.config();
        let mut state = self.lock();
        state.prune(&config, Instant::now());

        let average_latency = if state.total_calls == 0 {
            None
        } else {
            Some(Duration::from_secs_f64(
                state.latency_total.as_secs_f64() / state.total_calls as f64,
            ))
        };

        CircuitMetrics {
            state: state.state,
            failure_rate: state.failure_rate(),
            consecutive_failures: state.consecutive_failures,
            window_calls: state.window.len(),
            total_calls: state.total_calls,
            total_failures: state.total_failures,
            rejected_calls: state.rejected_calls,
            average_latency,
            last_transition_at: state.last_transition_wall,
            since_transition: state.last_transition.elapsed(),
        }
    }

    /// Force the circuit closed and clear counters.
    ///
    /// Administrative action only; lifetime totals are kept.
    pub fn reset(&self) {
        let mut state = self.lock();
        info!(breaker = %self.name, from = %state.state, "Circuit breaker reset by operator");
        self.transition(&mut state, CircuitState::Closed);
        state.rejected_calls = 0;
    }

    fn open(&self, state: &mut CircuitBreakerState, config: &CircuitBreakerConfig) {
        let next_probe = Instant::now() + config.recovery_timeout;
        self.transition(state, CircuitState::Open { next_probe });
    }

    fn transition(&self, state: &mut CircuitBreakerState, to: CircuitState) {
        let from = state.state;
        state.state = to;
        state.last_transition = Instant::now();
        state.last_transition_wall = Utc::now();
        state.consecutive_successes = 0;
        state.half_open_in_flight = 0;

        if to == CircuitState::Closed {
            state.consecutive_failures = 0;
            state.window.clear();
        }

        if from.as_str() != to.as_str() {
            info!(breaker = %self.name, from = %from, to = %to, "Circuit breaker state change");
        }
    }
}

/// One circuit breaker per registered provider.
///
/// Breakers are created on first use and survive configuration reloads for
/// as long as their provider stays registered.
#[derive(Debug)]
pub struct CircuitBreakerGroup {
    config: RwLock<CircuitBreakerConfig>,
    breakers: RwLock<HashMap<String, CircuitBreaker>>,
}

impl CircuitBreakerGroup {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: RwLock::new(config),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get the breaker for a provider, creating it if needed
    pub fn get(&self, name: &str) -> CircuitBreaker {
        if let Some(breaker) = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return breaker.clone();
        }

        let config = self
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(name, config))
            .clone()
    }

    /// Drop breakers for providers that are no longer registered
    pub fn retain<S: AsRef<str>>(&self, names: &[S]) {
        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        breakers.retain(|name, _| names.iter().any(|n| n.as_ref() == name));
    }

    /// Apply new tunables to every breaker, keeping state and counters
    pub fn reconfigure(&self, config: CircuitBreakerConfig) {
        let mut current = self.config.write().unwrap_or_else(PoisonError::into_inner);
        if *current == config {
            return;
        }
        *current = config.clone();
        drop(current);

        let breakers = self.breakers.read().unwrap_or_else(PoisonError::into_inner);
        for breaker in breakers.values() {
            breaker.set_config(config.clone());
        }
        info!(count = breakers.len(), "Circuit breaker tunables changed");
    }

    /// Reset one breaker. Returns false if no breaker exists for the name.
    pub fn reset(&self, name: &str) -> bool {
        match self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
        {
            breaker.reset();
        }
    }

    /// Metrics for every breaker, sorted by provider name
    pub fn snapshot(&self) -> BTreeMap<String, CircuitMetrics> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.get_metrics()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CircuitBreakerGroup {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(10);

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_closed_to_open() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("stt-a", config);

        for _ in 0..3 {
            assert!(breaker.is_available());
            breaker.record_failure(MS);
        }

        assert!(breaker.get_state().is_open());
        assert!(!breaker.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_to_half_open_after_recovery_timeout() {
        let config = CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("stt-a", config);

        for _ in 0..5 {
            breaker.record_failure(MS);
        }
        assert!(breaker.get_state().is_open());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!breaker.is_available());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(breaker.is_available());
        assert_eq!(breaker.get_state(), CircuitState::HalfOpen);

        breaker.record_success(MS);
        assert_eq!(breaker.get_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_restarts_timer() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(10),
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("tts-a", config);

        breaker.record_failure(MS);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(breaker.is_available());

        breaker.record_failure(MS);
        assert!(breaker.get_state().is_open());

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!breaker.is_available());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(breaker.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_trials() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(1),
            success_threshold: 2,
            half_open_max_calls: 1,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("tts-a", config);

        breaker.record_failure(MS);
        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(breaker.is_available());
        assert!(!breaker.is_available(), "second trial should wait");

        breaker.record_success(MS);
        assert_eq!(breaker.get_state(), CircuitState::HalfOpen);
        assert!(breaker.is_available());
        breaker.record_success(MS);
        assert_eq!(breaker.get_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_trial_frees_slot() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("tts-a", config);

        breaker.record_failure(MS);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(breaker.is_available());
        breaker.release_trial();
        assert!(breaker.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_rate_trips_without_consecutive_threshold() {
        let config = CircuitBreakerConfig {
            failure_threshold: 100,
            failure_rate_threshold: 0.5,
            minimum_calls: 4,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("stt-b", config);

        breaker.record_success(MS);
        breaker.record_failure(MS);
        breaker.record_success(MS);
        assert_eq!(breaker.get_state(), CircuitState::Closed);

        breaker.record_failure(MS);
        assert!(breaker.get_state().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_forgets_old_outcomes() {
        let config = CircuitBreakerConfig {
            failure_threshold: 100,
            minimum_calls: 2,
            window_duration: Duration::from_secs(30),
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("stt-b", config);

        breaker.record_failure(MS);
        tokio::time::advance(Duration::from_secs(31)).await;
        breaker.record_success(MS);

        let metrics = breaker.get_metrics();
        assert_eq!(metrics.window_calls, 1);
        assert_eq!(metrics.failure_rate, 0.0);
        assert_eq!(breaker.get_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new_default("stt-a");
        breaker.record_failure(MS);
        breaker.record_failure(MS);
        assert_eq!(breaker.get_failure_count(), 2);
        breaker.record_success(MS);
        assert_eq!(breaker.get_failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_track_latency_and_rejections() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("stt-a", config);
        breaker.record_failure(Duration::from_millis(30));
        assert!(!breaker.is_available());
        assert!(!breaker.is_available());

        let metrics = breaker.get_metrics();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.total_failures, 1);
        assert_eq!(metrics.rejected_calls, 2);
        assert_eq!(metrics.average_latency, Some(Duration::from_millis(30)));
        assert!(metrics.state.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("stt-a", config);

        breaker.record_failure(MS);
        breaker.reset();

        assert_eq!(breaker.get_state(), CircuitState::Closed);
        assert_eq!(breaker.get_failure_count(), 0);
        assert!(breaker.is_available());
    }

    #[tokio::test]
    async fn test_concurrent_failures_are_not_lost() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1_000,
            minimum_calls: usize::MAX,
            window_size: 10_000,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("stt-a", config);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let breaker = breaker.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    breaker.record_failure(MS);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(breaker.get_failure_count(), 400);
        assert_eq!(breaker.get_metrics().total_failures, 400);
    }

    #[test]
    fn test_group_creates_and_retains() {
        let group = CircuitBreakerGroup::default();
        group.get("a").record_failure(MS);
        group.get("b");
        assert_eq!(group.len(), 2);
        assert_eq!(group.get("a").get_failure_count(), 1);

        group.retain(&["a"]);
        assert_eq!(group.len(), 1);
        assert_eq!(group.snapshot().keys().collect::<Vec<_>>(), vec!["a"]);
        assert!(!group.reset("b"));
        assert!(group.reset("a"));
        assert_eq!(group.get("a").get_failure_count(), 0);
    }

    #[test]
    fn test_group_reconfigure_keeps_counters() {
        let group = CircuitBreakerGroup::default();
        group.get("a").record_failure(MS);

        group.reconfigure(CircuitBreakerConfig {
            failure_threshold: 9,
            ..Default::default()
        });
        assert_eq!(group.get("a").get_failure_count(), 1);
        assert_eq!(group.get("a").config().failure_threshold, 9);
        // Breakers created afterwards pick up the new tunables too
        assert_eq!(group.get("b").config().failure_threshold, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_keeps_open_circuit_open() {
        let group = CircuitBreakerGroup::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
            ..Default::default()
        });
        let breaker = group.get("a");
        breaker.record_failure(MS);
        assert!(breaker.get_state().is_open());

        group.reconfigure(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(120),
            success_threshold: 1,
            ..Default::default()
        });
        assert!(group.get("a").get_state().is_open());
        assert!(!breaker.is_available());

        // The pending probe time was scheduled under the old timeout
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(breaker.is_available());
        assert_eq!(breaker.get_state(), CircuitState::HalfOpen);

        // Reopening uses the new timeout
        breaker.record_failure(MS);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!breaker.is_available());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(breaker.is_available());
    }
}

//! Pooled provider execution with retry
//!
//! One [`ConnectionPool`] per provider. [`ConnectionManager::execute`]
//! checks out a connection, invokes the provider under a hard per-call
//! timeout, and retries transient failures according to the configured
//! [`RetryPolicy`]. Authentication and validation errors surface on the
//! first attempt.
//!
//! Connections that fail with a transport-level error are discarded rather
//! than returned to the pool.

use crate::provider::{OperationRequest, Payload, ProviderAdapter, ProviderConnection, ProviderError};
use async_trait::async_trait;
use relay_core_resilience::{
    Checkout, ConnectionFactory, ConnectionPool, ErrorClass, PoolConfig, PoolStats,
    ResilienceError, RetryDecision, RetryPolicy,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

type ProviderPool = ConnectionPool<Box<dyn ProviderConnection>>;

/// Default per-call timeout when the adapter doesn't declare one
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens connections through a provider adapter
struct AdapterConnector {
    adapter: Arc<dyn ProviderAdapter>,
}

#[async_trait]
impl ConnectionFactory<Box<dyn ProviderConnection>> for AdapterConnector {
    async fn create(&self) -> Result<Box<dyn ProviderConnection>, ResilienceError> {
        self.adapter.connect().await.map_err(ResilienceError::from)
    }

    async fn is_healthy(&self, conn: &Box<dyn ProviderConnection>) -> bool {
        conn.is_usable()
    }
}

struct PoolSlot {
    adapter: Arc<dyn ProviderAdapter>,
    pool: Arc<ProviderPool>,
}

/// Result of a successful execution
#[derive(Debug, Clone)]
pub struct ExecuteSuccess {
    pub payload: Payload,
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// Wall time across all attempts and backoff
    pub latency: Duration,
}

/// Result of a failed execution, after retries
#[derive(Debug, Clone)]
pub struct ExecuteFailure {
    pub error: ProviderError,
    pub class: ErrorClass,
    pub attempts: u32,
    pub latency: Duration,
}

/// Tunables for the connection manager
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub pool: PoolConfig,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            retry: RetryPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Owns per-provider pools and runs the retry loop
pub struct ConnectionManager {
    settings: RwLock<ConnectionSettings>,
    pools: RwLock<HashMap<String, PoolSlot>>,
}

impl ConnectionManager {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            pools: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> ConnectionSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install new settings and drop all pools
    ///
    /// Pools are rebuilt lazily with the new limits. Connections checked out
    /// from the old pools are closed when their callers finish.
    pub async fn reconfigure(&self, settings: ConnectionSettings) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
        self.reset_pools().await;
    }

    /// Close idle connections and forget every pool
    pub async fn reset_pools(&self) {
        let drained: Vec<Arc<ProviderPool>> = self
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, slot)| slot.pool)
            .collect();

        for pool in drained {
            pool.clear_idle().await;
        }
    }

    /// Drop the pool of one provider
    pub async fn remove_pool(&self, provider: &str) -> bool {
        let removed = self
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(provider);
        match removed {
            Some(slot) => {
                slot.pool.clear_idle().await;
                true
            }
            None => false,
        }
    }

    /// Pool statistics per provider
    pub async fn pool_stats(&self) -> BTreeMap<String, PoolStats> {
        let pools: Vec<(String, Arc<ProviderPool>)> = self
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, slot)| (name.clone(), slot.pool.clone()))
            .collect();

        let mut stats = BTreeMap::new();
        for (name, pool) in pools {
            stats.insert(name, pool.stats().await);
        }
        stats
    }

    /// Pool for a provider, rebuilt if the adapter instance changed
    fn pool_for(&self, provider: &str, adapter: &Arc<dyn ProviderAdapter>) -> Arc<ProviderPool> {
        if let Some(slot) = self
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
        {
            if Arc::ptr_eq(&slot.adapter, adapter) {
                return slot.pool.clone();
            }
        }

        let pool_config = self.settings().pool;
        let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = pools.get(provider) {
            if Arc::ptr_eq(&slot.adapter, adapter) {
                return slot.pool.clone();
            }
        }

        debug!(provider = %provider, max_size = pool_config.max_size, "Creating connection pool");
        let factory = Arc::new(AdapterConnector {
            adapter: adapter.clone(),
        });
        let pool = Arc::new(ProviderPool::new(factory, pool_config));
        pools.insert(
            provider.to_string(),
            PoolSlot {
                adapter: adapter.clone(),
                pool: pool.clone(),
            },
        );
        pool
    }

    /// Execute a request against one provider with retry
    pub async fn execute(
        &self,
        provider: &str,
        adapter: &Arc<dyn ProviderAdapter>,
        request: &OperationRequest,
    ) -> Result<ExecuteSuccess, ExecuteFailure> {
        let settings = self.settings();
        let pool = self.pool_for(provider, adapter);
        let timeout = adapter
            .request_timeout()
            .unwrap_or(settings.request_timeout);
        let started = Instant::now();

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let error = match attempt_once(&pool, request, timeout).await {
                Ok(payload) => {
                    if attempt > 1 {
                        debug!(provider = %provider, attempts = attempt, "Request succeeded after retry");
                    }
                    return Ok(ExecuteSuccess {
                        payload,
                        attempts: attempt,
                        latency: started.elapsed(),
                    });
                }
                Err(e) => e,
            };

            let class = error.classify();
            match settings.retry.decide(class, attempt) {
                RetryDecision::Retry(delay) => {
                    let delay = error
                        .retry_after()
                        .map_or(delay, |hint| delay.max(hint).min(settings.retry.max_delay));
                    warn!(
                        provider = %provider,
                        attempt,
                        error = %error,
                        delay_ms = delay.as_millis() as u64,
                        "Transient provider error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    debug!(
                        provider = %provider,
                        attempts = attempt,
                        class = ?class,
                        error = %error,
                        "Giving up on provider"
                    );
                    return Err(ExecuteFailure {
                        error,
                        class,
                        attempts: attempt,
                        latency: started.elapsed(),
                    });
                }
            }
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ConnectionSettings::default())
    }
}

/// One checkout, one call, one release or discard
async fn attempt_once(
    pool: &ProviderPool,
    request: &OperationRequest,
    timeout: Duration,
) -> Result<Payload, ProviderError> {
    let mut checkout: Checkout<Box<dyn ProviderConnection>> =
        pool.acquire().await.map_err(ProviderError::from)?;

    match tokio::time::timeout(timeout, checkout.get_mut().invoke(request)).await {
        Ok(Ok(payload)) => {
            pool.release(checkout).await;
            Ok(payload)
        }
        Ok(Err(e)) => {
            if e.breaks_connection() || !checkout.get().is_usable() {
                pool.discard(checkout).await;
            } else {
                pool.release(checkout).await;
            }
            Err(e)
        }
        Err(_) => {
            pool.discard(checkout).await;
            Err(ProviderError::Timeout(timeout))
        }
    }
}

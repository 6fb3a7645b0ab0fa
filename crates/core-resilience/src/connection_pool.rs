//! Generic connection pool for reusable connections
//!
//! Provides connection reuse with a hard size limit, idle timeouts,
//! maximum lifetimes and health checking on checkout and return.

use super::error::ResilienceError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::debug;

/// Configuration for connection pool behavior
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool
    pub max_size: usize,
    /// Maximum time a connection can remain idle before being closed
    pub idle_timeout: Option<Duration>,
    /// Maximum lifetime of a connection
    pub max_lifetime: Option<Duration>,
    /// Timeout for acquiring a connection from the pool
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            idle_timeout: Some(Duration::from_secs(300)), // 5 minutes
            max_lifetime: Some(Duration::from_secs(1800)), // 30 minutes
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// A connection wrapper that tracks metadata
#[derive(Debug)]
struct PooledConnection<T> {
    conn: T,
    created_at: Instant,
    last_used: Instant,
}

impl<T> PooledConnection<T> {
    fn new(conn: T, created_at: Instant) -> Self {
        Self {
            conn,
            created_at,
            last_used: Instant::now(),
        }
    }

    fn is_expired(&self, config: &PoolConfig) -> bool {
        if let Some(idle_timeout) = config.idle_timeout {
            if self.last_used.elapsed() > idle_timeout {
                return true;
            }
        }

        if let Some(max_lifetime) = config.max_lifetime {
            if self.created_at.elapsed() > max_lifetime {
                return true;
            }
        }

        false
    }
}

/// Factory trait for creating and validating connections
#[async_trait::async_trait]
pub trait ConnectionFactory<T: Send + 'static>: Send + Sync {
    /// Create a new connection
    async fn create(&self) -> Result<T, ResilienceError>;

    /// Check if a connection is still usable
    async fn is_healthy(&self, conn: &T) -> bool;

    /// Close a connection (optional cleanup)
    async fn close(&self, conn: T) {
        drop(conn);
    }
}

/// One occupied pool slot.
///
/// Dropping it frees the slot, so a checkout abandoned mid-call (task
/// cancelled, deadline hit) never leaks capacity.
#[derive(Debug)]
struct Slot {
    active: Arc<AtomicUsize>,
    semaphore: Arc<Semaphore>,
}

impl Slot {
    /// Take ownership of a permit already removed from the semaphore
    fn occupy(active: &Arc<AtomicUsize>, semaphore: &Arc<Semaphore>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self {
            active: active.clone(),
            semaphore: semaphore.clone(),
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.semaphore.add_permits(1);
    }
}

/// A connection checked out of the pool.
///
/// Hand it back with [`ConnectionPool::release`] or [`ConnectionPool::discard`].
/// Dropping it closes nothing but frees its slot.
#[derive(Debug)]
pub struct Checkout<T> {
    conn: T,
    created_at: Instant,
    slot: Slot,
}

impl<T> Checkout<T> {
    pub fn get(&self) -> &T {
        &self.conn
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.conn
    }

    /// Age of the underlying connection
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// A bounded pool of reusable connections
///
/// The total number of connections (idle + checked out) never exceeds
/// `max_size`; a semaphore holds one permit per connection slot.
///
/// # Example
/// ```no_run
/// use relay_core_resilience::{ConnectionPool, PoolConfig, ConnectionFactory, ResilienceError};
/// use std::sync::Arc;
///
/// struct Client;
/// struct ClientFactory;
///
/// #[async_trait::async_trait]
/// impl ConnectionFactory<Client> for ClientFactory {
///     async fn create(&self) -> Result<Client, ResilienceError> {
///         Ok(Client)
///     }
///
///     async fn is_healthy(&self, _conn: &Client) -> bool {
///         true
///     }
/// }
///
/// # async fn example() -> Result<(), ResilienceError> {
/// let pool = ConnectionPool::new(Arc::new(ClientFactory), PoolConfig::default());
///
/// let conn = pool.acquire().await?;
/// // Use conn.get()...
/// pool.release(conn).await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool<T> {
    config: Arc<PoolConfig>,
    factory: Arc<dyn ConnectionFactory<T>>,
    idle: Mutex<Vec<PooledConnection<T>>>,
    active: Arc<AtomicUsize>,
    semaphore: Arc<Semaphore>,
}

impl<T: Send + 'static> ConnectionPool<T> {
    /// Create a new connection pool
    pub fn new(factory: Arc<dyn ConnectionFactory<T>>, config: PoolConfig) -> Self {
        let max_size = config.max_size;
        Self {
            config: Arc::new(config),
            factory,
            idle: Mutex::new(Vec::new()),
            active: Arc::new(AtomicUsize::new(0)),
            semaphore: Arc::new(Semaphore::new(max_size)),
        }
    }

    /// Create a connection pool with default configuration
    pub fn new_default(factory: Arc<dyn ConnectionFactory<T>>) -> Self {
        Self::new(factory, PoolConfig::default())
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Acquire a connection from the pool
    ///
    /// Reuses a healthy idle connection if one exists, otherwise creates a new
    /// one. If the pool is at max capacity this waits up to `acquire_timeout`.
    pub async fn acquire(&self) -> Result<Checkout<T>, ResilienceError> {
        let permit = tokio::time::timeout(self.config.acquire_timeout, self.semaphore.acquire())
            .await
            .map_err(|_| ResilienceError::AcquireTimeout(self.config.acquire_timeout))?
            .map_err(|_| ResilienceError::PoolExhausted)?;

        // The slot owns the permit from here on
        permit.forget();
        let slot = Slot::occupy(&self.active, &self.semaphore);

        let mut idle = self.idle.lock().await;
        let config = self.config.clone();
        let (expired, fresh): (Vec<_>, Vec<_>) = std::mem::take(&mut *idle)
            .into_iter()
            .partition(|pooled| pooled.is_expired(&config));
        *idle = fresh;

        // Try to reuse an idle connection
        while let Some(pooled) = idle.pop() {
            if self.factory.is_healthy(&pooled.conn).await {
                drop(idle);
                self.close_all(expired).await;
                return Ok(Checkout {
                    conn: pooled.conn,
                    created_at: pooled.created_at,
                    slot,
                });
            }
            debug!("Dropping unhealthy idle connection");
            self.factory.close(pooled.conn).await;
        }

        drop(idle);
        self.close_all(expired).await;

        // A failed create drops the slot and frees the permit
        let conn = self.factory.create().await?;
        Ok(Checkout {
            conn,
            created_at: Instant::now(),
            slot,
        })
    }

    /// Return a connection to the pool
    ///
    /// The connection is checked for health before being returned to the idle
    /// set. If unhealthy or the pool is over capacity, it is closed instead.
    pub async fn release(&self, checkout: Checkout<T>) {
        let Checkout {
            conn,
            created_at,
            slot,
        } = checkout;

        let healthy = self.factory.is_healthy(&conn).await;
        let mut idle = self.idle.lock().await;
        // `active` still counts this connection
        let within_capacity =
            idle.len() + self.active.load(Ordering::SeqCst) <= self.config.max_size;

        if healthy && within_capacity {
            idle.push(PooledConnection::new(conn, created_at));
            drop(idle);
            drop(slot);
        } else {
            drop(idle);
            drop(slot);
            self.factory.close(conn).await;
        }
    }

    /// Close a connection the transport reported as broken and free its slot
    pub async fn discard(&self, checkout: Checkout<T>) {
        let Checkout { conn, slot, .. } = checkout;
        drop(slot);
        self.factory.close(conn).await;
    }

    /// Get current pool statistics
    pub async fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().await.len();
        let active = self.active.load(Ordering::SeqCst);
        PoolStats {
            idle,
            active,
            total: idle + active,
            max_size: self.config.max_size,
        }
    }

    /// Close all idle connections
    pub async fn clear_idle(&self) {
        let idle = std::mem::take(&mut *self.idle.lock().await);
        self.close_all(idle).await;
    }

    async fn close_all(&self, connections: Vec<PooledConnection<T>>) {
        for pooled in connections {
            self.factory.close(pooled.conn).await;
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of idle connections
    pub idle: usize,
    /// Number of checked-out connections
    pub active: usize,
    /// Total connections (idle + active)
    pub total: usize,
    /// Maximum pool size
    pub max_size: usize,
}

impl PoolStats {
    /// Get pool utilization as a percentage
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            (self.total as f64 / self.max_size as f64) * 100.0
        }
    }
}

//! Content-addressed result cache
//!
//! Results are keyed by a [`Fingerprint`]: a SHA-256 digest of the operation
//! type, the normalized input and the request parameters. The operation type
//! takes part in the digest, so different operations never share entries.
//!
//! The cache is a pure optimization. Backends may lose entries at any time;
//! callers must treat errors as misses.

use super::error::ResilienceError;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

const FINGERPRINT_DOMAIN: &[u8] = b"relay-fingerprint-v1";

/// Deterministic identity of a cacheable request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a request.
    ///
    /// Identical `(operation_type, normalized_input, params)` always yield the
    /// same fingerprint. Parameter maps are encoded with sorted keys at every
    /// nesting level, independent of insertion order.
    pub fn compute(
        operation_type: &str,
        normalized_input: &[u8],
        params: &BTreeMap<String, Value>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_DOMAIN);
        write_bytes(&mut hasher, operation_type.as_bytes());
        write_bytes(&mut hasher, normalized_input);
        write_len(&mut hasher, params.len());
        for (key, value) in params {
            write_bytes(&mut hasher, key.as_bytes());
            write_value(&mut hasher, value);
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn write_len(hasher: &mut Sha256, len: usize) {
    hasher.update((len as u64).to_be_bytes());
}

fn write_bytes(hasher: &mut Sha256, bytes: &[u8]) {
    write_len(hasher, bytes.len());
    hasher.update(bytes);
}

fn write_value(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Null => hasher.update(b"n"),
        Value::Bool(true) => hasher.update(b"t"),
        Value::Bool(false) => hasher.update(b"f"),
        Value::Number(n) => {
            hasher.update(b"d");
            write_bytes(hasher, n.to_string().as_bytes());
        }
        Value::String(s) => {
            hasher.update(b"s");
            write_bytes(hasher, s.as_bytes());
        }
        Value::Array(items) => {
            hasher.update(b"a");
            write_len(hasher, items.len());
            for item in items {
                write_value(hasher, item);
            }
        }
        Value::Object(map) => {
            hasher.update(b"o");
            write_len(hasher, map.len());
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                write_bytes(hasher, key.as_bytes());
                write_value(hasher, &map[key]);
            }
        }
    }
}

/// Storage for serialized results
///
/// Lookups may be remote calls, hence async.
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns `None` if absent or expired
    async fn get(&self, key: &Fingerprint) -> Result<Option<Vec<u8>>, ResilienceError>;

    /// Store a value, overwriting any existing entry
    async fn put(
        &self,
        key: &Fingerprint,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), ResilienceError>;

    /// Remove an entry. Returns true if one was present.
    async fn invalidate(&self, key: &Fingerprint) -> Result<bool, ResilienceError>;

    /// Drop every entry
    async fn clear(&self) -> Result<(), ResilienceError>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

/// Cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// In-process cache with TTL expiry and a bounded entry count
///
/// When full, expired entries are purged first, then the oldest entry is
/// evicted.
#[derive(Debug)]
pub struct MemoryCache {
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Synchronous lookup used by the async trait implementation
    pub fn get_now(&self, key: &Fingerprint) -> Option<Vec<u8>> {
        let now = Instant::now();
        let found = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries.get(key).map(|e| (e.is_expired(now), e.value.clone()))
        };

        match found {
            Some((false, value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some((true, _)) => {
                let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
                if entries.get(key).is_some_and(|e| e.is_expired(now)) {
                    entries.remove(key);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Synchronous store used by the async trait implementation
    pub fn put_now(&self, key: &Fingerprint, value: Vec<u8>, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            let before = entries.len();
            entries.retain(|_, e| !e.is_expired(now));
            let mut evicted = (before - entries.len()) as u64;

            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.created_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                    evicted += 1;
                }
            }
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
            trace!(evicted, "Cache full, evicted entries");
        }

        entries.insert(
            key.clone(),
            CacheEntry {
                value,
                created_at: now,
                ttl,
            },
        );
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait::async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &Fingerprint) -> Result<Option<Vec<u8>>, ResilienceError> {
        Ok(self.get_now(key))
    }

    async fn put(
        &self,
        key: &Fingerprint,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), ResilienceError> {
        self.put_now(key, value, ttl);
        Ok(())
    }

    async fn invalidate(&self, key: &Fingerprint) -> Result<bool, ResilienceError> {
        Ok(self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some())
    }

    async fn clear(&self) -> Result<(), ResilienceError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

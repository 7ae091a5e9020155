//! Two-tier caching layer for expensive read-side queries
//!
//! Reads check an in-process bounded LRU (L1) first, then Redis (L2); an L2
//! hit repopulates L1. Writes land in both tiers with a matching TTL.
//! Every entry carries a tag set: invalidating a tag removes every key
//! whose tags intersect it, in both tiers. Pattern invalidation deletes
//! keys under a wildcard prefix.
//!
//! L2 failures are logged and never surfaced; the system behaves as a
//! cache miss and keeps running. Every L2 call sits under a hard 5-second
//! ceiling.
//!
//! # Keys
//!
//! Keys are deterministic strings derived from the operation name and a
//! sorted argument representation; arguments longer than 200 characters
//! are replaced by their SHA-256 hash.

use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use lru::LruCache;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::CacheError;

/// Hard ceiling on any single L2 call
pub const L2_TIMEOUT: Duration = Duration::from_secs(5);

/// Arguments longer than this are hashed into the key
const MAX_KEY_ARG_LEN: usize = 200;

// ============================================================================
// Configuration
// ============================================================================

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis URL; empty disables the L2 tier
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Default TTL in seconds
    pub default_ttl: u64,

    /// Key prefix for namespacing
    pub key_prefix: String,

    /// L1 entry capacity
    pub l1_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            default_ttl: 300,
            key_prefix: "rota".to_string(),
            l1_capacity: 1024,
        }
    }
}

impl CacheConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            pool_size: std::env::var("REDIS_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            default_ttl: std::env::var("CACHE_DEFAULT_TTL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            key_prefix: std::env::var("CACHE_KEY_PREFIX").unwrap_or_else(|_| "rota".to_string()),
            l1_capacity: std::env::var("CACHE_L1_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024),
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Hit/miss counters across both tiers
#[derive(Debug, Default)]
pub struct CacheStats {
    pub l1_hits: AtomicU64,
    pub l2_hits: AtomicU64,
    pub misses: AtomicU64,
    pub l2_errors: AtomicU64,
}

impl CacheStats {
    /// Combined hit rate over all lookups
    pub fn hit_rate(&self) -> f64 {
        let hits = self.l1_hits.load(Ordering::Relaxed) + self.l2_hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

// ============================================================================
// L1 entry
// ============================================================================

struct L1Entry {
    bytes: Vec<u8>,
    expires_at: Instant,
    tags: Vec<String>,
}

impl L1Entry {
    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

// ============================================================================
// Tiered Cache
// ============================================================================

/// L1 LRU + L2 Redis cache with tag invalidation
pub struct TieredCache {
    l1: Mutex<LruCache<String, L1Entry>>,
    l2: Option<Pool>,
    config: CacheConfig,
    stats: CacheStats,
}

impl TieredCache {
    /// Create a cache; L2 pool construction failure degrades to L1-only
    pub fn new(config: CacheConfig) -> Self {
        let l2 = if config.url.is_empty() {
            None
        } else {
            match PoolConfig::from_url(&config.url)
                .builder()
                .map(|b| b.max_size(config.pool_size).runtime(Runtime::Tokio1).build())
            {
                Ok(Ok(pool)) => Some(pool),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "L2 pool unavailable, running L1-only");
                    None
                }
                Err(e) => {
                    tracing::warn!(error = %e, "L2 config invalid, running L1-only");
                    None
                }
            }
        };

        let capacity =
            NonZeroUsize::new(config.l1_capacity.max(1)).expect("non-zero L1 capacity");

        Self {
            l1: Mutex::new(LruCache::new(capacity)),
            l2,
            config,
            stats: CacheStats::default(),
        }
    }

    /// L1-only cache, used by tests and redis-free deployments
    pub fn in_memory_only(l1_capacity: usize) -> Self {
        Self::new(CacheConfig {
            url: String::new(),
            l1_capacity,
            ..Default::default()
        })
    }

    /// Whether the L2 tier is configured
    pub fn has_l2(&self) -> bool {
        self.l2.is_some()
    }

    /// Hit/miss counters
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    // =========================================================================
    // Key Generation
    // =========================================================================

    /// Deterministic key from operation name and sorted arguments
    pub fn build_key(&self, operation: &str, args: &[&str]) -> String {
        let mut parts: Vec<String> = args.iter().map(|arg| Self::key_arg(arg)).collect();
        parts.sort();
        format!("{}:{operation}:{}", self.config.key_prefix, parts.join(":"))
    }

    fn key_arg(arg: &str) -> String {
        if arg.len() > MAX_KEY_ARG_LEN {
            let mut hasher = Sha256::new();
            hasher.update(arg.as_bytes());
            format!("{:x}", hasher.finalize())
        } else {
            arg.to_string()
        }
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}:tag:{tag}", self.config.key_prefix)
    }

    // =========================================================================
    // Read / Write
    // =========================================================================

    /// Look up a key: L1, then L2 (populating L1 on hit)
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        // L1
        {
            enum Probe {
                Fresh(Vec<u8>),
                Stale,
                Absent,
            }

            let mut l1 = self.l1.lock().expect("l1 lock poisoned");
            let probe = match l1.get(key) {
                Some(entry) if entry.is_fresh() => Probe::Fresh(entry.bytes.clone()),
                Some(_) => Probe::Stale,
                None => Probe::Absent,
            };
            match probe {
                Probe::Fresh(bytes) => {
                    self.stats.l1_hits.fetch_add(1, Ordering::Relaxed);
                    if let Ok(decoded) = serde_json::from_slice(&bytes) {
                        return Some(decoded);
                    }
                }
                Probe::Stale => {
                    l1.pop(key);
                }
                Probe::Absent => {}
            }
        }

        // L2
        match self.l2_get(key).await {
            Ok(Some((bytes, ttl))) => {
                self.stats.l2_hits.fetch_add(1, Ordering::Relaxed);
                let decoded = serde_json::from_slice(&bytes).ok();
                if decoded.is_some() {
                    let mut l1 = self.l1.lock().expect("l1 lock poisoned");
                    l1.put(
                        key.to_string(),
                        L1Entry {
                            bytes,
                            expires_at: Instant::now() + ttl,
                            tags: Vec::new(),
                        },
                    );
                }
                decoded
            }
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.stats.l2_errors.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, key = %key, "L2 read failed, treating as miss");
                None
            }
        }
    }

    /// Write to both tiers with a matching TTL and tag set
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration, tags: &[String]) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "cache serialization failed");
                return;
            }
        };

        {
            let mut l1 = self.l1.lock().expect("l1 lock poisoned");
            l1.put(
                key.to_string(),
                L1Entry {
                    bytes: bytes.clone(),
                    expires_at: Instant::now() + ttl,
                    tags: tags.to_vec(),
                },
            );
        }

        if let Err(e) = self.l2_set(key, &bytes, ttl, tags).await {
            self.stats.l2_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, key = %key, "L2 write failed, entry is L1-only");
        }
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Remove every key whose tag set contains `tag`; returns keys removed
    pub async fn invalidate_by_tag(&self, tag: &str) -> u64 {
        let mut removed = 0u64;

        {
            let mut l1 = self.l1.lock().expect("l1 lock poisoned");
            let keys: Vec<String> = l1
                .iter()
                .filter(|(_, entry)| entry.tags.iter().any(|t| t == tag))
                .map(|(key, _)| key.clone())
                .collect();
            for key in keys {
                l1.pop(&key);
                removed += 1;
            }
        }

        match self.l2_invalidate_tag(tag).await {
            Ok(count) => removed = removed.max(count),
            Err(e) => {
                self.stats.l2_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, tag = %tag, "L2 tag invalidation failed");
            }
        }

        tracing::debug!(tag = %tag, removed, "tag invalidated");
        removed
    }

    /// Delete keys matching a wildcard prefix (`prefix*`)
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let prefix = pattern.trim_end_matches('*');
        let mut removed = 0u64;

        {
            let mut l1 = self.l1.lock().expect("l1 lock poisoned");
            let keys: Vec<String> = l1
                .iter()
                .filter(|(key, _)| key.starts_with(prefix))
                .map(|(key, _)| key.clone())
                .collect();
            for key in keys {
                l1.pop(&key);
                removed += 1;
            }
        }

        match self.l2_invalidate_pattern(pattern).await {
            Ok(count) => removed = removed.max(count),
            Err(e) => {
                self.stats.l2_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, pattern = %pattern, "L2 pattern invalidation failed");
            }
        }

        removed
    }

    // =========================================================================
    // L2 plumbing
    // =========================================================================

    async fn l2_get(&self, key: &str) -> Result<Option<(Vec<u8>, Duration)>, CacheError> {
        let Some(pool) = &self.l2 else {
            return Ok(None);
        };

        let work = async {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| CacheError::Pool(e.to_string()))?;
            let bytes: Option<Vec<u8>> = conn.get(key).await?;
            match bytes {
                Some(bytes) => {
                    let ttl_secs: i64 = conn.ttl(key).await?;
                    let ttl = if ttl_secs > 0 {
                        Duration::from_secs(ttl_secs as u64)
                    } else {
                        Duration::from_secs(self.config.default_ttl)
                    };
                    Ok(Some((bytes, ttl)))
                }
                None => Ok(None),
            }
        };

        tokio::time::timeout(L2_TIMEOUT, work)
            .await
            .map_err(|_| CacheError::Timeout(L2_TIMEOUT.as_secs()))?
    }

    async fn l2_set(
        &self,
        key: &str,
        bytes: &[u8],
        ttl: Duration,
        tags: &[String],
    ) -> Result<(), CacheError> {
        let Some(pool) = &self.l2 else {
            return Ok(());
        };

        let work = async {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| CacheError::Pool(e.to_string()))?;
            conn.set_ex::<_, _, ()>(key, bytes, ttl.as_secs().max(1))
                .await?;
            for tag in tags {
                let tag_key = self.tag_key(tag);
                conn.sadd::<_, _, ()>(&tag_key, key).await?;
                conn.expire::<_, ()>(&tag_key, ttl.as_secs().max(1) as i64)
                    .await?;
            }
            Ok(())
        };

        tokio::time::timeout(L2_TIMEOUT, work)
            .await
            .map_err(|_| CacheError::Timeout(L2_TIMEOUT.as_secs()))?
    }

    async fn l2_invalidate_tag(&self, tag: &str) -> Result<u64, CacheError> {
        let Some(pool) = &self.l2 else {
            return Ok(0);
        };

        let tag_key = self.tag_key(tag);
        let work = async {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| CacheError::Pool(e.to_string()))?;
            let keys: Vec<String> = conn.smembers(&tag_key).await?;
            if keys.is_empty() {
                return Ok(0);
            }
            let count = keys.len() as u64;
            conn.del::<_, ()>(keys).await?;
            conn.del::<_, ()>(&tag_key).await?;
            Ok(count)
        };

        tokio::time::timeout(L2_TIMEOUT, work)
            .await
            .map_err(|_| CacheError::Timeout(L2_TIMEOUT.as_secs()))?
    }

    async fn l2_invalidate_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let Some(pool) = &self.l2 else {
            return Ok(0);
        };

        let work = async {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| CacheError::Pool(e.to_string()))?;
            let keys: Vec<String> = redis::cmd("KEYS")
                .arg(pattern)
                .query_async(&mut *conn)
                .await?;
            if keys.is_empty() {
                return Ok(0);
            }
            let count = keys.len() as u64;
            conn.del::<_, ()>(keys).await?;
            Ok(count)
        };

        tokio::time::timeout(L2_TIMEOUT, work)
            .await
            .map_err(|_| CacheError::Timeout(L2_TIMEOUT.as_secs()))?
    }
}

// ============================================================================
// Combinator
// ============================================================================

/// Explicit caching combinator: look up, or compute and store
///
/// Configuration is a value (namespace, TTL, tags), not hidden decoration;
/// the wrapped computation runs only on a miss.
pub struct Cached<'a> {
    cache: &'a TieredCache,
    namespace: &'a str,
    ttl: Duration,
    tags: Vec<String>,
}

impl<'a> Cached<'a> {
    pub fn new(cache: &'a TieredCache, namespace: &'a str, ttl: Duration) -> Self {
        Self {
            cache,
            namespace,
            ttl,
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Return the cached value for these arguments, or compute, store, and
    /// return it
    pub async fn run<T, F, Fut>(&self, args: &[&str], compute: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let key = self.cache.build_key(self.namespace, args);

        if let Some(hit) = self.cache.get::<T>(&key).await {
            tracing::debug!(key = %key, "cache hit");
            return hit;
        }

        tracing::debug!(key = %key, "cache miss, computing");
        let value = compute().await;
        self.cache.set(&key, &value, self.ttl, &self.tags).await;
        value
    }
}

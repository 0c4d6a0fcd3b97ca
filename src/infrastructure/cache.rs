// Target cache - in-process LRU with TTL for target views and listings
// Entries are bincode payloads; invalidation by exact key or glob pattern

use async_trait::async_trait;
use lru::LruCache;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::config::CacheConfig;
use crate::core::{TargetKind, TargetRef};
use crate::error::{AppError, AppResult};

/// Cache invalidation collaborator used by the vote listeners
#[async_trait]
pub trait CacheInvalidation: Send + Sync {
    async fn invalidate_key(&self, key: &str) -> AppResult<()>;
    /// Returns how many entries were dropped
    async fn invalidate_pattern(&self, pattern: &str) -> AppResult<u64>;
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Vec<u8>,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data,
            inserted_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

#[derive(Debug, Default)]
struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

pub struct TargetCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    default_ttl: Duration,
    metrics: CacheMetrics,
    /// Bumped under the entries lock on every invalidation
    generation: AtomicU64,
}

impl std::fmt::Debug for TargetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetCache")
            .field("default_ttl", &self.default_ttl)
            .field("stats", &self.stats())
            .finish()
    }
}

impl TargetCache {
    pub fn new(capacity: usize, default_ttl: Duration) -> AppResult<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            AppError::ConfigurationError("Cache capacity must be greater than zero".to_string())
        })?;

        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl,
            metrics: CacheMetrics::default(),
            generation: AtomicU64::new(0),
        })
    }

    pub fn from_config(config: &CacheConfig) -> AppResult<Self> {
        Self::new(config.capacity, config.ttl)
    }

    pub fn target_key(target: TargetRef) -> String {
        format!("target:{}:{}", target.kind, target.id)
    }

    pub fn listing_key(kind: TargetKind, limit: u32) -> String {
        format!("listing:{}:top:{}", kind, limit)
    }

    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let mut entries = self.entries.lock().await;

        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(bincode::deserialize(&entry.data)?));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
            debug!("Dropped expired cache entry {}", key);
        }
        self.metrics.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    /// Current invalidation generation. Capture it before reading the
    /// backing store and hand it to `put_if_current`.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    #[instrument(skip(self, value))]
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> AppResult<()> {
        let data = bincode::serialize(value)?;
        let mut entries = self.entries.lock().await;
        self.insert_locked(&mut entries, key, data);
        Ok(())
    }

    /// Store a value read from the backing store, unless an invalidation ran
    /// since `generation` was captured. Returns whether the value was stored.
    #[instrument(skip(self, value))]
    pub async fn put_if_current<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        generation: u64,
    ) -> AppResult<bool> {
        let data = bincode::serialize(value)?;
        let mut entries = self.entries.lock().await;

        if self.generation.load(Ordering::Acquire) != generation {
            debug!("Skipped caching {}, invalidated during read", key);
            return Ok(false);
        }
        self.insert_locked(&mut entries, key, data);
        Ok(true)
    }

    fn insert_locked(&self, entries: &mut LruCache<String, CacheEntry>, key: &str, data: Vec<u8>) {
        if let Some((evicted, _)) = entries.push(key.to_string(), CacheEntry::new(data, self.default_ttl)) {
            if evicted != key {
                self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("Evicted cache entry {}", evicted);
            }
        }
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        let removed = entries.pop(key).is_some();
        if removed {
            self.metrics.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Drop every key matching a glob pattern (`*` and `?` wildcards)
    pub async fn invalidate_matching(&self, pattern: &str) -> AppResult<u64> {
        let regex = glob_to_regex(pattern)?;
        let mut entries = self.entries.lock().await;
        self.generation.fetch_add(1, Ordering::AcqRel);

        let doomed: Vec<String> = entries
            .iter()
            .map(|(key, _)| key)
            .filter(|key| regex.is_match(key))
            .cloned()
            .collect();

        for key in &doomed {
            entries.pop(key);
        }

        let removed = doomed.len() as u64;
        self.metrics.invalidations.fetch_add(removed, Ordering::Relaxed);
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            evictions: self.metrics.evictions.load(Ordering::Relaxed),
            invalidations: self.metrics.invalidations.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl CacheInvalidation for TargetCache {
    async fn invalidate_key(&self, key: &str) -> AppResult<()> {
        self.invalidate(key).await;
        Ok(())
    }

    async fn invalidate_pattern(&self, pattern: &str) -> AppResult<u64> {
        self.invalidate_matching(pattern).await
    }
}

fn glob_to_regex(pattern: &str) -> AppResult<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');

    Regex::new(&source)
        .map_err(|e| AppError::Validation(format!("Invalid cache pattern {}: {}", pattern, e)))
}

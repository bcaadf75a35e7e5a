// src/cache.rs
// In-process translation cache: LRU-bounded, with optional TTL expiry.
// Scoped to the worker process lifetime; never persisted.

use crate::config::{CacheConfig, CachePolicy};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// One translation is cached per (text, target language, context hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub text: String,
    pub target_lang: String,
    pub context_hash: String,
}

impl CacheKey {
    pub fn new(
        text: impl Into<String>,
        target_lang: impl Into<String>,
        context_hash: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            target_lang: target_lang.into(),
            context_hash: context_hash.into(),
        }
    }
}

/// Cached translation and the engine that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTranslation {
    pub translated_text: String,
    pub engine_name: Option<String>,
}

struct Entry {
    value: CachedTranslation,
    inserted_at: Instant,
}

/// Bounded map guarded by a single async mutex. Lookups are cheap enough
/// that finer-grained locking has not been worth it.
pub struct TranslationCache {
    entries: Mutex<LruCache<CacheKey, Entry>>,
    ttl: Option<Duration>,
}

impl TranslationCache {
    pub fn new(config: &CacheConfig) -> Self {
        let ttl = match config.policy {
            CachePolicy::Ttl => Some(Duration::from_secs(config.ttl_secs)),
            CachePolicy::Lru => None,
        };
        Self::with_policy(config.maxsize, ttl)
    }

    /// Explicit capacity/TTL constructor (tests use sub-second TTLs).
    pub fn with_policy(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Fetch a live entry; expired entries are dropped on access.
    pub async fn get(&self, key: &CacheKey) -> Option<CachedTranslation> {
        let mut entries = self.entries.lock().await;
        let fresh = match entries.get(key) {
            None => return None,
            Some(entry) => match self.ttl {
                Some(ttl) if entry.inserted_at.elapsed() >= ttl => None,
                _ => Some(entry.value.clone()),
            },
        };
        if fresh.is_none() {
            entries.pop(key);
        }
        fresh
    }

    pub async fn put(&self, key: CacheKey, value: CachedTranslation) {
        let mut entries = self.entries.lock().await;
        entries.put(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

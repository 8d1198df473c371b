// Schema Cache
//
// Key-value store with per-entry expiry, and the typed read-through cache of
// ontology contexts built on it. Entries are keyed by tenant and workspace.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::api::middleware::AppError;
use crate::models::OntologyContext;

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn set_with_expiry(&self, key: &str, value: String, ttl: Duration) -> Result<(), AppError>;

    /// Returns whether an entry was removed
    async fn delete(&self, key: &str) -> Result<bool, AppError>;

    /// Drop expired entries, returning how many were removed
    async fn purge_expired(&self) -> Result<usize, AppError>;
}

#[derive(Debug, Clone)]
struct CachedEntry {
    value: String,
    cached_at: Instant,
    ttl: Duration,
    last_accessed: Instant,
}

impl CachedEntry {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, CachedEntry>,
    stats: CacheStats,
}

/// In-process TTL store with least-recently-used eviction
pub struct MemoryCacheStore {
    state: Mutex<MemoryState>,
    max_size: usize,
}

impl MemoryCacheStore {
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            max_size: max_size.max(1),
        }
    }

    pub async fn stats(&self) -> CacheStats {
        self.state.lock().await.stats.clone()
    }

    pub async fn size(&self) -> usize {
        self.state.lock().await.entries.len()
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let expired = match state.entries.get_mut(key) {
            Some(entry) if entry.is_expired() => true,
            Some(entry) => {
                entry.last_accessed = Instant::now();
                state.stats.hits += 1;
                tracing::debug!("Cache hit for key: {}", key);
                return Ok(Some(entry.value.clone()));
            }
            None => false,
        };

        if expired {
            state.entries.remove(key);
            state.stats.expirations += 1;
            tracing::debug!("Cache expired for key: {}", key);
        }
        state.stats.misses += 1;
        tracing::debug!("Cache miss for key: {}", key);
        Ok(None)
    }

    async fn set_with_expiry(&self, key: &str, value: String, ttl: Duration) -> Result<(), AppError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if state.entries.len() >= self.max_size && !state.entries.contains_key(key) {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
                state.stats.evictions += 1;
                tracing::debug!("Evicted cache entry: {}", oldest);
            }
        }

        let now = Instant::now();
        state.entries.insert(
            key.to_string(),
            CachedEntry {
                value,
                cached_at: now,
                ttl,
                last_accessed: now,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.state.lock().await.entries.remove(key).is_some())
    }

    async fn purge_expired(&self) -> Result<usize, AppError> {
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired());
        let removed = before - state.entries.len();
        state.stats.expirations += removed as u64;
        Ok(removed)
    }
}

/// Read-through cache of ontology contexts
pub struct SchemaCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl SchemaCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn key(tenant_id: &str, workspace_id: &str) -> String {
        format!("vkg:schema:{}:{}", tenant_id, workspace_id)
    }

    /// Cached context, if present; store or decoding failures count as a miss
    pub async fn get(&self, tenant_id: &str, workspace_id: &str) -> Option<OntologyContext> {
        let key = Self::key(tenant_id, workspace_id);
        let raw = match self.store.get(&key).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!("Schema cache read failed for {}: {}", key, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(context) => Some(context),
            Err(e) => {
                tracing::warn!("Discarding undecodable schema cache entry {}: {}", key, e);
                None
            }
        }
    }

    pub async fn put(&self, tenant_id: &str, workspace_id: &str, context: &OntologyContext) {
        let key = Self::key(tenant_id, workspace_id);
        let raw = match serde_json::to_string(context) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Failed to encode schema context for {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.store.set_with_expiry(&key, raw, self.ttl).await {
            tracing::warn!("Schema cache write failed for {}: {}", key, e);
        }
    }

    pub async fn purge_expired(&self) -> Result<usize, AppError> {
        let removed = self.store.purge_expired().await?;
        if removed > 0 {
            tracing::info!("Purged {} expired schema cache entries", removed);
        }
        Ok(removed)
    }

    pub async fn invalidate(&self, tenant_id: &str, workspace_id: &str) -> Result<bool, AppError> {
        let key = Self::key(tenant_id, workspace_id);
        let removed = self.store.delete(&key).await?;
        tracing::info!("Invalidated schema cache {} (present: {})", key, removed);
        Ok(removed)
    }
}

//! Advisory read cache.
//!
//! The cache is never the source of truth: every operation is infallible from
//! the caller's point of view and a backend failure degrades to a miss or a
//! no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client, RedisResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
    async fn delete(&self, key: &str);
}

/// Builds the cache named by `url`: `memory`, `none`, or a `redis://` URL.
/// An unreachable Redis leaves the service running without a cache; the
/// attempt gives up after `REDIS_CONNECT_TIMEOUT`.
pub async fn from_url(url: &str) -> Arc<dyn Cache> {
    match url {
        "memory" => Arc::new(MemoryCache::new()),
        "none" | "" => Arc::new(NoCache),
        _ => match RedisCache::connect(url).await {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                warn!(error = %e, "Cache unavailable, continuing without it");
                Arc::new(NoCache)
            }
        },
    }
}

/// Cache-aside views over a `Cache` backend, shared by every reader and
/// writer in the process.
///
/// Each invalidation bumps a generation counter before deleting keys. A
/// reader records the generation before it goes to the database and hands it
/// back with the fill; if an invalidation landed in between, the value it
/// read may predate the write, so the fill is removed again.
#[derive(Clone)]
pub struct ViewCache {
    backend: Arc<dyn Cache>,
    ttl: Duration,
    generation: Arc<AtomicU64>,
}

impl ViewCache {
    pub fn new(backend: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { backend, ttl, generation: Arc::new(AtomicU64::new(0)) }
    }

    /// Take this before reading the database for a later `fill`.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.backend.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "Discarding unreadable cache entry");
                self.backend.delete(key).await;
                None
            }
        }
    }

    pub async fn fill<T: Serialize>(&self, key: &str, value: &T, seen: u64) {
        match serde_json::to_string(value) {
            Ok(raw) => self.backend.set(key, raw, self.ttl).await,
            Err(e) => {
                warn!(key, error = %e, "Value not cacheable");
                return;
            }
        }
        if self.generation() != seen {
            debug!(key, "Fill raced an invalidation, dropping it");
            self.backend.delete(key).await;
        }
    }

    /// Call after the write has committed.
    pub async fn invalidate(&self, keys: &[String]) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        for key in keys {
            self.backend.delete(key).await;
        }
    }
}

// --- No cache ---

/// The "unavailable" cache: every read misses and every write is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

#[async_trait]
impl Cache for NoCache {
    async fn get(&self, _key: &str) -> Option<String> {
        None
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) {}

    async fn delete(&self, _key: &str) {}
}

// --- In-process cache ---

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.read().await.values().filter(|(_, expires)| *expires > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires)) if *expires > Instant::now() => return Some(value.clone()),
                Some(_) => {}
                None => {
                    debug!(key, "Cache miss");
                    return None;
                }
            }
        }
        // expired
        self.entries.write().await.remove(key);
        debug!(key, "Cache miss (expired)");
        None
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let expires = Instant::now() + ttl;
        self.entries.write().await.insert(key.to_string(), (value, expires));
    }

    async fn delete(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

// --- Redis ---

pub const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Upper bound on a single cache command. A stalled Redis turns into misses.
pub const REDIS_OP_TIMEOUT: Duration = Duration::from_millis(250);

pub struct RedisCache {
    conn_manager: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = Client::open(redis_url)?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(REDIS_CONNECT_TIMEOUT)
            .set_response_timeout(REDIS_OP_TIMEOUT)
            .set_number_of_retries(1);
        let conn_manager = tokio::time::timeout(
            REDIS_CONNECT_TIMEOUT,
            ConnectionManager::new_with_config(client, config),
        )
        .await
        .map_err(|_| anyhow::anyhow!("timed out connecting to {redis_url}"))??;
        info!("Connected to cache: {redis_url}");
        Ok(Self { conn_manager })
    }
}

async fn bounded<T>(what: &str, key: &str, op: impl Future<Output = RedisResult<T>>) -> Option<T> {
    match tokio::time::timeout(REDIS_OP_TIMEOUT, op).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(key, error = %e, "Cache {what} failed");
            None
        }
        Err(_) => {
            warn!(key, "Cache {what} timed out");
            None
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn_manager.clone();
        let value = bounded("read", key, conn.get::<_, Option<String>>(key)).await.flatten();
        if value.is_none() {
            debug!(key, "Cache miss");
        }
        value
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let mut conn = self.conn_manager.clone();
        let seconds = ttl.as_secs().max(1);
        bounded("write", key, conn.set_ex::<_, _, ()>(key, value, seconds)).await;
    }

    async fn delete(&self, key: &str) {
        let mut conn = self.conn_manager.clone();
        bounded("delete", key, conn.del::<_, ()>(key)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_cache_expires_entries() {
        let cache = MemoryCache::new();
        cache.set("a", "1".to_string(), Duration::from_millis(20)).await;
        cache.set("b", "2".to_string(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("a").await.as_deref(), Some("1"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await.as_deref(), Some("2"));
        assert_eq!(cache.len().await, 1);
    }

    fn views(backend: Arc<dyn Cache>) -> ViewCache {
        ViewCache::new(backend, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn invalidate_drops_listed_keys_only() {
        let cache = Arc::new(MemoryCache::new());
        for key in ["events", "event:1", "event:2"] {
            cache.set(key, "x".to_string(), Duration::from_secs(60)).await;
        }
        views(cache.clone()).invalidate(&["events".to_string(), "event:1".to_string()]).await;
        assert_eq!(cache.get("events").await, None);
        assert_eq!(cache.get("event:1").await, None);
        assert!(cache.get("event:2").await.is_some());
    }

    #[tokio::test]
    async fn unreadable_json_is_a_miss_and_is_evicted() {
        let cache = Arc::new(MemoryCache::new());
        cache.set("event:1", "not json".to_string(), Duration::from_secs(60)).await;
        let value: Option<Vec<i64>> = views(cache.clone()).get("event:1").await;
        assert!(value.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn no_cache_never_returns_anything() {
        let views = views(Arc::new(NoCache));
        views.fill("events", &vec![1, 2, 3], views.generation()).await;
        let value: Option<Vec<i64>> = views.get("events").await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn fill_after_an_invalidation_is_dropped() {
        let cache = Arc::new(MemoryCache::new());
        let views = views(cache.clone());

        // reader snapshots, a writer commits and invalidates, reader fills with what it read before
        let seen = views.generation();
        views.invalidate(&["event:1".to_string()]).await;
        views.fill("event:1", &vec![5], seen).await;
        assert!(cache.is_empty().await);

        let seen = views.generation();
        views.fill("event:1", &vec![4], seen).await;
        assert_eq!(views.get::<Vec<i64>>("event:1").await, Some(vec![4]));
    }

    #[tokio::test]
    async fn clones_share_one_generation() {
        let cache = Arc::new(MemoryCache::new());
        let reader = views(cache.clone());
        let writer = reader.clone();

        let seen = reader.generation();
        writer.invalidate(&["events".to_string()]).await;
        reader.fill("events", &vec![1], seen).await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn from_url_selects_backend() {
        let memory = from_url("memory").await;
        memory.set("k", "v".to_string(), Duration::from_secs(60)).await;
        assert_eq!(memory.get("k").await.as_deref(), Some("v"));

        let none = from_url("none").await;
        none.set("k", "v".to_string(), Duration::from_secs(60)).await;
        assert_eq!(none.get("k").await, None);
    }

    #[tokio::test]
    async fn unreachable_redis_falls_back_to_no_cache_quickly() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let started = Instant::now();
        let cache = tokio::time::timeout(
            Duration::from_secs(10),
            from_url(&format!("redis://{addr}")),
        )
        .await
        .expect("cache construction must not hang on a dead redis");
        assert!(started.elapsed() <= REDIS_CONNECT_TIMEOUT + Duration::from_secs(1));

        cache.set("k", "v".to_string(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, None);
        cache.delete("k").await;
    }
}

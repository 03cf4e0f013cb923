use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::circuit_breaker::CircuitBreaker;

const DEFAULT_TTL: Duration = Duration::from_secs(60);
const MAX_TTL: Duration = Duration::from_secs(300);
const WARM_MESSAGES_PER_ROOM: usize = 20;
const WARM_TOP_ROOMS: usize = 20;

#[async_trait::async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, ()>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ()>;
    async fn invalidate(&self, key: &str) -> Result<(), ()>;
}

/// No-op L2 stand-in used when no shared cache backend is configured. The breaker in
/// front of it never trips because it never fails, so `Cache` behaves identically to a
/// single-tier cache in that deployment shape.
pub struct NoopSharedCache;

#[async_trait::async_trait]
impl SharedCache for NoopSharedCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, ()> {
        Ok(None)
    }
    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), ()> {
        Ok(())
    }
    async fn invalidate(&self, _key: &str) -> Result<(), ()> {
        Ok(())
    }
}

struct L1Entry {
    value: Value,
    expires_at: Instant,
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub invalidations: u64,
    pub warmups: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Two-tier read-through cache (C1): a process-local `HashMap` tier (bounded TTL) in
/// front of an optional shared tier reached only through the circuit breaker (C2).
pub struct Cache {
    l1: Mutex<HashMap<String, L1Entry>>,
    /// Reverse dependency index: `dep -> [keys that must be invalidated when dep is]`.
    deps: Mutex<HashMap<String, Vec<String>>>,
    l2: Arc<dyn SharedCache>,
    breaker: Arc<CircuitBreaker>,
    stats: Mutex<CacheStats>,
}

impl Cache {
    pub fn new(l2: Arc<dyn SharedCache>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            l1: Mutex::new(HashMap::new()),
            deps: Mutex::new(HashMap::new()),
            l2,
            breaker,
            stats: Mutex::new(CacheStats::default()),
        }
    }

    fn clamp_ttl(ttl: Duration) -> Duration {
        ttl.min(MAX_TTL)
    }

    fn l1_get(&self, key: &str) -> Option<Value> {
        let mut l1 = self.l1.lock().unwrap_or_else(|e| e.into_inner());
        match l1.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                l1.remove(key);
                None
            }
            None => None,
        }
    }

    fn l1_set(&self, key: &str, value: Value, ttl: Duration) {
        let mut l1 = self.l1.lock().unwrap_or_else(|e| e.into_inner());
        l1.insert(key.to_string(), L1Entry { value, expires_at: Instant::now() + ttl });
    }

    /// Read-through get. Consults L1, then L2 (via the breaker), then `loader` if
    /// supplied; any value obtained from the loader is written back through `set` (so
    /// `deps` gets registered in the reverse-dependency index) — an L2 hit is written
    /// back to L1 only, since it was already `set` with its deps when it was produced.
    pub async fn get<F, Fut>(&self, key: &str, loader: Option<F>, deps: &[&str]) -> Option<Value>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Option<Value>>,
    {
        if let Some(v) = self.l1_get(key) {
            self.stats.lock().unwrap_or_else(|e| e.into_inner()).hits += 1;
            return Some(v);
        }

        let l2 = self.l2.clone();
        let l2_key = key.to_string();
        let from_l2 = self
            .breaker
            .execute_async(
                move || {
                    let l2 = l2.clone();
                    let key = l2_key.clone();
                    async move { l2.get(&key).await }
                },
                || async { None },
            )
            .await
            .flatten()
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok());

        if let Some(v) = from_l2 {
            self.l1_set(key, v.clone(), DEFAULT_TTL);
            self.stats.lock().unwrap_or_else(|e| e.into_inner()).hits += 1;
            return Some(v);
        }

        self.stats.lock().unwrap_or_else(|e| e.into_inner()).misses += 1;

        if let Some(loader) = loader {
            if let Some(v) = loader().await {
                self.set(key, v.clone(), DEFAULT_TTL, deps).await;
                return Some(v);
            }
        }
        None
    }

    /// Writes both tiers and records reverse dependencies: invalidating any key in
    /// `deps` will transitively invalidate `key` too.
    pub async fn set(&self, key: &str, value: Value, ttl: Duration, deps: &[&str]) {
        let ttl = Self::clamp_ttl(ttl);
        self.l1_set(key, value.clone(), ttl);

        {
            let mut dep_index = self.deps.lock().unwrap_or_else(|e| e.into_inner());
            for dep in deps {
                dep_index.entry(dep.to_string()).or_default().push(key.to_string());
            }
        }

        if let Ok(raw) = serde_json::to_string(&value) {
            let l2 = self.l2.clone();
            let key_owned = key.to_string();
            self.breaker
                .execute_async(
                    move || {
                        let l2 = l2.clone();
                        let key = key_owned.clone();
                        let raw = raw.clone();
                        async move { l2.set(&key, &raw, ttl).await }
                    },
                    || async {},
                )
                .await;
        }

        self.stats.lock().unwrap_or_else(|e| e.into_inner()).sets += 1;
    }

    /// Invalidates `key`, and — when `cascade` — every key that was registered as
    /// depending on it.
    pub async fn invalidate(&self, key: &str, cascade: bool) {
        self.l1.lock().unwrap_or_else(|e| e.into_inner()).remove(key);

        let l2 = self.l2.clone();
        let key_owned = key.to_string();
        self.breaker
            .execute_async(
                move || {
                    let l2 = l2.clone();
                    let key = key_owned.clone();
                    async move { l2.invalidate(&key).await }
                },
                || async {},
            )
            .await;

        self.stats.lock().unwrap_or_else(|e| e.into_inner()).invalidations += 1;

        if cascade {
            let dependents = self
                .deps
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(key)
                .unwrap_or_default();
            for dependent in dependents {
                Box::pin(self.invalidate(&dependent, true)).await;
            }
        }
    }

    /// Invalidates every L1 key matching a `*`-glob pattern (only `*` is a wildcard;
    /// everything else is literal).
    pub fn invalidate_pattern(&self, pattern: &str) {
        let mut l1 = self.l1.lock().unwrap_or_else(|e| e.into_inner());
        let before = l1.len();
        l1.retain(|key, _| !glob_match(pattern, key));
        let removed = before.saturating_sub(l1.len());
        if removed > 0 {
            self.stats.lock().unwrap_or_else(|e| e.into_inner()).invalidations += removed as u64;
        }
    }

    /// Directly seeds L1 with precomputed entries — used at startup to preload active
    /// rooms, online users, and the last `WARM_MESSAGES_PER_ROOM` messages for the top
    /// `WARM_TOP_ROOMS` active rooms. The data gathering itself belongs to the caller
    /// (it needs the store), not to the cache.
    pub fn warm(&self, entries: Vec<(String, Value)>) {
        let mut l1 = self.l1.lock().unwrap_or_else(|e| e.into_inner());
        let expires_at = Instant::now() + DEFAULT_TTL;
        let count = entries.len();
        for (key, value) in entries {
            l1.insert(key, L1Entry { value, expires_at });
        }
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).warmups += count as u64;
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn warm_top_rooms() -> usize {
        WARM_TOP_ROOMS
    }

    pub fn warm_messages_per_room() -> usize {
        WARM_MESSAGES_PER_ROOM
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !text[pos..].starts_with(part) {
                return false;
            }
            pos += part.len();
        } else if i == parts.len() - 1 {
            return text[pos..].ends_with(part);
        } else if let Some(found) = text[pos..].find(part) {
            pos += found + part.len();
        } else {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cache() -> Cache {
        Cache::new(Arc::new(NoopSharedCache), Arc::new(CircuitBreaker::new()))
    }

    #[tokio::test]
    async fn set_then_get_hits_l1() {
        let cache = test_cache();
        cache.set("room:1", serde_json::json!({"name": "lobby"}), Duration::from_secs(60), &[]).await;
        let v = cache.get::<_, std::future::Ready<Option<Value>>>("room:1", None, &[]).await;
        assert!(v.is_some());
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn miss_invokes_loader() {
        let cache = test_cache();
        let v = cache
            .get("missing", Some(|| async { Some(serde_json::json!("loaded")) }), &[])
            .await;
        assert_eq!(v, Some(serde_json::json!("loaded")));
    }

    #[tokio::test]
    async fn cascade_invalidation_follows_deps() {
        let cache = test_cache();
        cache.set("room:1:messages", serde_json::json!([]), Duration::from_secs(60), &["room:1"]).await;
        cache.invalidate("room:1", true).await;
        let v = cache.get::<_, std::future::Ready<Option<Value>>>("room:1:messages", None, &[]).await;
        assert!(v.is_none());
    }

    #[tokio::test]
    async fn read_through_loader_registers_dependency_for_cascade_invalidation() {
        let cache = test_cache();
        let v = cache
            .get("room:1:messages:20", Some(|| async { Some(serde_json::json!(["hello"])) }), &["room:1:messages"])
            .await;
        assert!(v.is_some());
        cache.invalidate("room:1:messages", true).await;
        let v = cache.get::<_, std::future::Ready<Option<Value>>>("room:1:messages:20", None, &[]).await;
        assert!(v.is_none());
    }

    #[test]
    fn pattern_invalidation() {
        let cache = test_cache();
        cache.l1_set("room:1:messages", serde_json::json!([]), Duration::from_secs(60));
        cache.l1_set("room:2:messages", serde_json::json!([]), Duration::from_secs(60));
        cache.l1_set("user:1", serde_json::json!({}), Duration::from_secs(60));
        cache.invalidate_pattern("room:*:messages");
        assert!(cache.l1_get("room:1:messages").is_none());
        assert!(cache.l1_get("user:1").is_some());
    }
}

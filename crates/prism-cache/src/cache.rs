//! Bounded LRU + TTL cache for published conversations.
//!
//! One mutex guards the map and the access order together, so eviction and
//! access-order updates observe a consistent total order per key. Expired
//! entries are removed lazily on access and by a periodic sweeper.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use prism_core::config::CacheConfig;

use crate::types::SharedConversation;

struct Entry {
    value: SharedConversation,
    /// Epoch milliseconds; `None` means no expiry.
    expires_at: Option<i64>,
}

#[derive(Default)]
struct CacheInner {
    map: HashMap<String, Entry>,
    /// Access order, least-recently-used at the front.
    order: VecDeque<String>,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_keys: usize,
    /// Human-readable estimate: key bytes (UTF-16) plus JSON size of values.
    pub memory_usage: String,
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate_percent: f64,
    pub uptime_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub status: HealthStatus,
    pub latency_ms: f64,
    pub error: Option<String>,
}

pub struct SharedConversationCache {
    inner: Mutex<CacheInner>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    started: Instant,
    sweeper_cancel: CancellationToken,
}

impl SharedConversationCache {
    /// Create the cache and start its background sweeper.
    pub fn new(config: CacheConfig) -> Arc<Self> {
        let cache = Arc::new(Self {
            inner: Mutex::new(CacheInner::default()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            started: Instant::now(),
            sweeper_cancel: CancellationToken::new(),
        });

        let sweeper = Arc::clone(&cache);
        let cancel = cache.sweeper_cancel.clone();
        let interval_secs = cache.config.sweep_interval_secs.max(1);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            ticker.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    _ = ticker.tick() => sweeper.sweep(),
                    _ = cancel.cancelled() => {
                        debug!("cache sweeper cancelled");
                        return;
                    }
                }
            }
        });

        cache
    }

    /// Fetch an entry, updating the access order. Expired entries are
    /// removed and reported as misses.
    pub fn get(&self, share_id: &str) -> Option<SharedConversation> {
        let mut inner = self.inner.lock().unwrap();

        let expired = match inner.map.get(share_id) {
            Some(entry) => is_expired(entry),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            inner.map.remove(share_id);
            inner.order.retain(|k| k != share_id);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        touch(&mut inner.order, share_id);
        self.hits.fetch_add(1, Ordering::Relaxed);
        inner.map.get(share_id).map(|e| e.value.clone())
    }

    /// Insert or replace an entry. A new key at capacity evicts the
    /// least-recently-used entry first.
    pub fn set(&self, share_id: &str, value: SharedConversation, ttl_secs: Option<u64>) {
        let ttl = ttl_secs.or(self.config.default_ttl_secs);
        let expires_at = ttl.map(|s| now_ms() + (s as i64) * 1000);

        let mut inner = self.inner.lock().unwrap();

        if !inner.map.contains_key(share_id) && inner.map.len() >= self.config.max_size {
            if let Some(lru) = inner.order.pop_front() {
                inner.map.remove(&lru);
                debug!(evicted = %lru, "cache at capacity, evicted LRU entry");
            }
        }

        inner.map.insert(
            share_id.to_string(),
            Entry { value, expires_at },
        );
        touch(&mut inner.order, share_id);
    }

    /// Key present and not expired? Does not update the access order and
    /// does not count toward hits/misses.
    pub fn has(&self, share_id: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.map.get(share_id).map(|e| !is_expired(e)).unwrap_or(false)
    }

    pub fn delete(&self, share_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner.map.remove(share_id).is_some();
        if removed {
            inner.order.retain(|k| k != share_id);
        }
        removed
    }

    pub fn batch_delete(&self, share_ids: &[&str]) -> usize {
        share_ids.iter().filter(|id| self.delete(id)).count()
    }

    pub fn clear_all(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let count = inner.map.len();
        inner.map.clear();
        inner.order.clear();
        count
    }

    /// Replace the TTL of an existing, unexpired entry.
    pub fn set_ttl(&self, share_id: &str, ttl_secs: Option<u64>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.map.get_mut(share_id) {
            Some(entry) if !is_expired(entry) => {
                entry.expires_at = ttl_secs.map(|s| now_ms() + (s as i64) * 1000);
                true
            }
            _ => false,
        }
    }

    /// Remaining TTL in seconds; `None` when absent, expired or unbounded.
    pub fn get_ttl(&self, share_id: &str) -> Option<u64> {
        let inner = self.inner.lock().unwrap();
        let entry = inner.map.get(share_id)?;
        if is_expired(entry) {
            return None;
        }
        entry
            .expires_at
            .map(|at| ((at - now_ms()).max(0) / 1000) as u64)
    }

    /// Bump an entry's view counter in place. The counter only ever grows.
    pub fn increment_views(&self, share_id: &str) -> Option<u64> {
        let mut inner = self.inner.lock().unwrap();
        match inner.map.get_mut(share_id) {
            Some(entry) if !is_expired(entry) => {
                entry.value.view_count += 1;
                Some(entry.value.view_count)
            }
            _ => None,
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups > 0 {
            100.0 * hits as f64 / lookups as f64
        } else {
            0.0
        };

        let bytes: usize = inner
            .map
            .iter()
            .map(|(k, e)| {
                let value_bytes = serde_json::to_string(&e.value)
                    .map(|s| s.len())
                    .unwrap_or(0);
                k.encode_utf16().count() * 2 + value_bytes
            })
            .sum();

        CacheStats {
            total_keys: inner.map.len(),
            memory_usage: human_bytes(bytes),
            hit_count: hits,
            miss_count: misses,
            hit_rate_percent: hit_rate,
            uptime_ms: self.started.elapsed().as_millis() as u64,
        }
    }

    /// Probe the cache with a write/read/delete round trip.
    ///
    /// The probe bypasses capacity eviction so a health check can never push
    /// out a real entry.
    pub fn health_check(&self) -> CacheHealth {
        const PROBE_KEY: &str = "__health_probe__";
        let started = Instant::now();

        let probe = SharedConversation {
            title: "probe".to_string(),
            messages: Vec::new(),
            created_at: now_ms(),
            view_count: 0,
            expires_at: None,
            owner_id: None,
        };

        let ok = {
            let mut inner = self.inner.lock().unwrap();
            inner.map.insert(
                PROBE_KEY.to_string(),
                Entry {
                    value: probe,
                    expires_at: None,
                },
            );
            let read_ok = inner.map.contains_key(PROBE_KEY);
            inner.map.remove(PROBE_KEY);
            read_ok
        };

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        if ok {
            CacheHealth {
                status: HealthStatus::Healthy,
                latency_ms,
                error: None,
            }
        } else {
            warn!("cache health probe failed");
            CacheHealth {
                status: HealthStatus::Unhealthy,
                latency_ms,
                error: Some("probe entry was not readable after write".to_string()),
            }
        }
    }

    /// Remove every expired entry. Called by the background sweeper.
    pub fn sweep(&self) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let before = inner.map.len();
        inner.map.retain(|_, e| !is_expired(e));
        let removed = before - inner.map.len();
        if removed > 0 {
            let map = &inner.map;
            inner.order.retain(|k| map.contains_key(k));
            debug!(removed, "cache sweep removed expired entries");
        }
    }

    /// Cancel the sweeper and drop all entries. In-flight calls holding the
    /// lock complete first.
    pub fn shutdown(&self) {
        self.sweeper_cancel.cancel();
        let count = self.clear_all();
        info!(dropped = count, "shared-conversation cache shut down");
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn is_expired(entry: &Entry) -> bool {
    entry.expires_at.map(|at| now_ms() > at).unwrap_or(false)
}

/// Move `key` to the most-recently-used end.
fn touch(order: &mut VecDeque<String>, key: &str) {
    order.retain(|k| k != key);
    order.push_back(key.to_string());
}

fn human_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SharedMessage;
    use prism_core::Role;

    fn conversation(title: &str) -> SharedConversation {
        SharedConversation {
            title: title.to_string(),
            messages: vec![SharedMessage {
                role: Role::User,
                content: "hello".to_string(),
                timestamp: 1,
                persona_id: None,
            }],
            created_at: now_ms(),
            view_count: 0,
            expires_at: None,
            owner_id: None,
        }
    }

    fn test_config(max_size: usize) -> CacheConfig {
        CacheConfig {
            max_size,
            default_ttl_secs: None,
            sweep_interval_secs: 300,
        }
    }

    #[tokio::test]
    async fn lru_eviction_follows_access_order() {
        let cache = SharedConversationCache::new(test_config(3));
        cache.set("a", conversation("a"), None);
        cache.set("b", conversation("b"), None);
        cache.set("c", conversation("c"), None);

        // Touch `a` so `b` becomes the least recently used.
        assert!(cache.get("a").is_some());
        cache.set("d", conversation("d"), None);

        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.has("c"));
        assert!(cache.has("d"));
        cache.shutdown();
    }

    #[tokio::test]
    async fn size_never_exceeds_max() {
        let cache = SharedConversationCache::new(test_config(5));
        for i in 0..50 {
            cache.set(&format!("key-{i}"), conversation("x"), None);
            assert!(cache.len() <= 5);
        }
        cache.shutdown();
    }

    #[tokio::test]
    async fn overwriting_existing_key_does_not_evict() {
        let cache = SharedConversationCache::new(test_config(2));
        cache.set("a", conversation("a1"), None);
        cache.set("b", conversation("b"), None);
        cache.set("a", conversation("a2"), None);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").unwrap().title, "a2");
        cache.shutdown();
    }

    #[tokio::test]
    async fn expired_entries_fail_lookups() {
        let cache = SharedConversationCache::new(test_config(10));
        cache.set("short", conversation("x"), Some(0));
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert!(cache.get("short").is_none());
        assert!(!cache.has("short"));
        assert_eq!(cache.get_ttl("short"), None);
        cache.shutdown();
    }

    #[tokio::test]
    async fn ttl_can_be_replaced() {
        let cache = SharedConversationCache::new(test_config(10));
        cache.set("k", conversation("x"), Some(1));
        assert!(cache.get_ttl("k").is_some());

        assert!(cache.set_ttl("k", Some(3600)));
        let remaining = cache.get_ttl("k").unwrap();
        assert!(remaining > 3000);

        assert!(cache.set_ttl("k", None));
        assert_eq!(cache.get_ttl("k"), None);
        assert!(cache.has("k"));
        cache.shutdown();
    }

    #[tokio::test]
    async fn hit_rate_identity_holds() {
        let cache = SharedConversationCache::new(test_config(10));
        cache.set("present", conversation("x"), None);

        for _ in 0..3 {
            cache.get("present");
        }
        cache.get("absent");

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 3);
        assert_eq!(stats.miss_count, 1);
        let expected =
            100.0 * stats.hit_count as f64 / (stats.hit_count + stats.miss_count) as f64;
        assert!((stats.hit_rate_percent - expected).abs() < 1e-9);
        assert_eq!(stats.total_keys, 1);
        cache.shutdown();
    }

    #[tokio::test]
    async fn view_counter_only_grows() {
        let cache = SharedConversationCache::new(test_config(10));
        cache.set("s", conversation("x"), None);
        assert_eq!(cache.increment_views("s"), Some(1));
        assert_eq!(cache.increment_views("s"), Some(2));
        assert_eq!(cache.get("s").unwrap().view_count, 2);
        assert_eq!(cache.increment_views("missing"), None);
        cache.shutdown();
    }

    #[tokio::test]
    async fn batch_delete_and_clear() {
        let cache = SharedConversationCache::new(test_config(10));
        cache.set("a", conversation("a"), None);
        cache.set("b", conversation("b"), None);
        cache.set("c", conversation("c"), None);

        assert_eq!(cache.batch_delete(&["a", "b", "missing"]), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.clear_all(), 1);
        assert!(cache.is_empty());
        cache.shutdown();
    }

    #[tokio::test]
    async fn health_probe_reports_latency_and_leaves_entries_alone() {
        let cache = SharedConversationCache::new(test_config(1));
        cache.set("only", conversation("x"), None);

        let health = cache.health_check();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.error.is_none());
        // The probe must not evict the single real entry.
        assert!(cache.has("only"));
        cache.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_expired_entries() {
        let cache = SharedConversationCache::new(CacheConfig {
            max_size: 10,
            default_ttl_secs: None,
            sweep_interval_secs: 1,
        });
        cache.set("stale", conversation("x"), Some(0));
        std::thread::sleep(std::time::Duration::from_millis(5));

        // Let the sweeper tick (virtual time).
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        assert_eq!(cache.stats().total_keys, 0);
        cache.shutdown();
    }

    #[tokio::test]
    async fn shutdown_clears_the_map() {
        let cache = SharedConversationCache::new(test_config(10));
        cache.set("a", conversation("a"), None);
        cache.shutdown();
        assert!(cache.is_empty());
    }
}

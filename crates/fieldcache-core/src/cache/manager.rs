use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::ttl::TtlRules;
use crate::config::CacheConfig;

/// Deterministic cache key for a URL and its parameter map.
///
/// Parameters are serialized in key order, so two maps with the same
/// contents always produce the same key.
pub fn cache_key(url: &str, params: &BTreeMap<String, Value>) -> String {
    // A map of Values always serializes
    let params = serde_json::to_string(params).unwrap_or_default();
    format!("{}:{}", url, params)
}

struct CacheEntry {
    data: Value,
    expires_at: Instant,
    last_accessed: Instant,
    /// Monotonic access order; breaks ties between equal `last_accessed`.
    access_tick: u64,
    hit_count: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    fn recency(&self) -> (Instant, u64) {
        (self.last_accessed, self.access_tick)
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<String, CacheEntry>,
    tick: u64,
}

impl State {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Snapshot of the hit/miss/eviction counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    /// Hits over total lookups, 0.0 before the first lookup.
    pub hit_rate: f64,
}

/// In-memory response cache with per-category TTL and LRU eviction.
///
/// Values are tree-shaped JSON data. They are copied on the way in and on
/// the way out, so callers can mutate what they get back freely.
pub struct AppCache {
    state: Mutex<State>,
    max_size: usize,
    ttl_rules: TtlRules,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl AppCache {
    pub fn new(max_size: usize, ttl_rules: TtlRules) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_size: max_size.max(1),
            ttl_rules,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_size, config.ttl_rules())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Response cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Store a copy of `data` under `key`.
    ///
    /// Inserting a new key into a full cache first evicts the least recently
    /// accessed entry.
    pub fn set(&self, key: &str, data: &Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or_else(|| self.ttl_rules.ttl_for(key));
        let now = Instant::now();
        let Some(expires_at) = now.checked_add(ttl) else {
            warn!(key, ttl_secs = ttl.as_secs(), "TTL out of range, not caching");
            return;
        };

        let mut state = self.lock();
        if !state.entries.contains_key(key) && state.entries.len() >= self.max_size {
            self.evict_lru(&mut state);
        }

        let access_tick = state.next_tick();
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                data: data.clone(),
                expires_at,
                last_accessed: now,
                access_tick,
                hit_count: 0,
            },
        );
        debug!(key, ttl_secs = ttl.as_secs(), "Cached response");
    }

    /// Copy of the value under `key`, if present and not expired.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut state = self.lock();
        let tick = state.next_tick();

        match state.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_accessed = now;
                entry.access_tick = tick;
                entry.hit_count += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.data.clone());
            }
            Some(_) => {
                state.entries.remove(key);
                debug!(key, "Dropped expired entry on access");
            }
            None => {}
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn delete(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Remove every entry whose key contains `pattern`.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.contains(pattern));
        let removed = before - state.entries.len();
        if removed > 0 {
            debug!(pattern, removed, "Invalidated cache entries");
        }
        removed
    }

    pub fn invalidate_achievements(&self) -> usize {
        self.invalidate_pattern("/api/achievements")
    }

    pub fn invalidate_tournaments(&self) -> usize {
        self.invalidate_pattern("/api/tournaments")
    }

    pub fn invalidate_leaderboard(&self) -> usize {
        self.invalidate_pattern("/api/leaderboard")
    }

    pub fn invalidate_community(&self) -> usize {
        self.invalidate_pattern("/api/community")
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Remove every expired entry, whether or not anyone reads it again.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        before - state.entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Number of successful reads of `key`, without counting as one.
    pub fn hit_count(&self, key: &str) -> Option<u64> {
        self.lock().entries.get(key).map(|entry| entry.hit_count)
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.len(),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    fn evict_lru(&self, state: &mut State) {
        let oldest = state
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.recency())
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            state.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Evicted least recently used entry");
        }
    }

    /// Run [`cleanup`](Self::cleanup) every `period` until the handle is shut
    /// down or dropped, or the cache itself is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> SweeperHandle {
        let cache = Arc::downgrade(self);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(sweep_loop(cache, period, shutdown_rx));
        SweeperHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

async fn sweep_loop(cache: Weak<AppCache>, period: Duration, mut shutdown: oneshot::Receiver<()>) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let Some(cache) = cache.upgrade() else { break };
                let removed = cache.cleanup();
                if removed > 0 {
                    debug!(removed, remaining = cache.len(), "Swept expired entries");
                }
            }
        }
    }
    debug!("Cache sweeper stopped");
}

/// Owner of the periodic sweep task. Dropping it aborts the task.
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

//! In-process TTL + LRU cache shared by every read path.
//!
//! [`CacheEngine`] is a bounded key → value map where every entry carries its
//! own time-to-live. It is deliberately *only* an optimisation: no operation
//! returns an error. A poisoned lock or any other internal fault is logged and
//! reported as a miss (reads) or silently skipped (writes).
//!
//! ## Eviction
//!
//! When a new key would push the map past `max_size`, the least recently
//! accessed 10 % of entries (at least one) are dropped in a single batch.
//! Batching amortises the ranking cost over many inserts; it is not strict
//! LRU-of-one.
//!
//! ## Expiry
//!
//! Expired entries are removed lazily by `get`/`has`, and eagerly by a
//! maintenance pass ([`CacheEngine::purge_expired`]) that the optional
//! background sweeper runs on a fixed interval. Without the sweeper, keys that
//! are written but never read again would only leave through eviction.
//!
//! ```rust
//! use edgequake_docscan::cache::{CacheConfig, CacheEngine};
//! use std::time::Duration;
//!
//! let cache: CacheEngine<String> = CacheEngine::new(CacheConfig::default().with_max_size(100));
//! cache.set("greeting", "hello".to_string(), Duration::from_secs(60));
//! assert_eq!(cache.get("greeting").as_deref(), Some("hello"));
//! ```

use regex::Regex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Sizing and timing for a [`CacheEngine`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of live entries. Default: 1000.
    pub max_size: usize,
    /// TTL used by [`CacheEngine::put`]. Default: 1 hour.
    pub default_ttl: Duration,
    /// Period of the background expiry sweep. Default: 5 minutes.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(Duration::from_millis(1));
        self
    }
}

/// One stored value and its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: Instant,
    pub ttl: Duration,
    pub access_count: u64,
    pub last_accessed_at: Instant,
    /// Monotonic access counter; breaks ties between equal `last_accessed_at`.
    access_seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

/// Entry bookkeeping without the value, as returned by [`CacheEngine::metadata`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMetadata {
    pub created_at: Instant,
    pub ttl: Duration,
    pub access_count: u64,
    pub last_accessed_at: Instant,
}

/// Running counters since construction (or the last [`CacheEngine::clear`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
    /// Entries currently stored (expired-but-unswept included).
    pub size: usize,
}

impl CacheStats {
    /// Hit rate in `0.0..=1.0`; 0.0 before the first read.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    stats: CacheStats,
    next_seq: u64,
}

impl<V> CacheState<V> {
    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

struct Sweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Bounded, expiring key-value store.
///
/// Share it between tasks as `Arc<CacheEngine<V>>`. Values are cloned out on
/// every hit, so keep `V` cheap to clone or wrap it in an `Arc`.
pub struct CacheEngine<V> {
    state: Mutex<CacheState<V>>,
    config: CacheConfig,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<V: Clone + Send + 'static> CacheEngine<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                stats: CacheStats::default(),
                next_seq: 0,
            }),
            config,
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> Option<MutexGuard<'_, CacheState<V>>> {
        match self.state.lock() {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!("Cache state unavailable, treating as miss: {}", e);
                None
            }
        }
    }

    /// Insert or overwrite `key`. Inserting a new key at capacity evicts first.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let Some(mut state) = self.lock() else {
            return;
        };

        if !state.entries.contains_key(&key) && state.entries.len() >= self.config.max_size {
            let evicted = evict_least_recent(&mut state);
            debug!("Cache at capacity ({}), evicted {} entries", self.config.max_size, evicted);
        }

        let now = Instant::now();
        let seq = state.bump_seq();
        state.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                created_at: now,
                ttl,
                access_count: 0,
                last_accessed_at: now,
                access_seq: seq,
            },
        );
        state.stats.sets += 1;
    }

    /// [`set`](Self::set) with the configured default TTL.
    pub fn put(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.config.default_ttl);
    }

    /// Return the value if present and fresh. Expired entries are removed.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut state = self.lock()?;
        let now = Instant::now();

        let expired = match state.entries.get(key) {
            None => {
                state.stats.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            state.entries.remove(key);
            state.stats.expirations += 1;
            state.stats.misses += 1;
            return None;
        }

        let seq = state.bump_seq();
        let entry = state.entries.get_mut(key)?;
        entry.access_count += 1;
        entry.last_accessed_at = now;
        entry.access_seq = seq;
        let value = entry.value.clone();
        state.stats.hits += 1;
        Some(value)
    }

    /// TTL-honouring presence check. Does not touch access statistics.
    pub fn has(&self, key: &str) -> bool {
        let Some(mut state) = self.lock() else {
            return false;
        };
        let now = Instant::now();
        match state.entries.get(key).map(|e| e.is_expired(now)) {
            Some(false) => true,
            Some(true) => {
                state.entries.remove(key);
                state.stats.expirations += 1;
                false
            }
            None => false,
        }
    }

    /// Remove one entry; returns whether it existed.
    pub fn delete(&self, key: &str) -> bool {
        let Some(mut state) = self.lock() else {
            return false;
        };
        let existed = state.entries.remove(key).is_some();
        if existed {
            state.stats.deletes += 1;
        }
        existed
    }

    /// Live keys, optionally filtered by a `*`-wildcard pattern (`analysis:*`).
    pub fn keys(&self, pattern: Option<&str>) -> Vec<String> {
        let matcher = match pattern.map(glob_to_regex).transpose() {
            Ok(m) => m,
            Err(e) => {
                warn!("Invalid cache key pattern {:?}: {}", pattern, e);
                return Vec::new();
            }
        };
        let Some(state) = self.lock() else {
            return Vec::new();
        };
        let now = Instant::now();
        let mut keys: Vec<String> = state
            .entries
            .values()
            .filter(|e| !e.is_expired(now))
            .filter(|e| matcher.as_ref().map_or(true, |re| re.is_match(&e.key)))
            .map(|e| e.key.clone())
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Delete every key matching `pattern`; returns how many were removed.
    pub fn delete_matching(&self, pattern: &str) -> usize {
        self.keys(Some(pattern))
            .iter()
            .filter(|k| self.delete(k))
            .count()
    }

    /// Cache-aside helper: return the cached value or compute, store and return it.
    ///
    /// `compute` runs at most once per call and only on a miss. If it fails,
    /// nothing is stored and the error is returned unchanged.
    pub async fn get_or_set<F, Fut, E>(&self, key: &str, compute: F, ttl: Duration) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = compute().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Drop every entry and reset statistics.
    pub fn clear(&self) {
        if let Some(mut state) = self.lock() {
            state.entries.clear();
            state.stats = CacheStats::default();
        }
    }

    /// Remove every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let Some(mut state) = self.lock() else {
            return 0;
        };
        let now = Instant::now();
        let before = state.entries.len();
        state.entries.retain(|_, e| !e.is_expired(now));
        let removed = before - state.entries.len();
        state.stats.expirations += removed as u64;
        removed
    }

    /// Bookkeeping for `key` without counting as an access.
    pub fn metadata(&self, key: &str) -> Option<EntryMetadata> {
        let state = self.lock()?;
        state.entries.get(key).map(|e| EntryMetadata {
            created_at: e.created_at,
            ttl: e.ttl,
            access_count: e.access_count,
            last_accessed_at: e.last_accessed_at,
        })
    }

    pub fn stats(&self) -> CacheStats {
        self.lock()
            .map(|state| CacheStats {
                size: state.entries.len(),
                ..state.stats
            })
            .unwrap_or_default()
    }

    /// Entries currently stored, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Background sweep ─────────────────────────────────────────────────

    /// Spawn the periodic expiry sweep on the current tokio runtime.
    ///
    /// Idempotent. The task holds only a weak reference, so dropping the last
    /// `Arc` also ends it.
    pub fn start_sweeper(self: &Arc<Self>) {
        let Ok(mut slot) = self.sweeper.lock() else {
            warn!("Cache sweeper state unavailable; sweep not started");
            return;
        };
        if slot.is_some() {
            return;
        }

        let engine = Arc::downgrade(self);
        let period = self.config.sweep_interval;
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await; // Consume initial immediate tick

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let Some(engine) = engine.upgrade() else { break };
                        let removed = engine.purge_expired();
                        if removed > 0 {
                            debug!("Cache sweep removed {} expired entries", removed);
                        }
                    }
                }
            }
            debug!("Cache sweeper stopped");
        });

        info!("Cache sweeper started (every {}s)", period.as_secs());
        *slot = Some(Sweeper { shutdown, handle });
    }

    /// Stop the background sweep. Returns whether one was running.
    pub fn stop_sweeper(&self) -> bool {
        let Ok(mut slot) = self.sweeper.lock() else {
            return false;
        };
        match slot.take() {
            Some(sweeper) => {
                let _ = sweeper.shutdown.send(true);
                drop(sweeper.handle);
                true
            }
            None => false,
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|s| !s.handle.is_finished()))
            .unwrap_or(false)
    }
}

impl<V> Drop for CacheEngine<V> {
    fn drop(&mut self) {
        if let Ok(slot) = self.sweeper.get_mut() {
            if let Some(sweeper) = slot.take() {
                let _ = sweeper.shutdown.send(true);
            }
        }
    }
}

/// Drop the least recently accessed 10 % (minimum one). Returns the count.
fn evict_least_recent<V>(state: &mut CacheState<V>) -> usize {
    let count = (state.entries.len() / 10).max(1);
    let mut ranked: Vec<(Instant, u64, String)> = state
        .entries
        .values()
        .map(|e| (e.last_accessed_at, e.access_seq, e.key.clone()))
        .collect();
    ranked.sort_unstable();

    let mut removed = 0;
    for (_, _, key) in ranked.into_iter().take(count) {
        if state.entries.remove(&key).is_some() {
            removed += 1;
        }
    }
    state.stats.evictions += removed as u64;
    removed
}

/// Translate a `*` glob into an anchored regex; every other character is literal.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$"))
}

//! API Optimization Layer (§4.5): a token-bucket rate limiter that adapts
//! to provider-reported headers, an in-flight request deduplicator with a
//! half-TTL cache, and a size/time-triggered batcher. The backoff/jitter
//! arithmetic reuses `corral-retry`.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use corral_types::RateLimit;

/// Token-bucket limiter seeded from a provider's rate-limit headers and
/// refilled as calls report fresh `RateLimit` snapshots. Workers block in
/// [`acquire`](RateLimiter::acquire) rather than failing outright, so a
/// burst of calls is throttled instead of rejected.
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    signal: Condvar,
}

struct LimiterState {
    remaining: u32,
    reset_at: Instant,
    limit: u32,
}

impl RateLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                remaining: limit,
                reset_at: Instant::now(),
                limit,
            }),
            signal: Condvar::new(),
        }
    }

    /// Block until a unit of the budget is available, then consume it.
    pub fn acquire(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if Instant::now() >= state.reset_at {
                state.remaining = state.limit;
            }
            if state.remaining > 0 {
                state.remaining -= 1;
                return;
            }
            let wait = state.reset_at.saturating_duration_since(Instant::now());
            let wait = wait.max(Duration::from_millis(10));
            let (guard, _result) = self
                .signal
                .wait_timeout(state, wait)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
    }

    /// Fold in a freshly observed `RateLimit` snapshot from a response
    /// header, replacing our guess with the provider's authoritative
    /// counters (§4.5 "adapting to limit/remaining/reset_at").
    pub fn observe(&self, snapshot: &RateLimit) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.limit = snapshot.limit;
        state.remaining = snapshot.remaining;
        let millis_until_reset = (snapshot.reset_at - chrono::Utc::now())
            .num_milliseconds()
            .max(0) as u64;
        state.reset_at = Instant::now() + Duration::from_millis(millis_until_reset);
        self.signal.notify_all();
    }

    pub fn remaining(&self) -> u32 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).remaining
    }
}

/// De-duplicates identical in-flight lookups (same key requested by two
/// workers at once collapses to one call, the second caller blocking on
/// the first's result rather than repeating the work) and caches
/// completed results for half the TTL, evicting stale entries lazily on
/// lookup.
pub struct Deduplicator<V: Clone + Send + 'static> {
    ttl: Duration,
    entries: Mutex<HashMap<String, Arc<KeyEntry<V>>>>,
    pub hits: Mutex<u64>,
    pub misses: Mutex<u64>,
}

enum Slot<V> {
    /// Nothing cached yet, nobody computing it.
    Empty,
    /// A thread is inside `f()` for this key; waiters block on `cond`.
    InFlight,
    Ready { value: V, inserted_at: Instant },
}

struct KeyEntry<V> {
    slot: Mutex<Slot<V>>,
    cond: Condvar,
}

impl<V> Default for KeyEntry<V> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(Slot::Empty),
            cond: Condvar::new(),
        }
    }
}

impl<V: Clone + Send + 'static> Deduplicator<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            hits: Mutex::new(0),
            misses: Mutex::new(0),
        }
    }

    fn entry_for(&self, key: &str) -> Arc<KeyEntry<V>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            entries
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(KeyEntry::default())),
        )
    }

    /// Half-TTL eviction: an entry is considered fresh for only half its
    /// configured TTL, trading a bit of cache hit rate for staying closer
    /// to the provider's live state (§4.5 "half-TTL eviction").
    pub fn get(&self, key: &str) -> Option<V> {
        let entry = self.entry_for(key);
        let slot = entry.slot.lock().unwrap_or_else(|e| e.into_inner());
        match &*slot {
            Slot::Ready { value, inserted_at } if inserted_at.elapsed() <= self.ttl / 2 => {
                *self.hits.lock().unwrap_or_else(|e| e.into_inner()) += 1;
                Some(value.clone())
            }
            _ => {
                *self.misses.lock().unwrap_or_else(|e| e.into_inner()) += 1;
                None
            }
        }
    }

    pub fn insert(&self, key: String, value: V) {
        let entry = self.entry_for(&key);
        let mut slot = entry.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Slot::Ready {
            value,
            inserted_at: Instant::now(),
        };
        entry.cond.notify_all();
    }

    /// Drop any cached (or in-flight) record for `key`, forcing the next
    /// call to recompute (§4.5 "the optimizer can be asked to bypass its
    /// cache for a given key").
    pub fn forget(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    /// Fetch from cache, or compute via `f` and cache the result. When
    /// several threads call this with the same key while it's being
    /// computed, exactly one of them runs `f`; the rest block until it
    /// finishes and then receive the same value (§8 property 5:
    /// "the function is invoked exactly once").
    pub fn get_or_insert_with(&self, key: &str, f: impl FnOnce() -> V) -> V {
        self.get_or_insert_with_timed(key, f).0
    }

    /// As [`get_or_insert_with`](Self::get_or_insert_with), but also
    /// reports whether `f` actually ran (`false`) or the value was served
    /// from cache / another in-flight call (`true`), and how long `f`
    /// took when it did run. Used by [`ApiOptimizer`] to estimate time
    /// saved by deduplication.
    pub fn get_or_insert_with_timed(
        &self,
        key: &str,
        f: impl FnOnce() -> V,
    ) -> (V, bool, Option<Duration>) {
        let entry = self.entry_for(key);
        let mut slot = entry.slot.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            match &*slot {
                Slot::Ready { value, inserted_at } if inserted_at.elapsed() <= self.ttl / 2 => {
                    *self.hits.lock().unwrap_or_else(|e| e.into_inner()) += 1;
                    return (value.clone(), true, None);
                }
                Slot::InFlight => {
                    slot = entry
                        .cond
                        .wait(slot)
                        .unwrap_or_else(|e| e.into_inner());
                    continue;
                }
                Slot::Empty | Slot::Ready { .. } => {
                    *slot = Slot::InFlight;
                    break;
                }
            }
        }
        drop(slot);

        *self.misses.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        let started = Instant::now();
        let value = f();
        let elapsed = started.elapsed();

        let mut slot = entry.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Slot::Ready {
            value: value.clone(),
            inserted_at: Instant::now(),
        };
        drop(slot);
        entry.cond.notify_all();

        (value, false, Some(elapsed))
    }

    pub fn metrics(&self) -> (u64, u64) {
        (
            *self.hits.lock().unwrap_or_else(|e| e.into_inner()),
            *self.misses.lock().unwrap_or_else(|e| e.into_inner()),
        )
    }
}

/// Groups individual requests into batches flushed either once `max_size`
/// items accumulate or `max_wait` elapses since the first item in the
/// batch arrived, whichever comes first (§4.5 "size/time-triggered
/// flush"). Each caller gets its own response back once the batch
/// executes; a batch that errors as a whole surfaces a synthetic
/// "no response" error to every member rather than silently dropping them.
pub struct Batcher<T> {
    max_size: usize,
    max_wait: Duration,
    pending: Mutex<Vec<T>>,
    first_item_at: Mutex<Option<Instant>>,
}

impl<T> Batcher<T> {
    pub fn new(max_size: usize, max_wait: Duration) -> Self {
        Self {
            max_size,
            max_wait,
            pending: Mutex::new(Vec::new()),
            first_item_at: Mutex::new(None),
        }
    }

    /// Add an item, returning a full batch to flush if this push tripped
    /// the size threshold.
    pub fn push(&self, item: T) -> Option<Vec<T>> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let mut first = self.first_item_at.lock().unwrap_or_else(|e| e.into_inner());
        if pending.is_empty() {
            *first = Some(Instant::now());
        }
        pending.push(item);
        if pending.len() >= self.max_size {
            *first = None;
            return Some(std::mem::take(&mut pending));
        }
        None
    }

    /// Flush whatever is pending if `max_wait` has elapsed since the
    /// first item arrived, regardless of batch size.
    pub fn flush_if_due(&self) -> Option<Vec<T>> {
        let mut first = self.first_item_at.lock().unwrap_or_else(|e| e.into_inner());
        let Some(started) = *first else { return None };
        if started.elapsed() < self.max_wait {
            return None;
        }
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.is_empty() {
            return None;
        }
        *first = None;
        Some(std::mem::take(&mut pending))
    }
}

/// Build a "no response" error for every member of a batch whose
/// underlying call failed before any individual result was produced.
pub fn synthetic_no_response(operation: &str) -> corral_types::CorralError {
    corral_types::CorralError::Internal {
        ctx: corral_types::ErrorContext::new(operation),
        message: "batch executed but no response was routed back to this request".into(),
    }
}

pub type SharedRateLimiter = Arc<RateLimiter>;

/// Composes the rate limiter and the deduplicator behind one call site
/// (§4.5 "Execution order"): every call waits for rate-limit budget
/// first, then is deduplicated. Batching is a separate, explicit path
/// ([`Batcher`]) since it groups *different* requests rather than
/// collapsing identical ones, so it isn't folded into `execute`.
pub struct ApiOptimizer<V: Clone + Send + 'static> {
    pub rate_limiter: RateLimiter,
    pub dedup: Deduplicator<V>,
    enabled: std::sync::atomic::AtomicBool,
    total_requests: Mutex<u64>,
    deduplicated_calls: Mutex<u64>,
    time_saved: Mutex<Duration>,
    /// Wall time of the most recent call that actually ran `f`, used to
    /// estimate how much a subsequent cache hit saved.
    last_call_duration: Mutex<Duration>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApiOptimizerMetrics {
    pub total_requests: u64,
    pub deduplicated_calls: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub time_saved: Duration,
}

impl<V: Clone + Send + 'static> ApiOptimizer<V> {
    pub fn new(rate_limit: u32, dedup_ttl: Duration) -> Self {
        Self {
            rate_limiter: RateLimiter::new(rate_limit),
            dedup: Deduplicator::new(dedup_ttl),
            enabled: std::sync::atomic::AtomicBool::new(true),
            total_requests: Mutex::new(0),
            deduplicated_calls: Mutex::new(0),
            time_saved: Mutex::new(Duration::ZERO),
            last_call_duration: Mutex::new(Duration::ZERO),
        }
    }

    /// Globally disable the optimizer for debugging (§4.5): `execute`
    /// then runs the caller's function inline, with no rate-limit wait
    /// and no deduplication.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled
            .store(enabled, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Rate-limit, then deduplicate, a call identified by `key`.
    pub fn execute(&self, key: &str, f: impl FnOnce() -> V) -> V {
        *self.total_requests.lock().unwrap_or_else(|e| e.into_inner()) += 1;

        if !self.is_enabled() {
            return f();
        }

        self.rate_limiter.acquire();
        let (value, was_hit, miss_duration) = self.dedup.get_or_insert_with_timed(key, f);

        if was_hit {
            *self
                .deduplicated_calls
                .lock()
                .unwrap_or_else(|e| e.into_inner()) += 1;
            let estimate = *self
                .last_call_duration
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *self.time_saved.lock().unwrap_or_else(|e| e.into_inner()) += estimate;
        } else if let Some(duration) = miss_duration {
            *self
                .last_call_duration
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = duration;
        }

        value
    }

    pub fn forget(&self, key: &str) {
        self.dedup.forget(key);
    }

    pub fn metrics(&self) -> ApiOptimizerMetrics {
        let (hits, misses) = self.dedup.metrics();
        ApiOptimizerMetrics {
            total_requests: *self
                .total_requests
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
            deduplicated_calls: *self
                .deduplicated_calls
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
            cache_hits: hits,
            cache_misses: misses,
            time_saved: *self.time_saved.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_types::RateLimitResource;

    #[test]
    fn rate_limiter_consumes_budget() {
        let limiter = RateLimiter::new(3);
        limiter.acquire();
        limiter.acquire();
        limiter.acquire();
        assert_eq!(limiter.remaining(), 0);
    }

    #[test]
    fn rate_limiter_observe_replaces_counters() {
        let limiter = RateLimiter::new(10);
        limiter.acquire();
        let snapshot = RateLimit {
            limit: 100,
            remaining: 50,
            reset_at: chrono::Utc::now() + chrono::Duration::seconds(60),
            used: 50,
            resource: RateLimitResource::Core,
        };
        limiter.observe(&snapshot);
        assert_eq!(limiter.remaining(), 50);
    }

    /// §8 property 7 / Scenario G: a sub-second `reset_at` must still be
    /// honored, not truncated to "already reset".
    #[test]
    fn rate_limiter_honors_sub_second_reset() {
        let limiter = RateLimiter::new(5);
        limiter.observe(&RateLimit {
            limit: 5,
            remaining: 0,
            reset_at: chrono::Utc::now() + chrono::Duration::milliseconds(200),
            used: 5,
            resource: RateLimitResource::Core,
        });

        let start = Instant::now();
        limiter.acquire();
        assert!(
            start.elapsed() >= Duration::from_millis(150),
            "acquire() returned a token before the 200ms reset window elapsed: {:?}",
            start.elapsed()
        );
    }

    #[test]
    fn deduplicator_caches_within_half_ttl() {
        let dedup: Deduplicator<u32> = Deduplicator::new(Duration::from_secs(10));
        let mut calls = 0;
        let v1 = dedup.get_or_insert_with("key", || {
            calls += 1;
            42
        });
        let v2 = dedup.get_or_insert_with("key", || {
            calls += 1;
            99
        });
        assert_eq!(v1, 42);
        assert_eq!(v2, 42);
        assert_eq!(calls, 1);

        let (hits, misses) = dedup.metrics();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
    }

    #[test]
    fn deduplicator_expires_after_half_ttl() {
        let dedup: Deduplicator<u32> = Deduplicator::new(Duration::from_millis(20));
        dedup.insert("key".into(), 1);
        std::thread::sleep(Duration::from_millis(30));
        assert!(dedup.get("key").is_none());
    }

    #[test]
    fn deduplicator_forget_forces_recompute() {
        let dedup: Deduplicator<u32> = Deduplicator::new(Duration::from_secs(10));
        dedup.insert("key".into(), 1);
        dedup.forget("key");
        let mut calls = 0;
        let v = dedup.get_or_insert_with("key", || {
            calls += 1;
            2
        });
        assert_eq!(v, 2);
        assert_eq!(calls, 1);
    }

    /// Spec §8 property 5: N concurrent callers sharing a key invoke the
    /// underlying function exactly once, with every caller receiving the
    /// same value.
    #[test]
    fn deduplicator_collapses_concurrent_callers_to_one_invocation() {
        let dedup: Arc<Deduplicator<u32>> = Arc::new(Deduplicator::new(Duration::from_secs(10)));
        let invocations = Arc::new(Mutex::new(0u32));
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dedup = Arc::clone(&dedup);
                let invocations = Arc::clone(&invocations);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    dedup.get_or_insert_with("shared-key", || {
                        let mut count = invocations.lock().unwrap();
                        *count += 1;
                        std::thread::sleep(Duration::from_millis(25));
                        7
                    })
                })
            })
            .collect();

        let results: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().all(|&v| v == 7));
        assert_eq!(*invocations.lock().unwrap(), 1);
    }

    #[test]
    fn api_optimizer_tracks_dedup_and_totals() {
        let optimizer: ApiOptimizer<u32> = ApiOptimizer::new(100, Duration::from_secs(10));
        let calls = Arc::new(Mutex::new(0));

        let v1 = optimizer.execute("widgets", || {
            *calls.lock().unwrap() += 1;
            10
        });
        let v2 = optimizer.execute("widgets", || {
            *calls.lock().unwrap() += 1;
            99
        });
        assert_eq!(v1, 10);
        assert_eq!(v2, 10);
        assert_eq!(*calls.lock().unwrap(), 1);

        let metrics = optimizer.metrics();
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.deduplicated_calls, 1);
        assert_eq!(metrics.cache_misses, 1);
        assert_eq!(metrics.cache_hits, 1);
    }

    #[test]
    fn api_optimizer_disabled_bypasses_rate_limit_and_dedup() {
        let optimizer: ApiOptimizer<u32> = ApiOptimizer::new(1, Duration::from_secs(10));
        optimizer.set_enabled(false);
        let calls = Arc::new(Mutex::new(0));
        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            optimizer.execute("widgets", move || {
                *calls.lock().unwrap() += 1;
                1
            });
        }
        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(optimizer.metrics().deduplicated_calls, 0);
    }

    #[test]
    fn batcher_flushes_on_size() {
        let batcher: Batcher<u32> = Batcher::new(2, Duration::from_secs(60));
        assert!(batcher.push(1).is_none());
        let flushed = batcher.push(2);
        assert_eq!(flushed, Some(vec![1, 2]));
    }

    #[test]
    fn batcher_flushes_on_time() {
        let batcher: Batcher<u32> = Batcher::new(100, Duration::from_millis(10));
        assert!(batcher.push(1).is_none());
        assert!(batcher.flush_if_due().is_none());
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(batcher.flush_if_due(), Some(vec![1]));
    }

    #[test]
    fn batcher_flush_if_due_is_noop_when_empty() {
        let batcher: Batcher<u32> = Batcher::new(10, Duration::from_millis(1));
        assert!(batcher.flush_if_due().is_none());
    }
}

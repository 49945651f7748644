//! Deduplicating, rate-limited work queue of reconciliation keys.
//!
//! Per key the queue implements
//! `Idle -> Queued -> Processing -> {Idle | Queued-with-backoff}`:
//!
//! - a key that is already queued is not queued twice
//! - a key that changes while being processed is queued again once
//!   [`WorkQueue::done`] is called, never dropped
//! - no two workers ever hold the same key
//! - delayed keys become ready when their backoff expires

use crate::config::{EngineConfig, RateLimit, RetryConfig};
use crate::source::ChangeSink;
use parking_lot::{Condvar, Mutex};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::trace;

/// Longest delay a key can be held back.
const MAX_BACKOFF: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A key waiting for its backoff to expire.
struct Delayed<K> {
    ready_at: Instant,
    seq: u64,
    key: K,
}

impl<K> PartialEq for Delayed<K> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<K> Eq for Delayed<K> {}

impl<K> PartialOrd for Delayed<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Delayed<K> {
    // Reversed so the max-heap yields the earliest deadline
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Token bucket shared by all requeues.
struct TokenBucket {
    qps: f64,
    burst: f64,
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    fn new(limit: RateLimit) -> Self {
        let burst = f64::from(limit.burst.max(1));
        Self {
            qps: limit.qps.max(f64::MIN_POSITIVE),
            burst,
            tokens: burst,
            last: Instant::now(),
        }
    }

    /// Takes one token and returns how long the caller must wait for it.
    fn reserve(&mut self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.qps).min(self.burst);
        self.last = now;
        self.tokens -= 1.0;

        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(-self.tokens / self.qps).unwrap_or(MAX_BACKOFF)
        }
    }
}

struct QueueState<K> {
    /// Ready keys in FIFO order.
    queue: VecDeque<K>,
    /// Keys that need processing (queued, or changed while processing).
    dirty: HashSet<K>,
    /// Keys currently held by a worker.
    processing: HashSet<K>,
    /// Backoff heap; entries are valid only if they match `waiting`.
    delayed: BinaryHeap<Delayed<K>>,
    waiting: HashMap<K, (Instant, u64)>,
    failures: HashMap<K, u32>,
    bucket: Option<TokenBucket>,
    seq: u64,
    shutting_down: bool,
}

impl<K: Clone + Eq + Hash> QueueState<K> {
    /// Marks `key` dirty; returns true if it became ready.
    fn insert(&mut self, key: K) -> bool {
        if self.dirty.contains(&key) {
            return false;
        }
        self.dirty.insert(key.clone());
        if self.processing.contains(&key) {
            return false;
        }
        self.queue.push_back(key);
        true
    }

    /// Moves every expired backoff into the ready queue.
    fn promote_due(&mut self, now: Instant) -> bool {
        let mut promoted = false;
        while let Some(next) = self.delayed.peek() {
            if next.ready_at > now {
                break;
            }
            let Some(entry) = self.delayed.pop() else {
                break;
            };
            if self.waiting.get(&entry.key) == Some(&(entry.ready_at, entry.seq)) {
                self.waiting.remove(&entry.key);
                promoted |= self.insert(entry.key);
            }
        }
        promoted
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.delayed.peek().map(|next| next.ready_at)
    }
}

/// A concurrent work queue of keys.
///
/// All methods take `&self`; callers share the queue through an `Arc`
/// and never lock around it.
pub struct WorkQueue<K = String> {
    state: Mutex<QueueState<K>>,
    ready: Condvar,
    idle: Condvar,
    retry: RetryConfig,
}

impl<K: Clone + Eq + Hash> WorkQueue<K> {
    /// Creates a queue with per-key backoff and no overall rate limit.
    pub fn new(retry: RetryConfig) -> Self {
        Self::with_rate_limit(retry, None)
    }

    /// Creates a queue whose requeue delay is the larger of the per-key
    /// backoff and the shared token bucket's delay.
    pub fn with_rate_limit(retry: RetryConfig, rate_limit: Option<RateLimit>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                delayed: BinaryHeap::new(),
                waiting: HashMap::new(),
                failures: HashMap::new(),
                bucket: rate_limit.map(TokenBucket::new),
                seq: 0,
                shutting_down: false,
            }),
            ready: Condvar::new(),
            idle: Condvar::new(),
            retry,
        }
    }

    /// Creates a queue from the engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_rate_limit(config.retry.clone(), config.rate_limit)
    }

    /// Queues `key` now. Ignored after shutdown.
    pub fn add(&self, key: K) {
        let mut state = self.state.lock();
        if state.shutting_down {
            return;
        }
        if state.insert(key) {
            self.ready.notify_one();
        }
    }

    /// Queues `key` once `delay` has elapsed.
    ///
    /// Delays are capped at one year. If the key is already waiting, the earlier deadline wins.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let mut state = self.state.lock();
        if state.shutting_down {
            return;
        }

        let ready_at = Instant::now() + delay.min(MAX_BACKOFF);
        if matches!(state.waiting.get(&key), Some((existing, _)) if *existing <= ready_at) {
            return;
        }

        state.seq += 1;
        let seq = state.seq;
        state.waiting.insert(key.clone(), (ready_at, seq));
        state.delayed.push(Delayed { ready_at, seq, key });
        // Wake a waiter so it can shorten its timeout
        self.ready.notify_one();
    }

    /// Records a failure for `key` and queues it after its backoff.
    pub fn add_rate_limited(&self, key: K) {
        let delay = {
            let mut state = self.state.lock();
            let failures = {
                let count = state.failures.entry(key.clone()).or_insert(0);
                *count = count.saturating_add(1);
                *count
            };
            let mut delay = self.retry.delay_for_failure(failures);
            if let Some(bucket) = state.bucket.as_mut() {
                delay = delay.max(bucket.reserve(Instant::now()));
            }
            trace!(failures, ?delay, "Requeue with backoff");
            delay
        };
        self.add_after(key, delay);
    }

    /// Clears the failure history of `key`.
    pub fn forget<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.state.lock().failures.remove(key);
    }

    /// Returns the number of consecutive failures recorded for `key`.
    pub fn num_requeues<Q>(&self, key: &Q) -> u32
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.state.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Blocks until a key is ready and hands it to the caller.
    ///
    /// Returns `None` once the queue is shut down. The caller must call
    /// [`WorkQueue::done`] when finished with the key.
    pub fn get(&self) -> Option<K> {
        let mut state = self.state.lock();
        loop {
            if state.shutting_down {
                return None;
            }

            state.promote_due(Instant::now());
            if let Some(key) = state.queue.pop_front() {
                state.dirty.remove(&key);
                state.processing.insert(key.clone());
                return Some(key);
            }

            match state.next_deadline() {
                Some(deadline) => {
                    self.ready.wait_until(&mut state, deadline);
                }
                None => self.ready.wait(&mut state),
            }
        }
    }

    /// Marks `key` as no longer processing.
    ///
    /// If the key changed while it was processed it is queued again.
    pub fn done(&self, key: &K) {
        let mut state = self.state.lock();
        state.processing.remove(key);

        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            self.ready.notify_one();
        }
        if state.processing.is_empty() {
            self.idle.notify_all();
        }
    }

    /// Stops handing out keys and wakes every blocked [`WorkQueue::get`].
    pub fn shut_down(&self) {
        let mut state = self.state.lock();
        state.shutting_down = true;
        self.ready.notify_all();
    }

    /// Blocks until no key is being processed.
    pub fn wait_idle(&self) {
        let mut state = self.state.lock();
        while !state.processing.is_empty() {
            self.idle.wait(&mut state);
        }
    }

    /// Returns true once [`WorkQueue::shut_down`] was called.
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Returns the number of ready keys.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Returns true if no key is ready.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of keys waiting on a backoff.
    pub fn delayed_len(&self) -> usize {
        self.state.lock().waiting.len()
    }

    /// Returns the number of keys currently held by workers.
    pub fn processing_len(&self) -> usize {
        self.state.lock().processing.len()
    }
}

impl ChangeSink for WorkQueue<String> {
    fn on_change(&self, key: &str) {
        self.add(key.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn queue() -> WorkQueue<String> {
        WorkQueue::new(RetryConfig::new(Duration::from_millis(20), Duration::from_secs(1)).with_jitter(false))
    }

    #[test]
    fn queued_key_is_deduplicated() {
        let q = queue();
        q.add("a".into());
        q.add("a".into());
        q.add("b".into());

        assert_eq!(q.len(), 2);
        assert_eq!(q.get().as_deref(), Some("a"));
        assert_eq!(q.get().as_deref(), Some("b"));
        assert!(q.is_empty());
    }

    #[test]
    fn change_during_processing_is_requeued_on_done() {
        let q = queue();
        q.add("a".into());
        let key = q.get().unwrap();

        q.add("a".into());
        assert_eq!(q.len(), 0, "a processing key must not be handed out twice");

        q.done(&key);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().as_deref(), Some("a"));
    }

    #[test]
    fn done_without_change_returns_to_idle() {
        let q = queue();
        q.add("a".into());
        let key = q.get().unwrap();
        q.done(&key);

        assert!(q.is_empty());
        assert_eq!(q.processing_len(), 0);
    }

    #[test]
    fn backoff_grows_and_forget_resets() {
        let q = queue();
        q.add_rate_limited("a".into());
        q.add_rate_limited("a".into());
        assert_eq!(q.num_requeues("a"), 2);

        q.forget("a");
        assert_eq!(q.num_requeues("a"), 0);
    }

    #[test]
    fn delayed_key_becomes_ready_after_backoff() {
        let q = queue();
        let start = Instant::now();
        q.add_rate_limited("a".into());
        assert!(q.is_empty());
        assert_eq!(q.delayed_len(), 1);

        assert_eq!(q.get().as_deref(), Some("a"));
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(q.delayed_len(), 0);
    }

    #[test]
    fn earlier_deadline_wins() {
        let q = queue();
        q.add_after("a".into(), Duration::from_secs(60));
        q.add_after("a".into(), Duration::from_millis(10));

        assert_eq!(q.get().as_deref(), Some("a"));
    }

    #[test]
    fn immediate_add_preempts_backoff_without_duplicates() {
        let q = queue();
        q.add_after("a".into(), Duration::from_millis(10));
        q.add("a".into());

        let key = q.get().unwrap();
        thread::sleep(Duration::from_millis(30));
        // The expired backoff marks the key dirty while it is processing
        q.add("b".into());
        assert_eq!(q.get().as_deref(), Some("b"));
        q.done(&key);
        assert_eq!(q.get().as_deref(), Some("a"));
    }

    #[test]
    fn shutdown_wakes_blocked_getters() {
        let q = Arc::new(queue());
        let getter = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.get())
        };

        thread::sleep(Duration::from_millis(20));
        q.shut_down();

        assert_eq!(getter.join().unwrap(), None);
        assert!(q.is_shutting_down());
    }

    #[test]
    fn shutdown_stops_dequeues_and_adds() {
        let q = queue();
        q.add("a".into());
        q.shut_down();
        q.add("b".into());

        assert_eq!(q.get(), None);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn wait_idle_returns_after_done() {
        let q = Arc::new(queue());
        q.add("a".into());
        let key = q.get().unwrap();

        let waiter = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.wait_idle())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        q.done(&key);
        waiter.join().unwrap();
    }

    #[test]
    fn concurrent_workers_never_share_a_key() {
        let q = Arc::new(queue());
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let handled = Arc::new(Mutex::new(0usize));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&q);
                let in_flight = Arc::clone(&in_flight);
                let handled = Arc::clone(&handled);
                thread::spawn(move || {
                    while let Some(key) = q.get() {
                        assert!(in_flight.lock().insert(key.clone()), "{key} processed twice at once");
                        thread::sleep(Duration::from_millis(1));
                        in_flight.lock().remove(&key);
                        *handled.lock() += 1;
                        q.done(&key);
                    }
                })
            })
            .collect();

        for round in 0..50 {
            q.add(format!("key-{}", round % 5));
        }
        thread::sleep(Duration::from_millis(100));
        q.wait_idle();
        q.shut_down();
        for worker in workers {
            worker.join().unwrap();
        }

        assert!(*handled.lock() >= 5);
    }

    #[test]
    fn token_bucket_delays_after_burst() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(RateLimit::new(10.0, 2).unwrap());

        assert_eq!(bucket.reserve(now), Duration::ZERO);
        assert_eq!(bucket.reserve(now), Duration::ZERO);
        let delay = bucket.reserve(now);
        assert!(delay > Duration::from_millis(90) && delay <= Duration::from_millis(100));
    }

    #[test]
    fn unbounded_backoff_parks_the_key() {
        let retry = RetryConfig::new(Duration::from_secs(1), Duration::MAX)
            .with_backoff_multiplier(1e300)
            .with_jitter(false);
        let q: WorkQueue<String> = WorkQueue::new(retry);

        for _ in 0..4 {
            q.add_rate_limited("a".into());
        }
        assert_eq!(q.num_requeues("a"), 4);
        assert_eq!(q.delayed_len(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn starved_bucket_caps_its_delay() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(RateLimit {
            qps: f64::MIN_POSITIVE,
            burst: 1,
        });

        assert_eq!(bucket.reserve(now), Duration::ZERO);
        assert_eq!(bucket.reserve(now), MAX_BACKOFF);
    }

    #[test]
    fn queue_is_a_change_sink() {
        let q = queue();
        let sink: &dyn ChangeSink = &q;
        sink.on_change("ns/name");
        sink.on_change("ns/name");
        assert_eq!(q.len(), 1);
    }
}

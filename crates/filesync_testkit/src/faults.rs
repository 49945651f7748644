//! Fault-injecting collaborators.
//!
//! Wrappers around a [`Fetcher`] that fail, stall or panic on demand, for
//! exercising retry, backoff and panic isolation end to end.

use filesync_engine::{ByteStream, FetchError, FetchResult, Fetcher};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Fails the first `n` opens of each scripted location, then delegates.
pub struct FlakyFetcher<F: Fetcher> {
    inner: F,
    remaining: Mutex<HashMap<String, u32>>,
    failures: AtomicU64,
}

impl<F: Fetcher> FlakyFetcher<F> {
    /// Wraps `inner` with no scripted failures.
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            remaining: Mutex::new(HashMap::new()),
            failures: AtomicU64::new(0),
        }
    }

    /// Makes the next `times` opens of `location` fail.
    pub fn fail_times(&self, location: &str, times: u32) {
        self.remaining.lock().insert(location.to_string(), times);
    }

    /// Returns how many opens have failed so far.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }
}

impl<F: Fetcher> Fetcher for FlakyFetcher<F> {
    fn open(&self, location: &str) -> FetchResult<ByteStream> {
        {
            let mut remaining = self.remaining.lock();
            if let Some(left) = remaining.get_mut(location) {
                if *left > 0 {
                    *left -= 1;
                    self.failures.fetch_add(1, Ordering::SeqCst);
                    return Err(FetchError::transport_retryable(format!(
                        "flaky failure for {location}"
                    )));
                }
            }
        }
        self.inner.open(location)
    }
}

/// Sleeps before every open.
pub struct SlowFetcher<F: Fetcher> {
    inner: F,
    delay: Duration,
}

impl<F: Fetcher> SlowFetcher<F> {
    /// Wraps `inner`, delaying each open by `delay`.
    pub fn new(inner: F, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl<F: Fetcher> Fetcher for SlowFetcher<F> {
    fn open(&self, location: &str) -> FetchResult<ByteStream> {
        thread::sleep(self.delay);
        self.inner.open(location)
    }
}

/// Panics when opening armed locations.
pub struct PanickingFetcher<F: Fetcher> {
    inner: F,
    armed: Mutex<HashSet<String>>,
}

impl<F: Fetcher> PanickingFetcher<F> {
    /// Wraps `inner` with nothing armed.
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            armed: Mutex::new(HashSet::new()),
        }
    }

    /// Makes opens of `location` panic until disarmed.
    pub fn arm(&self, location: &str) {
        self.armed.lock().insert(location.to_string());
    }

    /// Stops panicking for `location`.
    pub fn disarm(&self, location: &str) {
        self.armed.lock().remove(location);
    }
}

impl<F: Fetcher> Fetcher for PanickingFetcher<F> {
    fn open(&self, location: &str) -> FetchResult<ByteStream> {
        let armed = self.armed.lock().contains(location);
        if armed {
            panic!("fetcher exploded on {location}");
        }
        self.inner.open(location)
    }
}

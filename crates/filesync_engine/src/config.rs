//! Configuration for the reconciliation engine.

use crate::error::{EngineError, EngineResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for reconciliation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory the engine owns and keeps in sync.
    pub target_dir: PathBuf,
    /// Number of parallel workers.
    pub workers: usize,
    /// Per-key retry configuration.
    pub retry: RetryConfig,
    /// Overall requeue rate limit shared by all keys.
    pub rate_limit: Option<RateLimit>,
    /// Timeout for connecting to and reading from a remote source.
    pub fetch_timeout: Duration,
}

impl EngineConfig {
    /// Creates a new engine configuration for `target_dir`.
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
            workers: 1,
            retry: RetryConfig::default(),
            rate_limit: Some(RateLimit::default()),
            fetch_timeout: Duration::from_secs(30),
        }
    }

    /// Returns the target directory.
    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Sets the number of workers (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets or clears the overall rate limit.
    pub fn with_rate_limit(mut self, rate_limit: Option<RateLimit>) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Sets the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("/tmp/downloads")
    }
}

/// Per-key exponential backoff.
///
/// Retries are unbounded; only the delay is capped.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration bounded by `max_delay`.
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Retries immediately, forever.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the requeue delay after `failures` consecutive failures.
    pub fn delay_for_failure(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();
        let delay_secs = base_delay.min(max_secs);

        let delay_secs = if self.add_jitter {
            // Add up to 25% jitter, never past the cap
            (delay_secs + delay_secs * 0.25 * rand_jitter()).min(max_secs)
        } else {
            delay_secs
        };

        Duration::try_from_secs_f64(delay_secs).unwrap_or(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_secs(1000))
    }
}

/// Token-bucket limit on requeues across all keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    /// Tokens refilled per second.
    pub qps: f64,
    /// Bucket capacity.
    pub burst: u32,
}

impl RateLimit {
    /// Creates a rate limit.
    ///
    /// `qps` must be positive and finite. A zero `burst` is raised to one.
    pub fn new(qps: f64, burst: u32) -> EngineResult<Self> {
        if !qps.is_finite() || qps <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "rate limit must be a positive number of requeues per second, got {qps}"
            )));
        }
        Ok(Self {
            qps,
            burst: burst.max(1),
        })
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            qps: 10.0,
            burst: 100,
        }
    }
}

/// Cheap time-derived jitter in `[0, 1)`.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_builder() {
        let config = EngineConfig::new("/srv/plugins")
            .with_workers(4)
            .with_rate_limit(None)
            .with_fetch_timeout(Duration::from_secs(5));

        assert_eq!(config.target_dir(), Path::new("/srv/plugins"));
        assert_eq!(config.workers, 4);
        assert!(config.rate_limit.is_none());
        assert_eq!(config.fetch_timeout, Duration::from_secs(5));
    }

    #[test]
    fn workers_never_zero() {
        assert_eq!(EngineConfig::default().with_workers(0).workers, 1);
    }

    #[test]
    fn first_attempt_has_no_delay() {
        assert_eq!(RetryConfig::default().delay_for_failure(0), Duration::ZERO);
    }

    #[test]
    fn delay_grows_exponentially() {
        let config = RetryConfig::new(Duration::from_millis(100), Duration::from_secs(60))
            .with_jitter(false);

        assert_eq!(config.delay_for_failure(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_failure(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_failure(4), Duration::from_millis(800));
    }

    #[test]
    fn delay_respects_max_with_jitter() {
        let config = RetryConfig::new(Duration::from_secs(1), Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        for failures in 1..50 {
            assert!(config.delay_for_failure(failures) <= Duration::from_secs(5));
        }
        assert!(config.delay_for_failure(u32::MAX) <= Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_quarter() {
        let config = RetryConfig::new(Duration::from_millis(100), Duration::from_secs(60));
        let delay = config.delay_for_failure(1);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(125));
    }

    #[test]
    fn unbounded_max_delay_saturates() {
        let config = RetryConfig::new(Duration::from_secs(1), Duration::MAX)
            .with_backoff_multiplier(1e300)
            .with_jitter(false);

        assert_eq!(config.delay_for_failure(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_failure(3), Duration::MAX);
        assert_eq!(config.delay_for_failure(u32::MAX), Duration::MAX);
    }

    #[test]
    fn rate_limit_rejects_non_positive_qps() {
        assert!(matches!(
            RateLimit::new(0.0, 10),
            Err(EngineError::InvalidConfig(_))
        ));
        assert!(RateLimit::new(-1.0, 10).is_err());
        assert!(RateLimit::new(f64::NAN, 10).is_err());
        assert!(RateLimit::new(f64::INFINITY, 10).is_err());

        let limit = RateLimit::new(0.5, 0).unwrap();
        assert_eq!(limit.burst, 1);
        assert_eq!(RateLimit::default(), RateLimit::new(10.0, 100).unwrap());
    }

    #[test]
    fn immediate_retry() {
        let config = RetryConfig::immediate();
        assert_eq!(config.delay_for_failure(7), Duration::ZERO);
    }
}

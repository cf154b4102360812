//! Bounded retry for eventually-consistent effects.
//!
//! Commands are processed asynchronously and projections catch up in the
//! background, so callers (mostly tests) regularly need to poll until some
//! downstream state appears. [`eventually`] runs a fallible async closure until
//! it succeeds or gives up.

use std::future::Future;
use std::time::Duration;

use regex::Regex;

/// Controls how [`eventually`] retries.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Total number of attempts, including the first one.
    pub attempts: u32,

    /// Delay before the second attempt.
    pub interval: Duration,

    /// Multiplier applied to the interval after each failed attempt.
    /// `None` keeps the interval fixed.
    pub backoff_factor: Option<f64>,

    /// Upper bound for the interval when backing off.
    pub max_interval: Duration,

    /// Only errors whose message matches this pattern are retried.
    /// Any other error is returned immediately.
    pub tolerate: Option<Regex>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            attempts: 200,
            interval: Duration::from_millis(10),
            backoff_factor: None,
            max_interval: Duration::from_secs(1),
            tolerate: None,
        }
    }
}

impl RetryOptions {
    /// Creates the default options: 200 attempts, 10ms apart.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the attempt budget.
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Sets the (initial) interval between attempts.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Grows the interval by `factor` after each failure, capped at `max_interval`.
    ///
    /// Factors below 1, and non-finite ones, keep the interval fixed.
    pub fn backoff(mut self, factor: f64, max_interval: Duration) -> Self {
        self.backoff_factor = (factor.is_finite() && factor >= 1.0).then_some(factor);
        self.max_interval = max_interval;
        self
    }

    /// Only keeps retrying on errors whose message matches `pattern`.
    pub fn tolerate(mut self, pattern: Regex) -> Self {
        self.tolerate = Some(pattern);
        self
    }

    fn is_tolerated(&self, message: &str) -> bool {
        self.tolerate
            .as_ref()
            .is_none_or(|pattern| pattern.is_match(message))
    }

    fn next_interval(&self, current: Duration) -> Duration {
        match self.backoff_factor {
            Some(factor) => Duration::try_from_secs_f64(current.as_secs_f64() * factor)
                .map_or(self.max_interval, |next| next.min(self.max_interval)),
            None => current,
        }
    }
}

/// Runs `f` until it returns `Ok`.
///
/// Returns the last observed error once the attempt budget is exhausted, or
/// straight away when an error does not match the tolerance pattern.
pub async fn eventually<T, E, F, Fut>(mut f: F, options: RetryOptions) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut remaining = options.attempts.max(1);
    let mut interval = options.interval;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                remaining -= 1;
                let message = err.to_string();
                if remaining == 0 || !options.is_tolerated(&message) {
                    return Err(err);
                }
                tracing::trace!(remaining, error = %message, "eventually: retrying");
                tokio::time::sleep(interval).await;
                interval = options.next_interval(interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast() -> RetryOptions {
        RetryOptions::new().interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn resolves_immediately_when_fn_succeeds() {
        let result: Result<u32, String> = eventually(|| async { Ok(7) }, fast()).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn resolves_once_fn_stops_failing() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = eventually(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 { Err(format!("attempt {n}")) } else { Ok(n) }
                }
            },
            fast(),
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejects_with_last_error_when_attempts_are_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), String> = eventually(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(format!("failure {n}"))
                }
            },
            fast().attempts(4),
        )
        .await;

        assert_eq!(result, Err("failure 4".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn keeps_retrying_on_tolerated_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = eventually(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 5 { Err("not found yet".to_string()) } else { Ok(n) }
                }
            },
            fast().tolerate(Regex::new("not found").unwrap()),
        )
        .await;

        assert_eq!(result, Ok(5));
    }

    #[tokio::test]
    async fn rejects_immediately_on_unexpected_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), String> = eventually(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("connection refused".to_string())
                }
            },
            fast().tolerate(Regex::new("not found").unwrap()),
        )
        .await;

        assert_eq!(result, Err("connection refused".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_interval_up_to_the_cap() {
        let options = RetryOptions::new()
            .interval(Duration::from_millis(10))
            .backoff(2.0, Duration::from_millis(30));

        let second = options.next_interval(options.interval);
        let third = options.next_interval(second);
        assert_eq!(second, Duration::from_millis(20));
        assert_eq!(third, Duration::from_millis(30));
    }

    #[test]
    fn overflowing_backoff_is_capped() {
        let options = RetryOptions::new()
            .interval(Duration::from_millis(1))
            .backoff(1e30, Duration::from_millis(5));
        assert_eq!(options.next_interval(options.interval), Duration::from_millis(5));
    }

    #[test]
    fn shrinking_or_non_finite_factors_keep_the_interval_fixed() {
        for factor in [-2.0, 0.5, f64::NAN, f64::INFINITY] {
            let options = RetryOptions::new()
                .interval(Duration::from_millis(10))
                .backoff(factor, Duration::from_millis(50));
            assert_eq!(options.backoff_factor, None);
            assert_eq!(options.next_interval(options.interval), Duration::from_millis(10));
        }
    }

    #[tokio::test]
    async fn huge_backoff_still_returns_the_last_error() {
        let result: Result<(), String> = eventually(
            || async { Err("still failing".to_string()) },
            RetryOptions::new()
                .attempts(4)
                .interval(Duration::from_millis(1))
                .backoff(1e30, Duration::from_millis(5)),
        )
        .await;
        assert_eq!(result, Err("still failing".to_string()));
    }

    #[test]
    fn fixed_interval_without_backoff() {
        let options = RetryOptions::new();
        assert_eq!(options.next_interval(options.interval), Duration::from_millis(10));
    }
}

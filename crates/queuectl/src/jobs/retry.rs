use std::time::Duration;

/// Upper bound on a single backoff delay (100 years) so the store's
/// millisecond arithmetic cannot overflow.
pub const MAX_BACKOFF_SECS: u64 = 100 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return to `pending`, eligible again after `delay`.
    Retry { delay: Duration },
    /// Retries exhausted.
    Dead,
}

/// `backoff_base ^ attempts` seconds.
pub fn backoff_delay(backoff_base: u32, attempts: i64) -> Duration {
    let exp = u32::try_from(attempts.max(0)).unwrap_or(u32::MAX);
    let secs = u64::from(backoff_base).saturating_pow(exp);
    Duration::from_secs(secs.min(MAX_BACKOFF_SECS))
}

/// Decide what happens after a failed attempt.
///
/// `attempts` is the count including the attempt that just failed. A job may
/// run `max_retries + 1` times in total; it is dead once `attempts` exceeds
/// `max_retries`.
pub fn decide(attempts: i64, max_retries: i64, backoff_base: u32) -> RetryDecision {
    if attempts > max_retries {
        RetryDecision::Dead
    } else {
        RetryDecision::Retry {
            delay: backoff_delay(backoff_base, attempts),
        }
    }
}

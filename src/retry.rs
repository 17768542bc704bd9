use std::time::Duration;

/// A fixed-delay, attempt-bounded retry budget.
///
/// Attempts are counted, not timed, so the number of calls made before
/// giving up is exact regardless of how long each call takes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Budget for query submission and each continuation fetch.
    pub const fn query_default() -> Self {
        Self::new(10, Duration::from_secs(2))
    }

    /// Budget for polling a warehouse until it runs: two minutes at one poll a second.
    pub const fn warehouse_wait_default() -> Self {
        Self::new(120, Duration::from_secs(1))
    }

    /// Builds a wait budget from a wall-clock allowance, one attempt per `delay`.
    pub fn from_timeout(timeout: Duration, delay: Duration) -> Self {
        let attempts = if delay.is_zero() {
            1
        } else {
            (timeout.as_millis() / delay.as_millis().max(1)).max(1)
        };
        Self::new(u32::try_from(attempts).unwrap_or(u32::MAX), delay)
    }

    /// At least one attempt is always made.
    pub(crate) fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::query_default()
    }
}

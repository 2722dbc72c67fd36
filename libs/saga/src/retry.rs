//! Retry budgets and backoff.

use std::time::Duration;

use rand::Rng;

/// Bounded retry budget for a create step.
///
/// The try count itself lives in the command record, so the budget survives
/// restarts: two failures before a crash plus two after exhaust a budget of
/// three exactly like four uninterrupted failures do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryBudget {
    limit: u32,
}

impl TryBudget {
    /// Default number of retryable failures tolerated.
    pub const DEFAULT_LIMIT: u32 = 3;

    /// Create a budget tolerating `limit` failures.
    pub const fn new(limit: u32) -> Self {
        Self { limit }
    }

    /// The configured limit.
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Whether `tries` recorded failures exceed the budget.
    pub const fn is_exhausted(&self, tries: u32) -> bool {
        tries > self.limit
    }
}

impl Default for TryBudget {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LIMIT)
    }
}

/// Exponential backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Base delay for first retry.
    pub base: Duration,

    /// Maximum delay.
    pub max: Duration,

    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Calculate delay for the given attempt number (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = 2.0_f64.powi(attempt.min(30) as i32);
        let delay = (self.base.as_millis() as f64 * exp).min(self.max.as_millis() as f64);

        let jitter = if self.jitter > 0.0 {
            let spread = delay * self.jitter;
            rand::rng().random_range(-spread..=spread)
        } else {
            0.0
        };

        Duration::from_millis((delay + jitter).max(0.0) as u64)
    }
}

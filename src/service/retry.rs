//! Bounded retry with jittered exponential backoff.
//!
//! Shared by the sequence allocator (CAS contention) and the remote client
//! (transient fetch failures).

use std::time::Duration;

use rand::Rng;

use crate::error::IdGenError;
use crate::service::context::CallContext;

/// Retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
        }
    }

    /// Un-jittered delay after the `attempt`-th failure (1-based).
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        self.initial_backoff
            .saturating_mul(1_u32 << shift)
            .min(self.max_backoff)
    }

    /// Jittered delay after the `attempt`-th failure, in `[base/2, base]`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let millis = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        if millis < 2 {
            return base;
        }
        Duration::from_millis(rand::rng().random_range(millis / 2..=millis))
    }

    /// Start tracking attempts for one operation.
    #[must_use]
    pub const fn start(&self) -> Backoff {
        Backoff {
            policy: *self,
            attempts: 0,
        }
    }
}

/// Why a retry loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStop {
    /// Every attempt was used.
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// The call was cancelled while waiting.
    Cancelled,
}

/// Attempt counter for one retried operation.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempts: u32,
}

impl Backoff {
    /// Failed attempts recorded so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failed attempt and wait before the next one.
    ///
    /// # Errors
    ///
    /// Returns [`RetryStop::Exhausted`] once the budget is spent, or
    /// [`RetryStop::Cancelled`] if the context ends while waiting.
    pub async fn wait(&mut self, ctx: &CallContext) -> Result<(), RetryStop> {
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            return Err(RetryStop::Exhausted {
                attempts: self.attempts,
            });
        }

        ctx.sleep(self.policy.delay_for(self.attempts))
            .await
            .map_err(|_: IdGenError| RetryStop::Cancelled)
    }
}

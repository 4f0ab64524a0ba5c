//! Retry and backoff policy shared by the pool and the scheduler.
//!
//! The pool consults [`RetryPolicy::should_rotate`] after counting failures;
//! the scheduler uses [`RetryPolicy::round_delay`] to space its retry rounds.
//! Both sides sleep through [`wait_interruptible`] so the shared stop flag
//! can cut any backoff short.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Shared retry knobs with the defaults from the original deployment.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Consecutive failures on one resource before rotation is indicated.
    pub rotation_threshold: u32,
    /// Rounds of the post-pass retry phase per voice.
    pub retry_rounds: u32,
    /// Base delay between retry rounds; round `n` waits `n * base` (linear).
    pub round_delay_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rotation_threshold: 3,
            retry_rounds: 3,
            round_delay_base: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Whether `fail_count` consecutive failures warrant rotating the
    /// worker's resource. The rotation itself is unconditional once invoked;
    /// this check belongs to the caller.
    #[must_use]
    pub const fn should_rotate(&self, fail_count: u32) -> bool {
        fail_count >= self.rotation_threshold
    }

    /// Linear backoff before retry round `round` (1-based).
    #[must_use]
    pub const fn round_delay(&self, round: u32) -> Duration {
        // Duration::mul is not const; saturate on seconds instead.
        Duration::from_secs(self.round_delay_base.as_secs().saturating_mul(round as u64))
    }

    /// Whether `retry_count` has room left against `max_retries`.
    #[must_use]
    pub const fn budget_left(retry_count: u32, max_retries: u32) -> bool {
        retry_count < max_retries
    }
}

/// Sleep for `delay`, polling the stop flag every `poll` interval.
///
/// Returns `true` if the full delay elapsed, `false` if the stop flag was
/// raised first.
pub fn wait_interruptible(delay: Duration, stop: &AtomicBool, poll: Duration) -> bool {
    let deadline = Instant::now() + delay;
    while Instant::now() < deadline {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::thread::sleep(remaining.min(poll));
    }
    !stop.load(Ordering::Acquire)
}

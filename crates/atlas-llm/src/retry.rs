//! Backoff schedule for transient provider failures.
//!
//! The retry loop itself lives in [`crate::client::LlmClient`]; this module
//! owns the timing math so it stays testable without a network.

use std::time::Duration;

/// When and how often to retry a transient provider error.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt.
    pub base_delay: Duration,
    /// Ceiling on the computed delay.
    pub max_delay: Duration,
    /// Random spread applied to the computed delay, as a fraction (0.2 =
    /// ±20%). Keeps simultaneous clients from retrying in lockstep.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt number `attempt` (0-based).
    ///
    /// A provider-suggested delay (`Retry-After`) acts as a floor: we never
    /// retry sooner than the provider asked, but we may wait longer if the
    /// backoff schedule says so.
    pub fn delay_for(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);

        let mut delay = exponential;
        if self.jitter_factor > 0.0 {
            let spread = exponential.as_millis() as f64 * self.jitter_factor;
            let unit = random_u64() as f64 / u64::MAX as f64;
            let offset = unit * 2.0 * spread - spread;
            let millis = (exponential.as_millis() as f64 + offset).max(0.0);
            delay = Duration::from_millis(millis as u64);
        }

        if let Some(floor) = suggested {
            delay = delay.max(floor);
        }
        delay
    }
}

/// Cheap thread-local xorshift64 for jitter; not cryptographic.
fn random_u64() -> u64 {
    use std::cell::Cell;
    use std::time::{SystemTime, UNIX_EPOCH};

    thread_local! {
        static STATE: Cell<u64> = Cell::new(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0x9e37_79b9_7f4a_7c15)
                | 1,
        );
    }

    STATE.with(|state| {
        let mut x = state.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        state.set(x);
        x
    })
}

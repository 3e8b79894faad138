use std::time::Duration;

const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_attempts: u32,
    max_delay_ms: Option<u64>,
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            max_attempts,
            max_delay_ms: None,
        }
    }

    /// Clamp every computed delay. Unset by default, so delays keep doubling
    /// until the attempt ceiling stops them.
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = Some(max_delay_ms);
        self
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn max_delay_ms(&self) -> Option<u64> {
        self.max_delay_ms
    }

    /// Delay scheduled after `attempt` earlier failures: `base * 2^attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1_u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
        let calculated = self.base_delay_ms.saturating_mul(multiplier);
        let bounded = match self.max_delay_ms {
            Some(max) => calculated.min(max),
            None => calculated,
        };
        Duration::from_millis(bounded)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS)
    }
}

/// Attempt bookkeeping for one connection session.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    policy: RetryPolicy,
    attempts: u32,
}

impl ReconnectBackoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Reconnects scheduled since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay the next failure would schedule.
    pub fn current_delay(&self) -> Duration {
        self.policy.delay_for_attempt(self.attempts)
    }

    /// Consume one attempt and return its delay, or `None` once the ceiling
    /// is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        let delay = self.current_delay();
        self.attempts += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_base_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1_000));
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.max_delay_ms(), None);
    }

    #[test]
    fn doubles_for_each_attempt_without_cap() {
        let policy = RetryPolicy::new(1_000, 5);
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(8_000));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(1_024_000));
    }

    #[test]
    fn caps_delay_when_max_is_configured() {
        let policy = RetryPolicy::new(1_000, 5).with_max_delay_ms(4_000);
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(4_000));
    }

    #[test]
    fn saturates_instead_of_overflowing() {
        let policy = RetryPolicy::new(u64::MAX / 2, 100);
        assert_eq!(policy.delay_for_attempt(90), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn nth_failure_schedules_doubling_delay_and_counts_once() {
        let mut backoff = ReconnectBackoff::new(RetryPolicy::default());
        for n in 1..5_u32 {
            let delay = backoff.next_delay().expect("attempts remain");
            assert_eq!(delay, Duration::from_millis(1_000 * 2_u64.pow(n - 1)));
            assert_eq!(backoff.attempts(), n);
        }
    }

    #[test]
    fn stops_after_max_attempts() {
        let mut backoff = ReconnectBackoff::new(RetryPolicy::default());
        let scheduled = std::iter::from_fn(|| backoff.next_delay()).count();
        assert_eq!(scheduled, 5);
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn reset_returns_to_base_delay() {
        let mut backoff = ReconnectBackoff::new(RetryPolicy::default());
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1_000)));
    }
}

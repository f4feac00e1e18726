use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff for webhook delivery.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Random jitter as a fraction of the delay (0.2 = ±20%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
        jitter: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            backoff_factor: backoff_factor.max(1.0),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Backoff before retry number `retry` (1 = first retry), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exp = retry.saturating_sub(1).min(31) as i32;
        let ms = (initial_ms * self.backoff_factor.powi(exp)).min(max_ms);
        Duration::from_millis(ms as u64)
    }

    /// Backoff before retry number `retry` with jitter applied, never above
    /// `max_delay`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if self.jitter == 0.0 || base.is_zero() {
            return base;
        }
        let base_ms = base.as_millis() as f64;
        let spread = base_ms * self.jitter;
        let jittered = base_ms + rand::thread_rng().gen_range(-spread..=spread);
        let capped = jittered.clamp(0.0, self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy(jitter: f64) -> RetryPolicy {
        RetryPolicy::new(
            5,
            Duration::from_millis(100),
            Duration::from_millis(1_000),
            2.0,
            jitter,
        )
    }

    #[test]
    fn base_delay_doubles_then_caps() {
        let p = policy(0.0);
        assert_eq!(p.base_delay(1), Duration::from_millis(100));
        assert_eq!(p.base_delay(2), Duration::from_millis(200));
        assert_eq!(p.base_delay(3), Duration::from_millis(400));
        assert_eq!(p.base_delay(4), Duration::from_millis(800));
        assert_eq!(p.base_delay(5), Duration::from_millis(1_000));
        assert_eq!(p.base_delay(40), Duration::from_millis(1_000));
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let p = policy(0.0);
        assert_eq!(p.delay_for_retry(2), p.base_delay(2));
    }

    #[test]
    fn constructor_clamps_inputs() {
        let p = RetryPolicy::new(0, Duration::from_secs(2), Duration::from_secs(1), 0.5, 3.0);
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.max_delay, Duration::from_secs(2));
        assert_eq!(p.backoff_factor, 1.0);
        assert_eq!(p.jitter, 1.0);
    }

    proptest! {
        #[test]
        fn jittered_delay_stays_in_band(retry in 1u32..12, jitter in 0.0f64..1.0) {
            let p = policy(jitter);
            let base = p.base_delay(retry).as_millis() as f64;
            let delay = p.delay_for_retry(retry).as_millis() as f64;
            prop_assert!(delay <= p.max_delay.as_millis() as f64);
            prop_assert!(delay >= (base * (1.0 - jitter)).floor() - 1.0);
            prop_assert!(delay <= (base * (1.0 + jitter)).ceil() + 1.0);
        }
    }
}

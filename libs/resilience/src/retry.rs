//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy for one executor invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction (0.0 to 1.0) by which each delay is randomized in both directions.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Un-jittered delay after the `attempt`-th failure (1-based):
    /// `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let millis = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(millis.min(self.max_delay_ms))
    }

    /// Lowest and highest delay the jitter can produce for `attempt`.
    pub fn jitter_bounds(&self, attempt: u32) -> (Duration, Duration) {
        let nominal = self.nominal_delay(attempt).as_secs_f64();
        let jitter = self.clamped_jitter();
        let low = Duration::from_secs_f64((nominal * (1.0 - jitter)).max(0.0));
        let high = Duration::from_secs_f64(nominal * (1.0 + jitter)).min(self.max_delay());
        (low, high.max(low))
    }

    /// Delay to sleep after the `attempt`-th failure. A server supplied
    /// `retry_after` hint raises the delay but never past `max_delay`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let jittered = apply_jitter(self.nominal_delay(attempt), self.clamped_jitter());
        let delay = match retry_after {
            Some(hint) => jittered.max(hint),
            None => jittered,
        };
        delay.min(self.max_delay())
    }

    fn clamped_jitter(&self) -> f64 {
        if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

fn apply_jitter(duration: Duration, jitter: f64) -> Duration {
    let range = duration.as_secs_f64() * jitter;
    if range <= 0.0 {
        return duration;
    }
    let offset = rand::rng().random_range(-range..=range);
    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nominal_delays_double_until_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            ..Default::default()
        };
        let millis: Vec<u128> = (1..=8)
            .map(|attempt| policy.nominal_delay(attempt).as_millis())
            .collect();
        assert_eq!(
            millis,
            vec![500, 1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]
        );
    }

    #[test]
    fn jittered_delay_stays_in_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 1..=6 {
            let (low, high) = policy.jitter_bounds(attempt);
            for _ in 0..200 {
                let delay = policy.delay_for(attempt, None);
                assert!(delay >= low, "attempt {attempt}: {delay:?} < {low:?}");
                assert!(delay <= high, "attempt {attempt}: {delay:?} > {high:?}");
            }
        }
    }

    #[test]
    fn each_delay_is_at_least_previous_lower_bound() {
        let policy = RetryPolicy {
            max_attempts: 12,
            ..Default::default()
        };
        for attempt in 2..=12 {
            let (previous_low, _) = policy.jitter_bounds(attempt - 1);
            for _ in 0..100 {
                assert!(policy.delay_for(attempt, None) >= previous_low);
            }
        }
    }

    #[test]
    fn retry_after_hint_raises_delay_but_respects_cap() {
        let policy = RetryPolicy::default();
        let delay = policy.delay_for(1, Some(Duration::from_secs(5)));
        assert_eq!(delay, Duration::from_secs(5));
        let capped = policy.delay_for(1, Some(Duration::from_secs(600)));
        assert_eq!(capped, Duration::from_secs(30));
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(3, None), Duration::from_secs(2));
        let nan = RetryPolicy {
            jitter: f64::NAN,
            ..Default::default()
        };
        assert_eq!(nan.delay_for(1, None), Duration::from_millis(500));
    }

    #[test]
    fn at_least_one_attempt() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(policy.max_attempts(), 1);
    }
}

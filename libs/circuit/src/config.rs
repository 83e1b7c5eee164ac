use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Circuit breaker configuration shared by all endpoints of a gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive transient failures that open the circuit.
    pub failure_threshold: u32,
    /// A failure older than this restarts the consecutive count.
    pub failure_window_ms: u64,
    /// Cooldown after the first trip; doubles on every further trip.
    pub cooldown_base_ms: u64,
    /// Upper bound for the doubled cooldown.
    pub cooldown_cap_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_ms: 60_000,
            cooldown_base_ms: 30_000,
            cooldown_cap_ms: 300_000,
        }
    }
}

impl BreakerConfig {
    pub fn failure_window(&self) -> Duration {
        Duration::from_millis(self.failure_window_ms)
    }

    /// Cooldown for the `trips`-th consecutive trip (1-based).
    pub fn cooldown_for(&self, trips: u32) -> Duration {
        let exponent = trips.saturating_sub(1).min(20);
        let base = self.cooldown_base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(base.min(self.cooldown_cap_ms.max(self.cooldown_base_ms)))
    }
}

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use gsm_telemetry::{TelemetryLabels, record_counter};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{BreakerConfig, CircuitState, EndpointHealth, EndpointKey, Outcome};

/// Returned by [`CircuitGate::allow`] when the endpoint is presumed unhealthy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit open for {endpoint}")]
pub struct CircuitOpen {
    pub endpoint: EndpointKey,
    /// Time left until a probe will be let through, when known.
    pub retry_in: Option<Duration>,
}

/// Per-endpoint circuit breaker gate.
///
/// Health records live in a sharded map; every transition happens while the
/// entry for that endpoint is held, so unrelated endpoints never contend and
/// transitions for one endpoint are totally ordered. Cloning shares state.
#[derive(Clone)]
pub struct CircuitGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    config: BreakerConfig,
    endpoints: DashMap<EndpointKey, EndpointHealth>,
}

/// Permission to make one call. Hand it back through
/// [`CircuitGate::record_outcome`]; a probe permit dropped without an outcome
/// frees the probe slot again.
#[must_use = "report the call outcome with CircuitGate::record_outcome"]
#[derive(Debug)]
pub struct Permit {
    key: EndpointKey,
    probe: bool,
    epoch: u64,
    settled: bool,
    gate: Arc<GateInner>,
}

impl Permit {
    pub fn endpoint(&self) -> &EndpointKey {
        &self.key
    }

    /// True when this permit is the single HalfOpen probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.gate.release_probe(&self.key, self.epoch);
        }
    }
}

impl std::fmt::Debug for GateInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateInner")
            .field("config", &self.config)
            .field("endpoints", &self.endpoints.len())
            .finish()
    }
}

impl CircuitGate {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            inner: Arc::new(GateInner {
                config,
                endpoints: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.inner.config
    }

    /// Decides whether a call to `key` may be attempted.
    pub fn allow(&self, key: &EndpointKey) -> Result<Permit, CircuitOpen> {
        let now = Instant::now();
        let mut health = self
            .inner
            .endpoints
            .entry(key.clone())
            .or_insert_with(|| EndpointHealth::new(key.clone()));

        let probe = match health.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let open_until = health.open_until.unwrap_or(now);
                if now < open_until {
                    return Err(CircuitOpen {
                        endpoint: key.clone(),
                        retry_in: Some(open_until - now),
                    });
                }
                transition(&mut health, CircuitState::HalfOpen);
                health.probe_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if health.probe_in_flight {
                    return Err(CircuitOpen {
                        endpoint: key.clone(),
                        retry_in: None,
                    });
                }
                health.probe_in_flight = true;
                true
            }
        };

        if probe {
            debug!(endpoint = %key, "issuing half-open probe permit");
        }
        Ok(Permit {
            key: key.clone(),
            probe,
            epoch: health.epoch,
            settled: false,
            gate: Arc::clone(&self.inner),
        })
    }

    /// Applies the outcome of the call made under `permit`.
    pub fn record_outcome(&self, mut permit: Permit, outcome: Outcome) {
        permit.settled = true;
        self.inner.apply(&permit, outcome, Instant::now());
    }

    /// Snapshot of the endpoint's health, if it has been seen.
    pub fn health(&self, key: &EndpointKey) -> Option<EndpointHealth> {
        self.inner.endpoints.get(key).map(|health| health.clone())
    }

    pub fn state(&self, key: &EndpointKey) -> CircuitState {
        self.health(key)
            .map(|health| health.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Forces an endpoint into `state` (admin tooling and tests).
    pub fn force_state(&self, key: &EndpointKey, state: CircuitState) {
        let now = Instant::now();
        let mut health = self
            .inner
            .endpoints
            .entry(key.clone())
            .or_insert_with(|| EndpointHealth::new(key.clone()));
        match state {
            CircuitState::Closed => close(&mut health),
            CircuitState::Open => {
                health.trips = health.trips.max(1);
                health.open_until = Some(now + self.inner.config.cooldown_for(health.trips));
                transition(&mut health, CircuitState::Open);
            }
            CircuitState::HalfOpen => {
                health.probe_in_flight = false;
                transition(&mut health, CircuitState::HalfOpen);
            }
        }
    }
}

impl GateInner {
    fn apply(&self, permit: &Permit, outcome: Outcome, now: Instant) {
        let Some(mut health) = self.endpoints.get_mut(&permit.key) else {
            return;
        };
        if health.epoch != permit.epoch {
            debug!(
                endpoint = %permit.key,
                outcome = outcome.as_str(),
                state = %health.state,
                "ignoring outcome of a permit issued before the last transition"
            );
            return;
        }

        match (health.state, outcome) {
            (CircuitState::Closed, Outcome::Success) => {
                health.consecutive_failures = 0;
            }
            (CircuitState::Closed, Outcome::TransientFailure) => {
                let window = self.config.failure_window();
                let stale = health
                    .last_failure_at
                    .is_some_and(|last| now.saturating_duration_since(last) > window);
                if stale {
                    health.consecutive_failures = 0;
                }
                health.consecutive_failures += 1;
                health.last_failure_at = Some(now);
                if health.consecutive_failures >= self.config.failure_threshold {
                    self.trip(&mut health, now);
                }
            }
            (CircuitState::HalfOpen, Outcome::Success) if permit.probe => {
                info!(endpoint = %permit.key, "probe succeeded, closing circuit");
                close(&mut health);
            }
            (CircuitState::HalfOpen, Outcome::TransientFailure) if permit.probe => {
                health.probe_in_flight = false;
                health.last_failure_at = Some(now);
                self.trip(&mut health, now);
            }
            (CircuitState::HalfOpen, Outcome::PermanentFailure) if permit.probe => {
                // The remote answered but rejected the request; let another
                // probe decide.
                health.probe_in_flight = false;
            }
            (_, Outcome::PermanentFailure) => {}
            (state, outcome) => {
                debug!(
                    endpoint = %permit.key,
                    %state,
                    outcome = outcome.as_str(),
                    "outcome does not affect circuit state"
                );
            }
        }
    }

    fn trip(&self, health: &mut EndpointHealth, now: Instant) {
        health.trips = health.trips.saturating_add(1);
        let cooldown = self.config.cooldown_for(health.trips);
        health.open_until = Some(now + cooldown);
        warn!(
            endpoint = %health.key,
            failures = health.consecutive_failures,
            trips = health.trips,
            cooldown_ms = cooldown.as_millis() as u64,
            "circuit opened"
        );
        transition(health, CircuitState::Open);
    }

    fn release_probe(&self, key: &EndpointKey, epoch: u64) {
        if let Some(mut health) = self.endpoints.get_mut(key) {
            if health.state == CircuitState::HalfOpen && health.epoch == epoch {
                debug!(endpoint = %key, "probe permit dropped without outcome");
                health.probe_in_flight = false;
            }
        }
    }
}

fn close(health: &mut EndpointHealth) {
    health.consecutive_failures = 0;
    health.trips = 0;
    health.open_until = None;
    health.probe_in_flight = false;
    transition(health, CircuitState::Closed);
}

fn transition(health: &mut EndpointHealth, to: CircuitState) {
    if health.state != to {
        if to == CircuitState::HalfOpen {
            info!(endpoint = %health.key, "circuit half-open, waiting for probe");
        }
        record_counter(
            "circuit_transition_total",
            1,
            &TelemetryLabels::endpoint(health.key.as_str())
                .with("from", health.state.as_str())
                .with("to", to.as_str()),
        );
    }
    health.state = to;
    health.epoch = health.epoch.wrapping_add(1);
}

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Identifies one remote endpoint: provider plus operation class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointKey(String);

impl EndpointKey {
    pub fn new(provider: &str, operation: &str) -> Self {
        Self(format!("{provider}:{operation}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EndpointKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Calls allowed, failures counted.
    Closed,
    /// Calls rejected until the cooldown elapses.
    Open,
    /// One probe call allowed to test recovery.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a gated call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    /// Timeout, rate limit, 5xx: says something about the remote's health.
    TransientFailure,
    /// The remote rejected the request on its merits; not a health signal.
    PermanentFailure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::TransientFailure => "transient_failure",
            Self::PermanentFailure => "permanent_failure",
        }
    }
}

/// Health record of one endpoint. Owned by the gate; callers get snapshots.
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    pub key: EndpointKey,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<Instant>,
    pub open_until: Option<Instant>,
    /// Trips since the circuit last closed; drives cooldown doubling.
    pub trips: u32,
    pub probe_in_flight: bool,
    /// Bumped on every state transition so outcomes of permits issued in an
    /// earlier state are not applied to the current one.
    pub(crate) epoch: u64,
}

impl EndpointHealth {
    pub(crate) fn new(key: EndpointKey) -> Self {
        Self {
            key,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            open_until: None,
            trips: 0,
            probe_in_flight: false,
            epoch: 0,
        }
    }
}

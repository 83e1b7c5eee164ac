use std::time::Duration;

use gsm_circuit::EndpointKey;
use gsm_credentials::CredentialError;
use thiserror::Error;

use crate::CallAttempt;

/// Why an executor invocation failed.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    /// The gate rejected the call; back off without spending retry budget.
    #[error("circuit open for {endpoint}")]
    CircuitOpen {
        endpoint: EndpointKey,
        retry_in: Option<Duration>,
        attempts: Vec<CallAttempt>,
    },
    /// The credential is permanently invalid; needs operator attention.
    #[error(transparent)]
    AuthFailure(CredentialError),
    /// The credential could not be refreshed on the last allowed attempt.
    #[error(transparent)]
    RefreshUnavailable(CredentialError),
    #[error("retries exhausted for {endpoint} after {} attempts: {last_error}", attempts.len())]
    RetriesExhausted {
        endpoint: EndpointKey,
        attempts: Vec<CallAttempt>,
        last_error: String,
    },
    #[error("permanent failure from {endpoint}: {reason}")]
    Permanent {
        endpoint: EndpointKey,
        reason: String,
        attempts: Vec<CallAttempt>,
    },
}

impl ExecError {
    /// True when trying again later might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. } | Self::RefreshUnavailable(_) | Self::RetriesExhausted { .. }
        )
    }

    pub fn attempts(&self) -> &[CallAttempt] {
        match self {
            Self::CircuitOpen { attempts, .. }
            | Self::RetriesExhausted { attempts, .. }
            | Self::Permanent { attempts, .. } => attempts,
            Self::AuthFailure(_) | Self::RefreshUnavailable(_) => &[],
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::AuthFailure(_) => "auth_failure",
            Self::RefreshUnavailable(_) => "refresh_unavailable",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Permanent { .. } => "permanent_failure",
        }
    }
}

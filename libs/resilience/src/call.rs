use std::{future::Future, time::Duration};

use async_trait::async_trait;
use gsm_circuit::Outcome;
use gsm_credentials::Credential;
use thiserror::Error;
use time::OffsetDateTime;

/// How a single remote call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallFailure {
    /// Timeout, rate limit, 5xx: likely to succeed on retry.
    #[error("transient failure: {reason}")]
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },
    /// Bad request, not found, forbidden: retrying cannot help.
    #[error("permanent failure: {reason}")]
    Permanent { reason: String },
    /// The remote refused a credential the cache still considered valid.
    #[error("credential rejected: {reason}")]
    CredentialRejected { reason: String },
}

impl CallFailure {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent {
            reason: reason.into(),
        }
    }

    pub fn credential_rejected(reason: impl Into<String>) -> Self {
        Self::CredentialRejected {
            reason: reason.into(),
        }
    }

    /// Attaches a `Retry-After` style hint to a transient failure.
    pub fn with_retry_after(self, hint: Duration) -> Self {
        match self {
            Self::Transient { reason, .. } => Self::Transient {
                reason,
                retry_after: Some(hint),
            },
            other => other,
        }
    }

    /// Classifies an HTTP status the way most provider APIs use them.
    pub fn from_status(status: u16, body: &str) -> Self {
        let reason = format!("status={status} body={body}");
        match status {
            401 => Self::credential_rejected(reason),
            408 | 425 | 429 | 500..=599 => Self::transient(reason),
            _ => Self::permanent(reason),
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Transient { reason, .. }
            | Self::Permanent { reason }
            | Self::CredentialRejected { reason } => reason,
        }
    }

    /// What the circuit breaker should learn from this failure.
    pub fn health_outcome(&self) -> Outcome {
        match self {
            Self::Transient { .. } => Outcome::TransientFailure,
            Self::Permanent { .. } | Self::CredentialRejected { .. } => Outcome::PermanentFailure,
        }
    }
}

/// One outbound operation the executor may run several times.
#[async_trait]
pub trait OutboundCall: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn call(&self, credential: &Credential) -> Result<Self::Output, CallFailure>;
}

/// Adapter turning an async closure into an [`OutboundCall`].
pub struct FnCall<F>(F);

pub fn call_fn<F>(f: F) -> FnCall<F> {
    FnCall(f)
}

#[async_trait]
impl<F, Fut, T> OutboundCall for FnCall<F>
where
    F: Fn(Credential) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, CallFailure>> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    async fn call(&self, credential: &Credential) -> Result<T, CallFailure> {
        (self.0)(credential.clone()).await
    }
}

/// Record of one attempt inside an executor invocation. Never persisted.
#[derive(Debug, Clone)]
pub struct CallAttempt {
    pub attempt: u32,
    pub started_at: OffsetDateTime,
    pub outcome: Outcome,
    pub latency: Duration,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            CallFailure::from_status(401, ""),
            CallFailure::CredentialRejected { .. }
        ));
        for status in [408, 425, 429, 500, 502, 503, 504] {
            assert!(
                matches!(CallFailure::from_status(status, ""), CallFailure::Transient { .. }),
                "{status}"
            );
        }
        for status in [400, 403, 404, 409, 422] {
            assert!(
                matches!(CallFailure::from_status(status, ""), CallFailure::Permanent { .. }),
                "{status}"
            );
        }
    }

    #[test]
    fn retry_after_only_applies_to_transient() {
        let transient = CallFailure::transient("429").with_retry_after(Duration::from_secs(3));
        assert_eq!(
            transient,
            CallFailure::Transient {
                reason: "429".into(),
                retry_after: Some(Duration::from_secs(3)),
            }
        );
        let permanent = CallFailure::permanent("400").with_retry_after(Duration::from_secs(3));
        assert_eq!(permanent, CallFailure::permanent("400"));
    }

    #[test]
    fn health_outcomes() {
        assert_eq!(
            CallFailure::transient("x").health_outcome(),
            Outcome::TransientFailure
        );
        assert_eq!(
            CallFailure::permanent("x").health_outcome(),
            Outcome::PermanentFailure
        );
        assert_eq!(
            CallFailure::credential_rejected("x").health_outcome(),
            Outcome::PermanentFailure
        );
        assert_eq!(CallFailure::from_status(503, "busy").reason(), "status=503 body=busy");
    }
}

use thiserror::Error;

/// Failure reported by a [`crate::CredentialRefresher`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// The credential (or its refresh grant) is permanently invalid.
    #[error("credential revoked: {0}")]
    Revoked(String),
    /// The identity provider could not be reached or asked us to slow down.
    #[error("refresh unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by [`crate::CredentialCache::acquire`].
///
/// `Clone` because every waiter on a shared refresh receives the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("authentication failed for {key}: {reason}")]
    AuthFailure { key: String, reason: String },
    #[error("credential refresh unavailable for {key}: {reason}")]
    RefreshUnavailable { key: String, reason: String },
}

impl CredentialError {
    pub fn from_refresh(key: &str, err: RefreshError) -> Self {
        match err {
            RefreshError::Revoked(reason) => Self::AuthFailure {
                key: key.to_string(),
                reason,
            },
            RefreshError::Unavailable(reason) => Self::RefreshUnavailable {
                key: key.to_string(),
                reason,
            },
        }
    }

    /// Only `RefreshUnavailable` is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RefreshUnavailable { .. })
    }
}

use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Identifier of a remote platform (`gmail`, `graph`, `slack`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Cache key: one credential per provider and principal (mailbox, bot, tenant).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    pub provider: ProviderId,
    pub principal: String,
}

impl CredentialKey {
    pub fn new(provider: ProviderId, principal: impl Into<String>) -> Self {
        Self {
            provider,
            principal: principal.into(),
        }
    }
}

impl Display for CredentialKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.principal)
    }
}

/// Opaque secret value. `Debug` never prints the content.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Arc<str>);

impl Secret {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Short-lived access credential for one provider principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub provider: ProviderId,
    pub principal: String,
    access: Secret,
    pub expires_at: OffsetDateTime,
    refresh_handle: Option<Secret>,
}

impl Credential {
    pub fn new(
        provider: ProviderId,
        principal: impl Into<String>,
        access: impl Into<Secret>,
        expires_at: OffsetDateTime,
    ) -> Self {
        Self {
            provider,
            principal: principal.into(),
            access: access.into(),
            expires_at,
            refresh_handle: None,
        }
    }

    /// Attaches the value the refresher needs for the next exchange
    /// (for OAuth providers, the refresh token).
    pub fn with_refresh_handle(mut self, handle: impl Into<Secret>) -> Self {
        self.refresh_handle = Some(handle.into());
        self
    }

    pub fn key(&self) -> CredentialKey {
        CredentialKey::new(self.provider.clone(), self.principal.clone())
    }

    pub fn access_value(&self) -> &str {
        self.access.expose()
    }

    pub fn refresh_handle(&self) -> Option<&Secret> {
        self.refresh_handle.as_ref()
    }

    /// True when the credential stays valid for longer than `margin` past `now`.
    pub fn is_fresh_at(&self, now: OffsetDateTime, margin: Duration) -> bool {
        self.expires_at > now + margin
    }

    pub fn is_fresh(&self, margin: Duration) -> bool {
        self.is_fresh_at(OffsetDateTime::now_utc(), margin)
    }

    pub fn remaining_at(&self, now: OffsetDateTime) -> Duration {
        self.expires_at - now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(expires_at: OffsetDateTime) -> Credential {
        Credential::new("gmail".into(), "support@acme.test", "token-1", expires_at)
    }

    #[test]
    fn freshness_respects_margin() {
        let now = OffsetDateTime::now_utc();
        let cred = sample(now + Duration::seconds(90));
        assert!(cred.is_fresh_at(now, Duration::seconds(60)));
        assert!(!cred.is_fresh_at(now, Duration::seconds(90)));
        assert!(!cred.is_fresh_at(now, Duration::seconds(120)));
    }

    #[test]
    fn expired_credential_is_never_fresh() {
        let now = OffsetDateTime::now_utc();
        let cred = sample(now - Duration::seconds(1));
        assert!(!cred.is_fresh_at(now, Duration::ZERO));
        assert!(cred.remaining_at(now).is_negative());
    }

    #[test]
    fn debug_redacts_secrets() {
        let cred = sample(OffsetDateTime::now_utc()).with_refresh_handle("refresh-xyz");
        let rendered = format!("{cred:?}");
        assert!(!rendered.contains("token-1"));
        assert!(!rendered.contains("refresh-xyz"));
        assert!(rendered.contains("Secret(***)"));
        assert_eq!(cred.access_value(), "token-1");
        assert_eq!(cred.refresh_handle().map(Secret::expose), Some("refresh-xyz"));
    }

    #[test]
    fn key_display_joins_provider_and_principal() {
        let cred = sample(OffsetDateTime::now_utc());
        assert_eq!(cred.key().to_string(), "gmail:support@acme.test");
    }
}

use std::sync::Arc;

use async_trait::async_trait;

use crate::{Credential, ProviderId, RefreshError};

/// Capability that exchanges whatever the provider needs for a new credential.
///
/// Implementations own the protocol details of one identity provider; the
/// cache only decides when to call them. `current` is the last cached
/// credential for the key, if any, so refresh handles can be reused.
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh(
        &self,
        provider: &ProviderId,
        principal: &str,
        current: Option<&Credential>,
    ) -> Result<Credential, RefreshError>;
}

/// Shared trait object wrapper.
pub type SharedRefresher = Arc<dyn CredentialRefresher>;

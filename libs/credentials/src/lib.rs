//! Access credential cache for provider integrations.
//!
//! Holds one access credential per `(provider, principal)` pair and refreshes
//! it through an injected [`CredentialRefresher`]. Concurrent callers that find
//! the credential missing or close to expiry share a single in-flight refresh.

pub mod cache;
pub mod credential;
pub mod error;
pub mod refresher;
pub mod token_endpoint;

pub use cache::{CredentialCache, CredentialCacheConfig};
pub use credential::{Credential, CredentialKey, ProviderId, Secret};
pub use error::{CredentialError, RefreshError};
pub use refresher::{CredentialRefresher, SharedRefresher};
pub use token_endpoint::{GrantKind, TokenEndpointRefresher};

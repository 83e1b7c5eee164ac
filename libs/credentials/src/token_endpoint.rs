//! OAuth2 token endpoint exchange usable by most email/CRM/chat providers.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use time::{Duration, OffsetDateTime};
use tracing::{debug, instrument};
use url::Url;

use crate::{Credential, CredentialRefresher, ProviderId, RefreshError, Secret};

/// Token lifetime assumed when the endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;
/// Longest lifetime taken at face value; one year.
const MAX_EXPIRES_IN_SECS: i64 = 365 * 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantKind {
    /// `grant_type=refresh_token`, using the refresh handle of the cached credential.
    RefreshToken,
    /// `grant_type=client_credentials`, for app-level principals (bots, daemons).
    ClientCredentials,
}

impl GrantKind {
    fn as_str(&self) -> &'static str {
        match self {
            GrantKind::RefreshToken => "refresh_token",
            GrantKind::ClientCredentials => "client_credentials",
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// [`CredentialRefresher`] backed by a standard OAuth2 token endpoint.
#[derive(Clone)]
pub struct TokenEndpointRefresher {
    http: Client,
    token_url: Url,
    client_id: String,
    client_secret: Secret,
    scope: Option<String>,
    grant: GrantKind,
}

impl TokenEndpointRefresher {
    pub fn new(
        http: Client,
        token_url: Url,
        client_id: impl Into<String>,
        client_secret: impl Into<Secret>,
        grant: GrantKind,
    ) -> Self {
        Self {
            http,
            token_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: None,
            grant,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    fn form<'a>(&'a self, refresh_token: Option<&'a str>) -> Vec<(&'static str, &'a str)> {
        let mut form = vec![
            ("grant_type", self.grant.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose()),
        ];
        if let Some(token) = refresh_token {
            form.push(("refresh_token", token));
        }
        if let Some(scope) = self.scope.as_deref() {
            form.push(("scope", scope));
        }
        form
    }
}

#[async_trait]
impl CredentialRefresher for TokenEndpointRefresher {
    #[instrument(
        name = "credentials.token_endpoint",
        skip_all,
        fields(provider = %provider, grant = self.grant.as_str())
    )]
    async fn refresh(
        &self,
        provider: &ProviderId,
        principal: &str,
        current: Option<&Credential>,
    ) -> Result<Credential, RefreshError> {
        let refresh_token = match self.grant {
            GrantKind::RefreshToken => Some(
                current
                    .and_then(Credential::refresh_handle)
                    .map(Secret::expose)
                    .ok_or_else(|| {
                        RefreshError::Revoked(format!(
                            "no refresh token on record for {principal}; re-consent required"
                        ))
                    })?,
            ),
            GrantKind::ClientCredentials => None,
        };

        let response = self
            .http
            .post(self.token_url.clone())
            .form(&self.form(refresh_token))
            .send()
            .await
            .map_err(|err| RefreshError::Unavailable(format!("token request failed: {err}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| RefreshError::Unavailable(format!("token response unreadable: {err}")))?;
        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }

        let token =
            parse_token(&body).map_err(|err| RefreshError::Unavailable(format!("{err:#}")))?;
        let expires_at = OffsetDateTime::now_utc() + lifetime(token.expires_in);
        debug!(%expires_at, "token endpoint issued credential");

        let mut credential = Credential::new(
            provider.clone(),
            principal,
            token.access_token,
            expires_at,
        );
        // Providers that do not rotate refresh tokens omit them on refresh.
        let next_handle = token
            .refresh_token
            .map(Secret::from)
            .or_else(|| current.and_then(|cred| cred.refresh_handle().cloned()));
        if let Some(handle) = next_handle {
            credential = credential.with_refresh_handle(handle);
        }
        Ok(credential)
    }
}

fn lifetime(expires_in: Option<i64>) -> Duration {
    Duration::seconds(
        expires_in
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
            .clamp(0, MAX_EXPIRES_IN_SECS),
    )
}

fn parse_token(body: &str) -> anyhow::Result<TokenResponse> {
    let token: TokenResponse =
        serde_json::from_str(body).context("invalid token endpoint response body")?;
    anyhow::ensure!(
        !token.access_token.trim().is_empty(),
        "token endpoint returned an empty access_token"
    );
    Ok(token)
}

/// Maps a non-success token endpoint response onto the refresh taxonomy.
pub(crate) fn classify_failure(status: StatusCode, body: &str) -> RefreshError {
    let detail: TokenErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = detail.error.as_deref().unwrap_or("");
    let message = format!(
        "status={} error={} {}",
        status.as_u16(),
        if code.is_empty() { "-" } else { code },
        detail.error_description.as_deref().unwrap_or("")
    )
    .trim_end()
    .to_string();

    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
        || code == "temporarily_unavailable"
    {
        return RefreshError::Unavailable(message);
    }
    // invalid_grant, invalid_client, unauthorized_client and any other
    // client error mean the same request will keep failing.
    RefreshError::Revoked(message)
}

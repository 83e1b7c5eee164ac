use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    http::{HeaderMap, Request, StatusCode, header::HeaderName},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::webhook::{
    SignatureEncoding, SignatureScheme, Verdict, VerificationKey, WebhookAuthenticator,
    WebhookConfig, WebhookDelivery,
};

/// Largest webhook body buffered for verification.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Request extension configuring [`verify_webhook`] for a route.
#[derive(Clone, Debug)]
pub struct WebhookGuard {
    authenticator: Arc<WebhookAuthenticator>,
    keys: Arc<[VerificationKey]>,
    signature_header: HeaderName,
    timestamp_header: Option<HeaderName>,
    max_body_bytes: usize,
}

impl WebhookGuard {
    pub fn new(
        authenticator: WebhookAuthenticator,
        keys: Vec<VerificationKey>,
        signature_header: HeaderName,
    ) -> Self {
        Self {
            authenticator: Arc::new(authenticator),
            keys: Arc::from(keys),
            signature_header,
            timestamp_header: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_timestamp_header(mut self, header: HeaderName) -> Self {
        self.timestamp_header = Some(header);
        self
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// `X-Slack-Signature` / `X-Slack-Request-Timestamp` deliveries.
    pub fn slack(signing_secrets: &[&str], config: WebhookConfig) -> Self {
        Self::new(
            WebhookAuthenticator::new(SignatureScheme::SlackV0, config),
            signing_secrets.iter().map(VerificationKey::shared).collect(),
            HeaderName::from_static("x-slack-signature"),
        )
        .with_timestamp_header(HeaderName::from_static("x-slack-request-timestamp"))
    }

    /// `Stripe-Signature: t=…,v1=…` deliveries.
    pub fn stripe(endpoint_secrets: &[&str], config: WebhookConfig) -> Self {
        Self::new(
            WebhookAuthenticator::new(SignatureScheme::StripeV1, config),
            endpoint_secrets.iter().map(VerificationKey::shared).collect(),
            HeaderName::from_static("stripe-signature"),
        )
    }

    /// GitHub style `X-Hub-Signature-256: sha256=<hex>` deliveries.
    pub fn hub_sha256(secrets: &[&str], config: WebhookConfig) -> Self {
        Self::new(
            WebhookAuthenticator::new(
                SignatureScheme::HmacSha256 {
                    encoding: SignatureEncoding::Hex,
                    prefix: Some("sha256=".into()),
                },
                config,
            ),
            secrets.iter().map(VerificationKey::shared).collect(),
            HeaderName::from_static("x-hub-signature-256"),
        )
    }

    pub fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Verdict {
        let signature = header_str(headers, &self.signature_header).unwrap_or("");
        let mut delivery = WebhookDelivery::new(body, signature);
        if let Some(ts) = self
            .timestamp_header
            .as_ref()
            .and_then(|name| header_str(headers, name))
        {
            delivery = delivery.with_timestamp(ts);
        }
        self.authenticator.validate(&delivery, &self.keys)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Buffers the body, authenticates it with the route's [`WebhookGuard`] and
/// hands the untouched bytes to the next handler. Unauthenticated deliveries
/// get `401`; routes without a guard get `500` so a missing layer never
/// silently accepts traffic.
pub async fn verify_webhook(req: Request<Body>, next: Next) -> Response {
    let Some(guard) = req.extensions().get::<WebhookGuard>().cloned() else {
        warn!(path = %req.uri().path(), "webhook route has no WebhookGuard configured");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let (parts, body) = req.into_parts();
    let body_bytes = match to_bytes(body, guard.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };

    match guard.verify(&parts.headers, &body_bytes) {
        Verdict::Valid => next.run(Request::from_parts(parts, Body::from(body_bytes))).await,
        Verdict::Invalid(reason) => {
            warn!(path = %parts.uri.path(), %reason, "webhook signature rejected");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Extension, Router, middleware, routing::post};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use time::OffsetDateTime;
    use tower::ServiceExt;

    fn slack_signature(secret: &str, ts: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("v0:{ts}:").as_bytes());
        mac.update(body);
        format!("v0={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn app(guard: Option<WebhookGuard>) -> Router {
        let router = Router::new()
            .route("/events", post(|body: String| async move { body }))
            .layer(middleware::from_fn(verify_webhook));
        match guard {
            Some(guard) => router.layer(Extension(guard)),
            None => router,
        }
    }

    #[tokio::test]
    async fn valid_delivery_reaches_handler_with_original_body() {
        let guard = WebhookGuard::slack(&["s3cret"], WebhookConfig::default());
        let body = r#"{"type":"event_callback"}"#;
        let ts = OffsetDateTime::now_utc().unix_timestamp().to_string();
        let req = Request::post("/events")
            .header("x-slack-request-timestamp", &ts)
            .header("x-slack-signature", slack_signature("s3cret", &ts, body.as_bytes()))
            .body(Body::from(body))
            .unwrap();

        let resp = app(Some(guard)).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let echoed = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(echoed, body.as_bytes());
    }

    #[tokio::test]
    async fn bad_or_missing_signature_is_unauthorized() {
        let guard = WebhookGuard::slack(&["s3cret"], WebhookConfig::default());
        let ts = OffsetDateTime::now_utc().unix_timestamp().to_string();

        let wrong = Request::post("/events")
            .header("x-slack-request-timestamp", &ts)
            .header("x-slack-signature", slack_signature("other", &ts, b"{}"))
            .body(Body::from("{}"))
            .unwrap();
        let resp = app(Some(guard.clone())).oneshot(wrong).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let missing = Request::post("/events").body(Body::from("{}")).unwrap();
        let resp = app(Some(guard)).oneshot(missing).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let guard =
            WebhookGuard::hub_sha256(&["k"], WebhookConfig::default()).with_max_body_bytes(8);
        let req = Request::post("/events")
            .header("x-hub-signature-256", "sha256=00")
            .body(Body::from("0123456789abcdef"))
            .unwrap();
        let resp = app(Some(guard)).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn guard_with_empty_secret_rejects_forged_signature() {
        let guard = WebhookGuard::hub_sha256(&[""], WebhookConfig::default());
        let body = r#"{"action":"opened"}"#;
        let mut mac = Hmac::<Sha256>::new_from_slice(b"").unwrap();
        mac.update(body.as_bytes());
        let forged = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
        let req = Request::post("/events")
            .header("x-hub-signature-256", forged)
            .body(Body::from(body))
            .unwrap();

        let resp = app(Some(guard)).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn route_without_guard_fails_closed() {
        let req = Request::post("/events").body(Body::from("{}")).unwrap();
        let resp = app(None).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn stripe_guard_reads_signature_header() {
        let guard = WebhookGuard::stripe(&["whsec"], WebhookConfig::default());
        let headers = HeaderMap::new();
        assert!(!guard.verify(&headers, b"{}").is_valid());
    }
}

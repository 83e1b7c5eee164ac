//! Inbound webhook authentication for provider deliveries.
//!
//! [`webhook::WebhookAuthenticator`] decides whether a delivery really comes
//! from the provider it claims; [`middleware::verify_webhook`] applies it to
//! axum routes.

pub mod middleware;
pub mod webhook;

pub use middleware::{WebhookGuard, verify_webhook};
pub use webhook::{
    InvalidReason, SignatureEncoding, SignatureScheme, Verdict, VerificationKey,
    WebhookAuthenticator, WebhookConfig, WebhookDelivery,
};

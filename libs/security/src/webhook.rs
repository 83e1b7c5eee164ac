//! Authenticity checks for inbound webhook deliveries.
//!
//! Every check runs over the exact bytes received. Digests are compared in
//! constant time and any malformed input yields [`Verdict::Invalid`]; nothing
//! in this module panics on attacker-controlled data.

use std::{fmt, sync::Arc};

use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use gsm_telemetry::{TelemetryLabels, record_counter};
use hmac::{Hmac, Mac};
use rsa::{
    RsaPublicKey,
    pkcs1::DecodeRsaPublicKey,
    pkcs1v15::{Signature, VerifyingKey},
    pkcs8::DecodePublicKey,
    signature::Verifier,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Accepted distance in seconds between a declared timestamp and now.
    pub tolerance_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            tolerance_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureEncoding {
    Hex,
    Base64,
}

/// How a provider signs its deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignatureScheme {
    /// HMAC-SHA256 over the body, optionally prefixed (`sha256=`).
    HmacSha256 {
        encoding: SignatureEncoding,
        #[serde(default)]
        prefix: Option<String>,
    },
    /// `v0=` + hex HMAC-SHA256 of `v0:{timestamp}:{body}`.
    SlackV0,
    /// `t={timestamp},v1={hex}` header, HMAC-SHA256 of `{timestamp}.{body}`.
    StripeV1,
    /// RSA PKCS#1 v1.5 with SHA-256 over the body, base64 signature.
    RsaSha256,
}

impl SignatureScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureScheme::HmacSha256 { .. } => "hmac_sha256",
            SignatureScheme::SlackV0 => "slack_v0",
            SignatureScheme::StripeV1 => "stripe_v1",
            SignatureScheme::RsaSha256 => "rsa_sha256",
        }
    }
}

/// Key material for one signing key. Providers rotating secrets may have
/// several active at once.
#[derive(Clone)]
pub enum VerificationKey {
    Shared(Arc<[u8]>),
    RsaPublic(Arc<RsaPublicKey>),
}

impl VerificationKey {
    pub fn shared(secret: impl AsRef<[u8]>) -> Self {
        Self::Shared(Arc::from(secret.as_ref()))
    }

    /// Accepts SPKI (`BEGIN PUBLIC KEY`) and PKCS#1 (`BEGIN RSA PUBLIC KEY`) PEM.
    pub fn rsa_public_pem(pem: &str) -> Result<Self> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .context("invalid RSA public key PEM")?;
        Ok(Self::RsaPublic(Arc::new(key)))
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationKey::Shared(_) => f.write_str("VerificationKey::Shared(<redacted>)"),
            VerificationKey::RsaPublic(_) => f.write_str("VerificationKey::RsaPublic(..)"),
        }
    }
}

/// The parts of a delivery that authentication looks at.
#[derive(Debug, Clone, Copy)]
pub struct WebhookDelivery<'a> {
    pub payload: &'a [u8],
    pub signature: &'a str,
    /// Declared send time in unix seconds, when the provider supplies one
    /// outside the signature value.
    pub timestamp: Option<&'a str>,
}

impl<'a> WebhookDelivery<'a> {
    pub fn new(payload: &'a [u8], signature: &'a str) -> Self {
        Self {
            payload,
            signature,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: &'a str) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    MissingSignature,
    MalformedSignature,
    MissingTimestamp,
    MalformedTimestamp,
    TimestampOutOfWindow,
    NoUsableKey,
    Mismatch,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::MissingSignature => "missing_signature",
            InvalidReason::MalformedSignature => "malformed_signature",
            InvalidReason::MissingTimestamp => "missing_timestamp",
            InvalidReason::MalformedTimestamp => "malformed_timestamp",
            InvalidReason::TimestampOutOfWindow => "timestamp_out_of_window",
            InvalidReason::NoUsableKey => "no_usable_key",
            InvalidReason::Mismatch => "mismatch",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid(InvalidReason),
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid)
    }
}

/// Validates deliveries for one provider signing scheme.
#[derive(Debug, Clone)]
pub struct WebhookAuthenticator {
    scheme: SignatureScheme,
    config: WebhookConfig,
}

impl WebhookAuthenticator {
    pub fn new(scheme: SignatureScheme, config: WebhookConfig) -> Self {
        Self { scheme, config }
    }

    pub fn scheme(&self) -> &SignatureScheme {
        &self.scheme
    }

    pub fn validate(&self, delivery: &WebhookDelivery<'_>, keys: &[VerificationKey]) -> Verdict {
        self.validate_at(delivery, keys, OffsetDateTime::now_utc())
    }

    pub fn validate_at(
        &self,
        delivery: &WebhookDelivery<'_>,
        keys: &[VerificationKey],
        now: OffsetDateTime,
    ) -> Verdict {
        let verdict = match self.check(delivery, keys, now) {
            Ok(()) => Verdict::Valid,
            Err(reason) => Verdict::Invalid(reason),
        };
        if let Verdict::Invalid(reason) = verdict {
            debug!(scheme = self.scheme.as_str(), %reason, "webhook delivery rejected");
            record_counter(
                "webhook_rejected_total",
                1,
                &TelemetryLabels::default()
                    .with("scheme", self.scheme.as_str())
                    .with("reason", reason.as_str()),
            );
        }
        verdict
    }

    fn check(
        &self,
        delivery: &WebhookDelivery<'_>,
        keys: &[VerificationKey],
        now: OffsetDateTime,
    ) -> Result<(), InvalidReason> {
        let signature = delivery.signature.trim();
        if signature.is_empty() {
            return Err(InvalidReason::MissingSignature);
        }

        match &self.scheme {
            SignatureScheme::HmacSha256 { encoding, prefix } => {
                if let Some(ts) = delivery.timestamp {
                    self.check_window(ts, now)?;
                }
                let encoded = match prefix.as_deref() {
                    Some(prefix) => signature
                        .strip_prefix(prefix)
                        .ok_or(InvalidReason::MalformedSignature)?,
                    None => signature,
                };
                let provided = decode(encoded, *encoding)?;
                verify_hmac_any(keys, &[delivery.payload], &[provided])
            }
            SignatureScheme::SlackV0 => {
                let ts = delivery.timestamp.ok_or(InvalidReason::MissingTimestamp)?;
                self.check_window(ts, now)?;
                let encoded = signature
                    .strip_prefix("v0=")
                    .ok_or(InvalidReason::MalformedSignature)?;
                let provided = decode(encoded, SignatureEncoding::Hex)?;
                let prefix = format!("v0:{}:", ts.trim());
                verify_hmac_any(keys, &[prefix.as_bytes(), delivery.payload], &[provided])
            }
            SignatureScheme::StripeV1 => {
                let header = parse_stripe_header(signature)?;
                let ts = header.timestamp.ok_or(InvalidReason::MissingTimestamp)?;
                self.check_window(ts, now)?;
                if header.v1.is_empty() {
                    return Err(InvalidReason::MalformedSignature);
                }
                let provided = header
                    .v1
                    .iter()
                    .map(|sig| decode(sig, SignatureEncoding::Hex))
                    .collect::<Result<Vec<_>, _>>()?;
                let prefix = format!("{ts}.");
                verify_hmac_any(keys, &[prefix.as_bytes(), delivery.payload], &provided)
            }
            SignatureScheme::RsaSha256 => {
                if let Some(ts) = delivery.timestamp {
                    self.check_window(ts, now)?;
                }
                let raw = decode(signature, SignatureEncoding::Base64)?;
                let signature = Signature::try_from(raw.as_slice())
                    .map_err(|_| InvalidReason::MalformedSignature)?;
                verify_rsa_any(keys, delivery.payload, &signature)
            }
        }
    }

    fn check_window(&self, timestamp: &str, now: OffsetDateTime) -> Result<(), InvalidReason> {
        let declared: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| InvalidReason::MalformedTimestamp)?;
        let skew = now.unix_timestamp().abs_diff(declared);
        if skew > self.config.tolerance_secs {
            return Err(InvalidReason::TimestampOutOfWindow);
        }
        Ok(())
    }
}

fn decode(value: &str, encoding: SignatureEncoding) -> Result<Vec<u8>, InvalidReason> {
    let value = value.trim();
    let decoded = match encoding {
        SignatureEncoding::Hex => hex::decode(value).ok(),
        SignatureEncoding::Base64 => B64.decode(value).ok(),
    };
    match decoded {
        Some(bytes) if !bytes.is_empty() => Ok(bytes),
        _ => Err(InvalidReason::MalformedSignature),
    }
}

fn verify_hmac_any(
    keys: &[VerificationKey],
    message: &[&[u8]],
    candidates: &[Vec<u8>],
) -> Result<(), InvalidReason> {
    let mut usable = false;
    for key in keys {
        // An empty secret signs nothing anyone could not forge.
        let VerificationKey::Shared(secret) = key else {
            continue;
        };
        if secret.is_empty() {
            continue;
        }
        let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
            continue;
        };
        usable = true;
        for part in message {
            mac.update(part);
        }
        let expected = mac.finalize().into_bytes();
        if candidates
            .iter()
            .any(|candidate| bool::from(expected.as_slice().ct_eq(candidate.as_slice())))
        {
            return Ok(());
        }
    }
    if usable {
        Err(InvalidReason::Mismatch)
    } else {
        Err(InvalidReason::NoUsableKey)
    }
}

fn verify_rsa_any(
    keys: &[VerificationKey],
    payload: &[u8],
    signature: &Signature,
) -> Result<(), InvalidReason> {
    let mut usable = false;
    for key in keys {
        let VerificationKey::RsaPublic(public) = key else {
            continue;
        };
        usable = true;
        let verifier = VerifyingKey::<Sha256>::new(public.as_ref().clone());
        if verifier.verify(payload, signature).is_ok() {
            return Ok(());
        }
    }
    if usable {
        Err(InvalidReason::Mismatch)
    } else {
        Err(InvalidReason::NoUsableKey)
    }
}

struct StripeHeader<'a> {
    timestamp: Option<&'a str>,
    v1: Vec<&'a str>,
}

fn parse_stripe_header(header: &str) -> Result<StripeHeader<'_>, InvalidReason> {
    let mut parsed = StripeHeader {
        timestamp: None,
        v1: Vec::new(),
    };
    for item in header.split(',') {
        let (key, value) = item
            .trim()
            .split_once('=')
            .ok_or(InvalidReason::MalformedSignature)?;
        match key {
            "t" => parsed.timestamp = Some(value),
            "v1" => parsed.v1.push(value),
            // Other schemes (v0 test signatures) are ignored.
            _ => {}
        }
    }
    Ok(parsed)
}

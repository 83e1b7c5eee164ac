//! Reconciliation ledger: remembers which inbound provider messages were
//! already reconciled so redeliveries are recognised as duplicates.
//!
//! Claims are atomic. Two concurrent claims for the same message never both
//! observe a fresh key, which is what makes reconciliation idempotent across
//! workers sharing one backing store.

use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use gsm_telemetry::{TelemetryLabels, record_counter};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;

#[cfg(feature = "nats")]
mod nats;
#[cfg(feature = "nats")]
pub use nats::NatsKvLedger;

/// Identity of one provider message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    pub provider: String,
    pub message_id: String,
}

impl LedgerKey {
    pub fn new(provider: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            message_id: message_id.into(),
        }
    }
}

impl Display for LedgerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.message_id)
    }
}

/// Reference to an event that has been reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub provider: String,
    pub message_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

impl EventRef {
    pub fn key(&self) -> LedgerKey {
        LedgerKey::new(self.provider.clone(), self.message_id.clone())
    }
}

/// Result of [`ReconciliationLedger::claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// First sighting; the caller owns reconciling this event.
    Fresh,
    /// Already claimed by the referenced event.
    Seen(EventRef),
}

/// Contract implemented by ledger stores.
#[async_trait]
pub trait ReconciliationLedger: Send + Sync {
    /// Atomically records `event` unless its key is already present and
    /// unexpired, in which case the earlier record is returned.
    async fn claim(&self, event: &EventRef, ttl: Duration) -> Result<Claim>;

    /// Drops a claim whose reconciliation could not be completed so a
    /// redelivery is processed again.
    async fn release(&self, key: &LedgerKey) -> Result<()>;
}

pub type SharedLedger = Arc<dyn ReconciliationLedger>;

/// Process-local ledger used in tests and single-node deployments.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    inner: Arc<RwLock<HashMap<LedgerKey, (EventRef, OffsetDateTime)>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn purge_expired(&self, now: OffsetDateTime) {
        let mut guard = self.inner.write().await;
        guard.retain(|_, (_, expires)| *expires > now);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl ReconciliationLedger for InMemoryLedger {
    async fn claim(&self, event: &EventRef, ttl: Duration) -> Result<Claim> {
        let key = event.key();
        let now = OffsetDateTime::now_utc();
        let mut guard = self.inner.write().await;
        let claim = match guard.get(&key) {
            Some((earlier, expires)) if *expires > now => Claim::Seen(earlier.clone()),
            _ => {
                guard.insert(key.clone(), (event.clone(), now + ttl));
                Claim::Fresh
            }
        };
        drop(guard);
        record_claim(&key, &claim);
        Ok(claim)
    }

    async fn release(&self, key: &LedgerKey) -> Result<()> {
        self.inner.write().await.remove(key);
        Ok(())
    }
}

pub(crate) fn record_claim(key: &LedgerKey, claim: &Claim) {
    let outcome = match claim {
        Claim::Fresh => "fresh",
        Claim::Seen(_) => "seen",
    };
    if matches!(claim, Claim::Seen(_)) {
        debug!(key = %key, "provider message already reconciled");
    }
    record_counter(
        "reconciliation_ledger_claim_total",
        1,
        &TelemetryLabels::provider(key.provider.as_str()).with("outcome", outcome),
    );
}

/// Settings for a shared ledger bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub namespace: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            namespace: "reconciliation".to_string(),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(ns) = std::env::var("GSM_LEDGER_NAMESPACE") {
            if !ns.trim().is_empty() {
                cfg.namespace = ns.trim().to_string();
            }
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(message_id: &str) -> EventRef {
        EventRef {
            provider: "gmail".into(),
            message_id: message_id.into(),
            received_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn second_claim_returns_first_event() {
        let ledger = InMemoryLedger::new();
        let first = event("<m1@mail>");
        assert_eq!(
            ledger.claim(&first, Duration::from_secs(60)).await.unwrap(),
            Claim::Fresh
        );
        let mut redelivery = event("<m1@mail>");
        redelivery.received_at = first.received_at + time::Duration::seconds(5);
        assert_eq!(
            ledger.claim(&redelivery, Duration::from_secs(60)).await.unwrap(),
            Claim::Seen(first)
        );
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn expired_claims_are_reclaimable() {
        let ledger = InMemoryLedger::new();
        let e = event("m2");
        assert_eq!(ledger.claim(&e, Duration::ZERO).await.unwrap(), Claim::Fresh);
        assert_eq!(ledger.claim(&e, Duration::ZERO).await.unwrap(), Claim::Fresh);

        ledger.purge_expired(OffsetDateTime::now_utc() + time::Duration::seconds(1)).await;
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn released_claims_are_fresh_again() {
        let ledger = InMemoryLedger::new();
        let e = event("m4");
        ledger.claim(&e, Duration::from_secs(60)).await.unwrap();
        ledger.release(&e.key()).await.unwrap();
        assert_eq!(
            ledger.claim(&e, Duration::from_secs(60)).await.unwrap(),
            Claim::Fresh
        );
    }

    #[tokio::test]
    async fn concurrent_claims_admit_exactly_one() {
        let ledger = InMemoryLedger::new();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.claim(&event("m3"), Duration::from_secs(60)).await.unwrap()
            }));
        }
        let mut fresh = 0;
        for handle in handles {
            if handle.await.unwrap() == Claim::Fresh {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
    }

    #[test]
    fn providers_do_not_collide() {
        assert_ne!(LedgerKey::new("gmail", "1"), LedgerKey::new("graph", "1"));
        assert_eq!(LedgerKey::new("gmail", "1").to_string(), "gmail:1");
    }
}

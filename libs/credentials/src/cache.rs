use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use gsm_telemetry::{TelemetryLabels, record_counter};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{debug, instrument, warn};

use crate::{
    Credential, CredentialError, CredentialKey, ProviderId, RefreshError, SharedRefresher,
};

type RefreshOutcome = Result<Credential, CredentialError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialCacheConfig {
    /// Credentials expiring within this many seconds are treated as stale.
    pub safety_margin_secs: u64,
}

impl Default for CredentialCacheConfig {
    fn default() -> Self {
        Self {
            safety_margin_secs: 60,
        }
    }
}

impl CredentialCacheConfig {
    pub fn safety_margin(&self) -> Duration {
        Duration::seconds(self.safety_margin_secs.min(i64::MAX as u64) as i64)
    }
}

/// Cache of access credentials with per-key single-flight refresh.
///
/// Cloning is cheap; clones share the same cache state.
#[derive(Clone)]
pub struct CredentialCache {
    inner: Arc<Inner>,
}

struct Inner {
    margin: Duration,
    refresher: SharedRefresher,
    slots: DashMap<CredentialKey, Slot>,
    next_refresh_id: AtomicU64,
}

#[derive(Default)]
struct Slot {
    cached: Option<Credential>,
    /// Set by `invalidate`; the credential is kept only so its refresh
    /// handle reaches the refresher.
    stale: bool,
    inflight: Option<InflightRefresh>,
}

struct InflightRefresh {
    id: u64,
    outcome: SharedRefresh,
}

impl CredentialCache {
    pub fn new(config: CredentialCacheConfig, refresher: SharedRefresher) -> Self {
        Self {
            inner: Arc::new(Inner {
                margin: config.safety_margin(),
                refresher,
                slots: DashMap::new(),
                next_refresh_id: AtomicU64::new(1),
            }),
        }
    }

    /// Returns a credential valid for longer than the safety margin.
    ///
    /// A fresh cached credential is returned without suspending. Otherwise the
    /// caller joins the in-flight refresh for the key, starting one if none is
    /// running, and receives its outcome.
    #[instrument(
        name = "credentials.acquire",
        skip_all,
        fields(provider = %provider, principal = %principal)
    )]
    pub async fn acquire(
        &self,
        provider: &ProviderId,
        principal: &str,
    ) -> Result<Credential, CredentialError> {
        let key = CredentialKey::new(provider.clone(), principal);
        let pending = {
            // The entry guard locks only this key's shard and is released
            // before awaiting.
            let mut slot = self.inner.slots.entry(key.clone()).or_default();
            let now = OffsetDateTime::now_utc();
            if let Some(cached) = slot
                .cached
                .as_ref()
                .filter(|cred| !slot.stale && cred.is_fresh_at(now, self.inner.margin))
            {
                return Ok(cached.clone());
            }
            match &slot.inflight {
                Some(inflight) => {
                    debug!(refresh_id = inflight.id, "joining in-flight credential refresh");
                    inflight.outcome.clone()
                }
                None => self.start_refresh(&key, &mut slot),
            }
        };
        pending.await
    }

    /// Marks the cached credential stale so the next `acquire` refreshes.
    /// Its refresh handle is still handed to the refresher; a refresh already
    /// in flight is left alone.
    pub fn invalidate(&self, provider: &ProviderId, principal: &str) {
        let key = CredentialKey::new(provider.clone(), principal);
        if let Some(mut slot) = self.inner.slots.get_mut(&key) {
            if slot.cached.is_some() && !slot.stale {
                slot.stale = true;
                debug!(key = %key, "cached credential invalidated");
            }
        }
    }

    /// Forgets everything about the key. The outcome of a refresh that is
    /// still running is delivered to its waiters but not cached.
    pub fn revoke(&self, provider: &ProviderId, principal: &str) {
        let key = CredentialKey::new(provider.clone(), principal);
        if self.inner.slots.remove(&key).is_some() {
            debug!(key = %key, "credential revoked");
        }
    }

    /// Seeds the cache with a credential obtained outside the refresher
    /// (for example right after an interactive OAuth consent).
    pub fn insert(&self, credential: Credential) {
        let mut slot = self.inner.slots.entry(credential.key()).or_default();
        slot.cached = Some(credential);
        slot.stale = false;
    }

    /// Peeks at the cached credential without checking expiry. Invalidated
    /// credentials are not returned.
    pub fn cached(&self, provider: &ProviderId, principal: &str) -> Option<Credential> {
        let key = CredentialKey::new(provider.clone(), principal);
        self.inner
            .slots
            .get(&key)
            .filter(|slot| !slot.stale)
            .and_then(|slot| slot.cached.clone())
    }

    pub fn safety_margin(&self) -> Duration {
        self.inner.margin
    }

    fn start_refresh(&self, key: &CredentialKey, slot: &mut Slot) -> SharedRefresh {
        let id = self.inner.next_refresh_id.fetch_add(1, Ordering::Relaxed);
        let current = slot.cached.clone();
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        // The refresh runs on its own task so an acquirer giving up does not
        // abort the exchange for everybody else.
        let handle = tokio::spawn(async move { inner.run_refresh(task_key, id, current).await });

        let key_label = key.to_string();
        let outcome = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(err) => Err(CredentialError::RefreshUnavailable {
                    key: key_label,
                    reason: format!("refresh task failed: {err}"),
                }),
            }
        }
        .boxed()
        .shared();

        debug!(refresh_id = id, "starting credential refresh");
        slot.inflight = Some(InflightRefresh {
            id,
            outcome: outcome.clone(),
        });
        outcome
    }
}

impl Inner {
    async fn run_refresh(
        &self,
        key: CredentialKey,
        id: u64,
        current: Option<Credential>,
    ) -> RefreshOutcome {
        let key_label = key.to_string();
        let result = self
            .refresher
            .refresh(&key.provider, &key.principal, current.as_ref())
            .await
            .and_then(|cred| self.check_refreshed(cred));

        let outcome_label = match &result {
            Ok(_) => "ok",
            Err(RefreshError::Revoked(_)) => "revoked",
            Err(RefreshError::Unavailable(_)) => "unavailable",
        };
        record_counter(
            "credentials_refresh_total",
            1,
            &TelemetryLabels::provider(key.provider.as_str()).with("outcome", outcome_label),
        );

        // A revoke (or revoke then re-acquire) replaced this refresh; its
        // waiters still get the outcome but the slot is not touched.
        if let Some(mut slot) = self.slots.get_mut(&key) {
            if slot.inflight.as_ref().map(|inflight| inflight.id) == Some(id) {
                slot.inflight = None;
                if let Ok(cred) = &result {
                    slot.cached = Some(cred.clone());
                    slot.stale = false;
                }
            }
        }

        match result {
            Ok(cred) => {
                debug!(key = %key_label, expires_at = %cred.expires_at, "credential refreshed");
                Ok(cred)
            }
            Err(err) => {
                // Whatever was cached before stays cached.
                warn!(key = %key_label, error = %err, "credential refresh failed");
                Err(CredentialError::from_refresh(&key_label, err))
            }
        }
    }

    fn check_refreshed(&self, cred: Credential) -> Result<Credential, RefreshError> {
        if cred.is_fresh_at(OffsetDateTime::now_utc(), self.margin) {
            Ok(cred)
        } else {
            Err(RefreshError::Unavailable(format!(
                "refreshed credential expires at {} which is inside the safety margin",
                cred.expires_at
            )))
        }
    }
}

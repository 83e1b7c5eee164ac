use std::{fmt::Display, str::FromStr};

use gsm_circuit::{BreakerConfig, CircuitGate};
use gsm_credentials::{CredentialCache, CredentialCacheConfig, SharedRefresher};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{ResilientExecutor, RetryPolicy};

/// All tunables of the outbound resilience stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    pub credentials: CredentialCacheConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryPolicy,
}

impl ResilienceSettings {
    /// Reads overrides from `GSM_*` environment variables. Unparseable
    /// values are logged and replaced by the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        read(&lookup, "GSM_CREDENTIAL_MARGIN_SECS", &mut settings.credentials.safety_margin_secs);
        read(&lookup, "GSM_RETRY_MAX_ATTEMPTS", &mut settings.retry.max_attempts);
        read(&lookup, "GSM_RETRY_BASE_MS", &mut settings.retry.base_delay_ms);
        read(&lookup, "GSM_RETRY_MAX_MS", &mut settings.retry.max_delay_ms);
        read(&lookup, "GSM_BREAKER_THRESHOLD", &mut settings.breaker.failure_threshold);
        read(&lookup, "GSM_BREAKER_COOLDOWN_MS", &mut settings.breaker.cooldown_base_ms);
        read(&lookup, "GSM_BREAKER_COOLDOWN_CAP_MS", &mut settings.breaker.cooldown_cap_ms);
        settings
    }

    /// Builds an executor with a fresh cache and gate.
    pub fn build(&self, refresher: SharedRefresher) -> ResilientExecutor {
        ResilientExecutor::new(
            CredentialCache::new(self.credentials.clone(), refresher),
            CircuitGate::new(self.breaker.clone()),
            self.retry.clone(),
        )
    }
}

fn read<F, T>(lookup: &F, name: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = lookup(name) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(err) => warn!(
            var = name,
            value = %raw,
            error = %err,
            default = %target,
            "ignoring invalid setting"
        ),
    }
}

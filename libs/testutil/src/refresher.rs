use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use gsm_credentials::{Credential, CredentialRefresher, ProviderId, RefreshError};
use time::{Duration, OffsetDateTime};

/// Refresher that hands out `token-1`, `token-2`, … and fails when told to.
#[derive(Debug)]
pub struct ScriptedRefresher {
    calls: AtomicUsize,
    lifetime: Duration,
    delay: Option<std::time::Duration>,
    failures: Mutex<VecDeque<RefreshError>>,
}

impl Default for ScriptedRefresher {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            lifetime: Duration::hours(1),
            delay: None,
            failures: Mutex::new(VecDeque::new()),
        }
    }
}

impl ScriptedRefresher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lifetime of issued credentials.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Time every refresh takes; uses tokio time so paused tests stay fast.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queues a failure; queued failures are returned before any success.
    pub fn fail_next(&self, err: RefreshError) {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl CredentialRefresher for ScriptedRefresher {
    async fn refresh(
        &self,
        provider: &ProviderId,
        principal: &str,
        _current: Option<&Credential>,
    ) -> Result<Credential, RefreshError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self
            .failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(Credential::new(
            provider.clone(),
            principal,
            format!("token-{n}"),
            OffsetDateTime::now_utc() + self.lifetime,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_failures_come_first() {
        let refresher = ScriptedRefresher::new();
        refresher.fail_next(RefreshError::Unavailable("503".into()));
        let provider = ProviderId::new("graph");
        assert!(refresher.refresh(&provider, "bot", None).await.is_err());
        let cred = refresher.refresh(&provider, "bot", None).await.unwrap();
        assert_eq!(cred.access_value(), "token-2");
        assert_eq!(refresher.calls(), 2);
    }
}

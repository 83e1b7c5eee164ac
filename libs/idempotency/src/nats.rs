use std::time::Duration;

use anyhow::{Context, Result};
use async_nats::jetstream::{
    Context as JsContext,
    context::KeyValueErrorKind,
    kv::{self, CreateErrorKind},
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use tracing::{instrument, warn};

use crate::{Claim, EventRef, LedgerKey, ReconciliationLedger, record_claim};

/// JetStream KV backed ledger shared by every worker of a deployment.
pub struct NatsKvLedger {
    bucket: kv::Store,
}

impl NatsKvLedger {
    /// Opens the bucket, creating it when missing.
    pub async fn new(js: &JsContext, namespace: &str) -> Result<Self> {
        let bucket = match js.get_key_value(namespace).await {
            Ok(store) => store,
            Err(err) if err.kind() == KeyValueErrorKind::GetBucket => js
                .create_key_value(kv::Config {
                    bucket: namespace.to_string(),
                    history: 1,
                    max_age: Duration::from_secs(0),
                    ..Default::default()
                })
                .await
                .with_context(|| format!("create JetStream KV bucket {namespace}"))?,
            Err(err) => anyhow::bail!("reconciliation ledger init failed: {err}"),
        };
        Ok(Self { bucket })
    }
}

/// KV keys only allow a restricted alphabet; provider message ids (for
/// example RFC 5322 Message-IDs) do not fit it.
fn storage_key(key: &LedgerKey) -> String {
    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(key.provider.as_bytes()),
        URL_SAFE_NO_PAD.encode(key.message_id.as_bytes())
    )
}

#[async_trait]
impl ReconciliationLedger for NatsKvLedger {
    #[instrument(name = "ledger.claim", skip_all, fields(key = %event.key()))]
    async fn claim(&self, event: &EventRef, ttl: Duration) -> Result<Claim> {
        anyhow::ensure!(
            !event.message_id.trim().is_empty(),
            "cannot claim an event without a message id"
        );
        let key = event.key();
        let stored = storage_key(&key);
        let payload = serde_json::to_vec(event)?;
        let ttl = ttl.max(Duration::from_secs(1));

        // The earlier record can expire between a failed create and the read;
        // one more create settles that race.
        for _ in 0..2 {
            match self
                .bucket
                .create_with_ttl(&stored, payload.clone().into(), ttl)
                .await
            {
                Ok(_) => {
                    record_claim(&key, &Claim::Fresh);
                    return Ok(Claim::Fresh);
                }
                Err(err) if err.kind() == CreateErrorKind::AlreadyExists => {
                    let existing = self
                        .bucket
                        .get(&stored)
                        .await
                        .with_context(|| format!("read ledger key {key}"))?;
                    let Some(bytes) = existing else {
                        continue;
                    };
                    let claim = match serde_json::from_slice::<EventRef>(&bytes) {
                        Ok(earlier) => Claim::Seen(earlier),
                        Err(err) => {
                            warn!(error = %err, "unreadable ledger record, treating as seen");
                            Claim::Seen(event.clone())
                        }
                    };
                    record_claim(&key, &claim);
                    return Ok(claim);
                }
                Err(err) => {
                    return Err(anyhow::anyhow!(err)
                        .context(format!("claim ledger key {key} with ttl {}s", ttl.as_secs())));
                }
            }
        }
        anyhow::bail!("ledger key {key} kept expiring while being claimed")
    }

    async fn release(&self, key: &LedgerKey) -> Result<()> {
        self.bucket
            .delete(storage_key(key))
            .await
            .with_context(|| format!("release ledger key {key}"))?;
        Ok(())
    }
}

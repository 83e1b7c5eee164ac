use std::time::Duration;

use gsm_idempotency::{Claim, SharedLedger};
use gsm_telemetry::{TelemetryLabels, record_counter};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{InboundEvent, ReconcileError, Reconciliation, ReferenceMatcher, SharedTicketLookup};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Pattern recognising ticket reference tokens; capture group 1 is the token.
    pub reference_pattern: String,
    /// How long a reconciled provider message id is remembered.
    pub ledger_ttl_hours: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            reference_pattern: r"\[([A-Za-z][A-Za-z0-9]*-[0-9]+)\]".to_string(),
            ledger_ttl_hours: 36,
        }
    }
}

impl ReconcilerConfig {
    pub fn ledger_ttl(&self) -> Duration {
        Duration::from_secs(self.ledger_ttl_hours.max(1).saturating_mul(3600))
    }
}

/// Classifies inbound events against existing conversation threads.
///
/// Every event is first claimed in the reconciliation ledger; a provider
/// message that was already reconciled is reported as a duplicate no matter
/// what else it carries. Fresh events are then matched, first hit wins:
///
/// 1. correlation hint via [`crate::TicketLookup::find_by_conversation_id`],
/// 2. reference tokens in subject then body via
///    [`crate::TicketLookup::find_by_reference`],
/// 3. [`crate::TicketLookup::find_recent_duplicate`],
/// 4. otherwise a new thread.
#[derive(Clone)]
pub struct ThreadReconciler {
    lookup: SharedTicketLookup,
    ledger: SharedLedger,
    matcher: ReferenceMatcher,
    ledger_ttl: Duration,
}

impl ThreadReconciler {
    pub fn new(
        config: ReconcilerConfig,
        lookup: SharedTicketLookup,
        ledger: SharedLedger,
    ) -> Result<Self, ReconcileError> {
        Ok(Self {
            matcher: ReferenceMatcher::new(&config.reference_pattern)?,
            ledger_ttl: config.ledger_ttl(),
            lookup,
            ledger,
        })
    }

    #[instrument(
        name = "threading.reconcile",
        skip_all,
        fields(provider = %event.provider, message_id = %event.provider_message_id)
    )]
    pub async fn reconcile(&self, event: &InboundEvent) -> Result<Reconciliation, ReconcileError> {
        if event.provider_message_id.trim().is_empty() {
            // Without an id there is nothing to deduplicate on.
            warn!("event has no provider message id, skipping duplicate detection");
            let result = self.classify(event, false).await?;
            self.record_result(event, &result);
            return Ok(result);
        }

        let event_ref = event.event_ref();
        let claim = self
            .ledger
            .claim(&event_ref, self.ledger_ttl)
            .await
            .map_err(ReconcileError::Ledger)?;

        let result = match claim {
            Claim::Seen(earlier) => Reconciliation::DuplicateOf(earlier),
            Claim::Fresh => match self.classify(event, true).await {
                Ok(result) => result,
                Err(err) => {
                    // Unclaim so a redelivery gets a real classification.
                    if let Err(release_err) = self.ledger.release(&event_ref.key()).await {
                        warn!(error = %release_err, "failed to release ledger claim");
                    }
                    return Err(err);
                }
            },
        };

        self.record_result(event, &result);
        Ok(result)
    }

    fn record_result(&self, event: &InboundEvent, result: &Reconciliation) {
        debug!(result = result.as_str(), "event reconciled");
        record_counter(
            "threading_result_total",
            1,
            &TelemetryLabels::provider(event.provider.as_str()).with("result", result.as_str()),
        );
    }

    async fn classify(
        &self,
        event: &InboundEvent,
        detect_duplicates: bool,
    ) -> Result<Reconciliation, ReconcileError> {
        if let Some(hint) = event
            .correlation_hint
            .as_deref()
            .map(str::trim)
            .filter(|hint| !hint.is_empty())
        {
            if let Some(ticket) = self
                .lookup
                .find_by_conversation_id(&event.provider, hint)
                .await
                .map_err(ReconcileError::Lookup)?
            {
                return Ok(Reconciliation::ContinuesThread(ticket));
            }
            debug!(hint, "correlation hint did not resolve");
        }

        let texts = [event.subject.as_deref(), event.body_text.as_deref()];
        for text in texts.into_iter().flatten() {
            for token in self.matcher.tokens(text) {
                if let Some(ticket) = self
                    .lookup
                    .find_by_reference(token)
                    .await
                    .map_err(ReconcileError::Lookup)?
                {
                    return Ok(Reconciliation::ContinuesThread(ticket));
                }
                debug!(token, "reference token did not resolve");
            }
        }

        if detect_duplicates {
            if let Some(earlier) = self
                .lookup
                .find_recent_duplicate(&event.provider, &event.provider_message_id)
                .await
                .map_err(ReconcileError::Lookup)?
            {
                return Ok(Reconciliation::DuplicateOf(earlier));
            }
        }

        Ok(Reconciliation::NewThread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_ttl_is_at_least_an_hour() {
        let cfg = ReconcilerConfig {
            ledger_ttl_hours: 0,
            ..Default::default()
        };
        assert_eq!(cfg.ledger_ttl(), Duration::from_secs(3600));
        assert_eq!(
            ReconcilerConfig::default().ledger_ttl(),
            Duration::from_secs(36 * 3600)
        );
    }
}

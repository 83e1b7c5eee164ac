use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use gsm_idempotency::EventRef;

use crate::TicketRef;

/// Read-only queries against the ticket store.
#[async_trait]
pub trait TicketLookup: Send + Sync {
    /// Ticket whose conversation carries the provider-native identifier.
    async fn find_by_conversation_id(
        &self,
        provider: &str,
        conversation_id: &str,
    ) -> Result<Option<TicketRef>>;

    /// Ticket with the given reference code (the text between brackets).
    async fn find_by_reference(&self, reference: &str) -> Result<Option<TicketRef>>;

    /// Earlier event for the same provider message, if the store kept one.
    async fn find_recent_duplicate(
        &self,
        provider: &str,
        provider_message_id: &str,
    ) -> Result<Option<EventRef>>;
}

pub type SharedTicketLookup = Arc<dyn TicketLookup>;

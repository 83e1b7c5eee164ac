use std::{collections::HashMap, sync::Arc};

use anyhow::{Result, bail};
use async_trait::async_trait;
use gsm_threading::{EventRef, TicketLookup, TicketRef};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    by_conversation: HashMap<(String, String), TicketRef>,
    by_reference: HashMap<String, TicketRef>,
    processed: HashMap<(String, String), EventRef>,
    unavailable: bool,
}

/// Ticket store fake backing [`TicketLookup`] with hash maps.
#[derive(Clone, Default)]
pub struct InMemoryTickets {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryTickets {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn link_conversation(
        &self,
        provider: &str,
        conversation_id: &str,
        ticket: TicketRef,
    ) {
        self.tables
            .write()
            .await
            .by_conversation
            .insert((provider.to_string(), conversation_id.to_string()), ticket);
    }

    pub async fn add_reference(&self, reference: &str, ticket: TicketRef) {
        self.tables
            .write()
            .await
            .by_reference
            .insert(reference.to_string(), ticket);
    }

    pub async fn mark_processed(&self, event: EventRef) {
        self.tables
            .write()
            .await
            .processed
            .insert((event.provider.clone(), event.message_id.clone()), event);
    }

    /// Makes every query fail until switched back.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.tables.write().await.unavailable = unavailable;
    }
}

#[async_trait]
impl TicketLookup for InMemoryTickets {
    async fn find_by_conversation_id(
        &self,
        provider: &str,
        conversation_id: &str,
    ) -> Result<Option<TicketRef>> {
        let tables = self.tables.read().await;
        if tables.unavailable {
            bail!("ticket store unavailable");
        }
        Ok(tables
            .by_conversation
            .get(&(provider.to_string(), conversation_id.to_string()))
            .cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<TicketRef>> {
        let tables = self.tables.read().await;
        if tables.unavailable {
            bail!("ticket store unavailable");
        }
        Ok(tables.by_reference.get(reference).cloned())
    }

    async fn find_recent_duplicate(
        &self,
        provider: &str,
        provider_message_id: &str,
    ) -> Result<Option<EventRef>> {
        let tables = self.tables.read().await;
        if tables.unavailable {
            bail!("ticket store unavailable");
        }
        Ok(tables
            .processed
            .get(&(provider.to_string(), provider_message_id.to_string()))
            .cloned())
    }
}

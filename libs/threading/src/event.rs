use bytes::Bytes;
use gsm_idempotency::EventRef;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One authenticated inbound message delivery.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub provider: String,
    pub provider_message_id: String,
    pub payload: Bytes,
    pub signature: Option<String>,
    pub received_at: OffsetDateTime,
    /// Provider-native conversation or thread identifier.
    pub correlation_hint: Option<String>,
    pub subject: Option<String>,
    /// Plain-text body, searched for ticket references after the subject.
    pub body_text: Option<String>,
}

impl InboundEvent {
    pub fn new(
        provider: impl Into<String>,
        provider_message_id: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            provider: provider.into(),
            provider_message_id: provider_message_id.into(),
            payload: payload.into(),
            signature: None,
            received_at: OffsetDateTime::now_utc(),
            correlation_hint: None,
            subject: None,
            body_text: None,
        }
    }

    pub fn with_correlation_hint(mut self, hint: impl Into<String>) -> Self {
        self.correlation_hint = Some(hint.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_body_text(mut self, text: impl Into<String>) -> Self {
        self.body_text = Some(text.into());
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn received_at(mut self, at: OffsetDateTime) -> Self {
        self.received_at = at;
        self
    }

    pub fn event_ref(&self) -> EventRef {
        EventRef {
            provider: self.provider.clone(),
            message_id: self.provider_message_id.clone(),
            received_at: self.received_at,
        }
    }
}

/// Opaque handle to a ticket owned by the ticket store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketRef {
    pub id: String,
    /// Human facing reference code such as `INC-1042`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl TicketRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    NewThread,
    ContinuesThread(TicketRef),
    DuplicateOf(EventRef),
}

impl Reconciliation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reconciliation::NewThread => "new_thread",
            Reconciliation::ContinuesThread(_) => "continues_thread",
            Reconciliation::DuplicateOf(_) => "duplicate",
        }
    }
}

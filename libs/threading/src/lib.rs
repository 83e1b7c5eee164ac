//! Thread reconciliation for inbound provider messages.
//!
//! Given an authenticated [`InboundEvent`], [`ThreadReconciler`] decides
//! whether it continues a known ticket, starts a new thread or repeats an
//! event that was already handled. The answer is advisory; ticket lifecycle
//! decisions stay with the caller.

mod error;
mod event;
mod lookup;
mod reconciler;
mod reference;

pub use error::ReconcileError;
pub use event::{InboundEvent, Reconciliation, TicketRef};
pub use gsm_idempotency::EventRef;
pub use lookup::{SharedTicketLookup, TicketLookup};
pub use reconciler::{ReconcilerConfig, ThreadReconciler};
pub use reference::ReferenceMatcher;

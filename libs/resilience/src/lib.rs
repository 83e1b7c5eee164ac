//! Resilient execution of outbound provider calls.
//!
//! [`ResilientExecutor`] wraps a single logical operation with the circuit
//! breaker gate, the credential cache and bounded exponential backoff.

mod call;
mod error;
mod executor;
mod retry;
mod settings;

pub use call::{CallAttempt, CallFailure, FnCall, OutboundCall, call_fn};
pub use error::ExecError;
pub use executor::{CallTarget, ResilientExecutor};
pub use retry::RetryPolicy;
pub use settings::ResilienceSettings;

//! Circuit breaker gate for remote endpoints.
//!
//! Every distinct endpoint key (provider + operation class) owns one
//! [`EndpointHealth`] record that decides whether calls are attempted at all.
//!
//! ```text
//!   Closed ──(threshold consecutive transient failures)──▶ Open
//!     ▲                                                      │
//!     │ probe success                           cooldown     │
//!     │                                         elapsed      ▼
//!     └──────────────────────── HalfOpen ◀───────────────────┘
//!                                  │
//!                                  └──(probe failure, longer cooldown)──▶ Open
//! ```
//!
//! ```no_run
//! use gsm_circuit::{BreakerConfig, CircuitGate, EndpointKey, Outcome};
//!
//! # async fn example() {
//! let gate = CircuitGate::new(BreakerConfig::default());
//! let key = EndpointKey::new("graph", "send_mail");
//! if let Ok(permit) = gate.allow(&key) {
//!     // perform the call, then report how it went
//!     gate.record_outcome(permit, Outcome::Success);
//! }
//! # }
//! ```

mod config;
mod gate;
mod health;

pub use config::BreakerConfig;
pub use gate::{CircuitGate, CircuitOpen, Permit};
pub use health::{CircuitState, EndpointHealth, EndpointKey, Outcome};

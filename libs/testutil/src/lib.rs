//! In-memory fakes for collaborators of the resilience and threading crates.

mod refresher;
mod tickets;

pub use refresher::ScriptedRefresher;
pub use tickets::InMemoryTickets;

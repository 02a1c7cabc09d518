//! The persistence boundary.
//!
//! The engine talks to the authoritative backend only through
//! [`PersistenceService`]. [`MemoryBackend`] is an in-process implementation
//! used by tests and the CLI demo commands.

mod connectivity;
mod memory;
mod service;

pub use connectivity::Connectivity;
pub use memory::MemoryBackend;
#[cfg(test)]
pub use service::MockPersistenceService;
pub use service::{BatchSyncResult, PersistenceService};

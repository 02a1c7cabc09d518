//! Offline operation queue and drain coordination.
//!
//! Operations that could not reach the backend are persisted in SQLite and
//! replayed by the engine when connectivity returns:
//! - one entry per `(type, id)`, later operations merge into earlier ones
//! - creates are replayed parents-first
//! - only one drain runs at a time, with at most one follow-up pass

pub mod coordinator;
pub mod operation;
pub mod queue;

pub use coordinator::{order_creates, DrainReport, ExecutionResult, SyncCoordinator};
pub use operation::{key_for, DeletePayload, MovePayload, OperationType, PendingOperation};
pub use queue::{OperationQueue, QueueStats, SaveOutcome};

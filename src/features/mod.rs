//! Engine components.
//!
//! - `ordering`: order-index arithmetic
//! - `store`: canonical item array with atomic mutators
//! - `reconcile`: pending items and the tree merge
//! - `sync`: durable offline queue and drain coordination
//! - `engine`: the optimistic operations tying it all together

pub mod engine;
pub mod ordering;
pub mod reconcile;
pub mod store;
pub mod sync;

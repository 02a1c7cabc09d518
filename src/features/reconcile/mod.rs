//! Reconciliation of canonical, live-edit and pending state into the tree the
//! UI renders.

mod merge;
mod pending;

pub use merge::{merge_tree, MergeOptions, MergeOutcome, Promotion};
pub use pending::{PendingItem, PendingItems};

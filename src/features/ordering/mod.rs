//! Order-index allocation for sibling ordering.
//!
//! Indices are plain integers; the backend enforces uniqueness among siblings
//! and the engine retries with a fresh index when it loses a race.

mod allocator;

pub use allocator::{append_index, between, insert_index, max_sibling_index, now_millis, MAX_ORDER};

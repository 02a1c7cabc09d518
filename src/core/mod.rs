//! Core abstractions for treesync.
//!
//! Item types, identifier helpers, the hierarchy builder and the shared retry
//! policy. Nothing in here talks to the network or the database.

pub mod hierarchy;
mod ids;
mod item;
mod retry;

pub use hierarchy::{build_hierarchy, TreeArena};
pub use ids::{is_temp_id, new_client_id, new_temp_id, TEMP_PREFIX};
pub use item::{
    find_in_forest, flatten_forest, HierarchicalItem, Item, ItemField, ItemPatch, ItemType,
    NewItem,
};
pub use retry::RetryPolicy;

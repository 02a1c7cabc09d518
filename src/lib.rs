//! treesync - optimistic sync for hierarchical workspaces
//!
//! This crate keeps a local tree of items consistent with an authoritative
//! backend. Mutations are applied optimistically, persisted to a durable
//! offline queue when the backend is unreachable and reconciled with the
//! canonical state once it answers.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod features;
pub mod output;
pub mod storage;

pub use backend::{Connectivity, MemoryBackend, PersistenceService};
pub use cli::args::{Cli, Commands, OutputFormat};
pub use error::{Result, SyncError};
pub use features::engine::SyncEngine;

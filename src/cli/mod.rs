//! Command-line interface for treesync.

pub mod args;
pub mod commands;

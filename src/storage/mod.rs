//! Storage layer for treesync.
//!
//! `SQLite` persistence for the offline operation queue, so queued mutations
//! survive restarts.

mod database;
mod migrations;

pub use database::Database;

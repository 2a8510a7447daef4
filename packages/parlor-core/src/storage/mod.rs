//! # Storage Module
//!
//! SQLite persistence for conversations, messages, flags and reactions.
//!
//! The stores in this crate never open connections themselves. They hold a
//! clone of [`Database`] and run their statements through it, so one process
//! has exactly one connection and one write lock.

mod database;
mod schema;

pub use database::{Database, DatabaseConfig};
pub use schema::SCHEMA_VERSION;

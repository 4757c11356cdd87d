//! # parlor-store
//!
//! SQLite persistence for Parlor: the append-only message log and the group
//! membership tables.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every record. Async
//! callers are expected to run these on a blocking thread.

pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;

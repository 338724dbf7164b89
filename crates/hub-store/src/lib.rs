//! # hub-store
//!
//! Persistence for the notification and chat core, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers per table: the
//! notification log and its unread counter, chat messages and reactions,
//! users (identity lookup and presence flag), chat groups, and the task and
//! invoice rows the scheduled sweeps flip.

pub mod database;
pub mod groups;
pub mod invoices;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod notifications;
pub mod reactions;
pub mod tasks;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;

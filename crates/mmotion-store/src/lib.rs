//! Durable job store.
//!
//! This crate provides:
//! - The `jobs` table on embedded SQLite (point reads/writes only)
//! - Lifecycle transitions with terminal-state enforcement
//! - Embedded migrations

pub mod error;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::JobStore;

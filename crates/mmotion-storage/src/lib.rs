//! Object storage adapter.
//!
//! This crate provides:
//! - Byte and file upload/download against any S3-compatible endpoint
//! - Deterministic key derivation for staged inputs and job results

pub mod client;
pub mod error;
pub mod keys;

pub use client::{ObjectStore, ObjectStoreConfig};
pub use error::{StorageError, StorageResult};
pub use keys::{input_key, is_staged_input_key, result_key, OUTPUTS_PREFIX, UPLOADS_PREFIX};

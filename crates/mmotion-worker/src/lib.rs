//! Media transformation worker.
//!
//! This crate provides:
//! - Job executor with bounded slots and crash-recovery claims
//! - Staged processing pipeline with a pluggable transform
//! - Durable, monotonic progress checkpoints
//! - Ack-after-commit finalization and poison-message containment
//! - Graceful shutdown

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod processor;

pub use checkpoint::Checkpointer;
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use pipeline::{PassThroughTransform, Transform, TransformError};
pub use processor::ProcessingContext;

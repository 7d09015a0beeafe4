//! Redis Streams job queue.
//!
//! This crate provides:
//! - Job-start publishing via Redis Streams
//! - Consumer-group consumption with explicit ack and
//!   reject-without-requeue (poison containment)
//! - Pending-claim redelivery for crashed workers
//! - Progress events via Redis Pub/Sub

pub mod error;
pub mod job;
pub mod progress;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::JobStartMessage;
pub use progress::{ProgressChannel, ProgressEvent};
pub use queue::{JobQueue, QueueConfig};

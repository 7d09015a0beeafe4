//! Shared domain types for the MangaMotion job pipeline.
//!
//! This crate provides:
//! - Job identifiers, status enum and the canonical job record
//! - Structured job failure details
//! - Pipeline stage names used for progress checkpoints
//! - WebSocket message envelope for live progress

pub mod job;
pub mod ws;

pub use job::{Job, JobError, JobErrorKind, JobId, JobParameters, JobStatus, JobStatusView, Stage};
pub use ws::WsMessage;

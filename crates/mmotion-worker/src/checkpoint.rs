//! Durable progress checkpoints.
//!
//! A checkpoint is written after each pipeline milestone: first to the job
//! store (the source of truth), then broadcast on the progress channel.
//! The store write must succeed; the broadcast is best-effort, since any
//! dropped event is superseded by the next and the terminal value is
//! always readable from the store.

use std::sync::atomic::{AtomicU8, Ordering};

use tracing::warn;

use mmotion_models::{JobId, JobStatus, Stage};
use mmotion_queue::ProgressChannel;
use mmotion_store::JobStore;

use crate::error::WorkerResult;

/// Emits monotonic progress checkpoints for one execution attempt.
pub struct Checkpointer<'a> {
    store: &'a JobStore,
    progress: &'a ProgressChannel,
    job_id: &'a JobId,
    last: AtomicU8,
}

impl<'a> Checkpointer<'a> {
    pub fn new(store: &'a JobStore, progress: &'a ProgressChannel, job_id: &'a JobId) -> Self {
        Self {
            store,
            progress,
            job_id,
            last: AtomicU8::new(0),
        }
    }

    /// Record a checkpoint at `pct` for `stage`.
    ///
    /// Progress is clamped to be non-decreasing within this attempt, so an
    /// out-of-order milestone can never move an observer backwards.
    pub async fn tick(&self, stage: Stage, pct: u8) -> WorkerResult<()> {
        let pct = self.clamp(pct);

        self.store.update_progress(self.job_id, pct).await?;

        if let Err(e) = self
            .progress
            .checkpoint(self.job_id, JobStatus::Processing, pct, Some(stage))
            .await
        {
            warn!(job_id = %self.job_id, "Progress broadcast failed: {}", e);
        }
        Ok(())
    }

    /// Last checkpointed percentage.
    pub fn current(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }

    fn clamp(&self, pct: u8) -> u8 {
        let pct = pct.min(100);
        self.last.fetch_max(pct, Ordering::SeqCst).max(pct)
    }
}

/// Progress milestones of the staged pipeline.
pub mod milestones {
    /// Input fetched into scratch storage.
    pub const DOWNLOADED: u8 = 10;
    /// Input validated and normalized.
    pub const PREPROCESSED: u8 = 15;
    /// Transformation started.
    pub const TRANSFORM_START: u8 = 35;
    /// Transformation finished.
    pub const TRANSFORM_END: u8 = 65;
    /// Output artifact assembled.
    pub const ASSEMBLED: u8 = 75;
    /// Result uploaded to the object store.
    pub const UPLOADED: u8 = 90;

    /// Map a transform-reported fraction (0-100 of the transform stage)
    /// into the overall progress window.
    pub fn transform_progress(fraction: u8) -> u8 {
        let fraction = fraction.min(100) as u32;
        let span = (TRANSFORM_END - TRANSFORM_START) as u32;
        TRANSFORM_START + (fraction * span / 100) as u8
    }
}

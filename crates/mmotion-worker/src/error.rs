//! Worker error types.

use thiserror::Error;

use mmotion_models::{JobError, JobErrorKind, Stage};

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Transform failed at {stage}: {message}")]
    TransformFailed { stage: Stage, message: String },

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// Executor lifecycle, not a job failure: the slot semaphore closed
    /// because the executor is shutting down.
    #[error("Executor shutting down: {0}")]
    Shutdown(String),

    #[error("Store error: {0}")]
    Store(#[from] mmotion_store::StoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] mmotion_storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] mmotion_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn transform_failed(stage: Stage, msg: impl Into<String>) -> Self {
        Self::TransformFailed {
            stage,
            message: msg.into(),
        }
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    /// Convert into the structured failure detail stored on the job row.
    ///
    /// I/O during fetch/upload is classified like execution failure for
    /// the caller: one attempt, then terminal.
    pub fn to_job_error(&self) -> JobError {
        match self {
            WorkerError::DownloadFailed(msg) => {
                JobError::new(JobErrorKind::Download, msg).at_stage(Stage::Download)
            }
            WorkerError::Storage(e) => JobError::new(JobErrorKind::Download, e.to_string()),
            WorkerError::TransformFailed { stage, message } => {
                JobError::new(JobErrorKind::Execution, message).at_stage(*stage)
            }
            WorkerError::UploadFailed(msg) => {
                JobError::new(JobErrorKind::Upload, msg).at_stage(Stage::Upload)
            }
            other => JobError::new(JobErrorKind::Execution, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_classification() {
        let err = WorkerError::transform_failed(Stage::Transform, "boom");
        let job_err = err.to_job_error();
        assert_eq!(job_err.kind, JobErrorKind::Execution);
        assert_eq!(job_err.stage, Some(Stage::Transform));

        let err = WorkerError::download_failed("no such key");
        assert_eq!(err.to_job_error().kind, JobErrorKind::Download);

        let err = WorkerError::upload_failed("bucket gone");
        assert_eq!(err.to_job_error().kind, JobErrorKind::Upload);
    }

    #[test]
    fn test_shutdown_is_not_a_stage_failure() {
        let err = WorkerError::Shutdown("job slots closed".to_string());
        assert!(err.to_string().contains("shutting down"));
        assert_eq!(err.to_job_error().stage, None);
    }
}

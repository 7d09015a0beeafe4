//! The job-start message carried by the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mmotion_models::{JobId, JobParameters};

/// Message published once per accepted job. Holding the unacknowledged
/// message is what grants a worker exclusive write access to the job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStartMessage {
    /// Job ID, matching the store row created at submission.
    pub job_id: JobId,
    /// Submitting principal.
    pub owner: String,
    /// Object key of the staged input bytes.
    pub input_ref: String,
    /// Transformation parameters, passed through verbatim.
    pub parameters: JobParameters,
    /// When the job was accepted.
    pub created_at: DateTime<Utc>,
}

impl JobStartMessage {
    pub fn new(
        job_id: JobId,
        owner: impl Into<String>,
        input_ref: impl Into<String>,
        parameters: JobParameters,
    ) -> Self {
        Self {
            job_id,
            owner: owner.into(),
            input_ref: input_ref.into(),
            parameters,
            created_at: Utc::now(),
        }
    }
}

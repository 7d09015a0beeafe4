//! Job submission flow.
//!
//! Admission ordering matters: a submission refused by rate limiting or
//! validation leaves no trace anywhere. The job row is created only after
//! the input bytes are durably staged, and the queue publish happens only
//! after the row exists. A publish failure marks the row failed so no job
//! is ever stranded in `queued` without a queue message.

use tracing::{info, warn};

use mmotion_models::{Job, JobError, JobErrorKind, JobParameters};
use mmotion_queue::JobStartMessage;
use mmotion_storage::keys;

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Input carried by a submission: either raw bytes to stage, or a
/// reference to an object staged earlier (e.g. by a direct upload).
#[derive(Debug)]
pub enum SubmittedInput {
    Bytes {
        filename: Option<String>,
        content_type: String,
        data: Vec<u8>,
    },
    StagedKey(String),
}

/// One parsed submission request.
#[derive(Debug)]
pub struct Submission {
    pub owner: String,
    pub input: SubmittedInput,
    pub parameters: JobParameters,
}

/// Validate a submission against the configured policy.
pub fn validate(submission: &Submission, config: &ApiConfig) -> Result<(), ApiError> {
    match &submission.input {
        SubmittedInput::Bytes { data, .. } => {
            if data.is_empty() {
                return Err(ApiError::validation("input is empty"));
            }
            if data.len() > config.max_upload_size {
                return Err(ApiError::validation(format!(
                    "input exceeds maximum size of {} bytes",
                    config.max_upload_size
                )));
            }
        }
        SubmittedInput::StagedKey(key) => {
            if !keys::is_staged_input_key(key) {
                return Err(ApiError::validation("invalid staged input key"));
            }
        }
    }

    validate_parameters(&submission.parameters, &config.required_parameters)
}

/// Parameters must be a JSON object (or absent) and carry every required key.
pub fn validate_parameters(
    parameters: &JobParameters,
    required: &[String],
) -> Result<(), ApiError> {
    match &parameters.0 {
        serde_json::Value::Null | serde_json::Value::Object(_) => {}
        _ => return Err(ApiError::validation("parameters must be a JSON object")),
    }

    for key in required {
        if parameters.0.get(key).is_none() {
            return Err(ApiError::validation(format!(
                "missing required parameter '{key}'"
            )));
        }
    }

    Ok(())
}

/// Run the full submission flow and return the created job.
pub async fn submit(state: &AppState, submission: Submission) -> ApiResult<Job> {
    // Admission control first: a refused submission writes nothing.
    if !state.limiter.check(&submission.owner).await {
        warn!(owner = %submission.owner, "Submission rate limited");
        metrics::record_rate_limit_hit();
        metrics::record_submission_rejected("rate_limited");
        return Err(ApiError::RateLimited);
    }

    if let Err(e) = validate(&submission, &state.config) {
        metrics::record_submission_rejected("validation");
        return Err(e);
    }

    // Stage the input bytes before any job row exists.
    let input_ref = match submission.input {
        SubmittedInput::Bytes {
            filename,
            content_type,
            data,
        } => {
            let key = keys::input_key(&submission.owner, filename.as_deref());
            state.storage.put_bytes(&key, data, &content_type).await?;
            key
        }
        SubmittedInput::StagedKey(key) => {
            if !state.storage.exists(&key).await? {
                metrics::record_submission_rejected("validation");
                return Err(ApiError::validation("staged input does not exist"));
            }
            key
        }
    };

    let job = state
        .store
        .create(&submission.owner, &input_ref, &submission.parameters)
        .await?;

    let message = JobStartMessage::new(
        job.id.clone(),
        &job.owner,
        &job.input_ref,
        job.parameters.clone(),
    );

    if let Err(e) = state.queue.publish(&message).await {
        // The row exists but no worker will ever see it; fail it now so
        // status reads report the truth instead of a forever-queued job.
        let job_error = JobError::new(JobErrorKind::Enqueue, e.to_string());
        if let Err(store_err) = state.store.mark_failed(&job.id, &job_error).await {
            warn!(job_id = %job.id, "Failed to mark enqueue failure: {}", store_err);
        }
        metrics::record_submission_rejected("enqueue");
        return Err(ApiError::Queue(e));
    }

    metrics::record_job_submitted();
    info!(job_id = %job.id, owner = %job.owner, "Job accepted");

    Ok(job)
}

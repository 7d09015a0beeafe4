//! Job submission and status handlers.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;

use mmotion_models::{JobId, JobParameters, JobStatusView};

use crate::auth::Owner;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::submission::{self, SubmittedInput, Submission};

/// Submit a new job.
///
/// Accepts `multipart/form-data` with either a `file` part carrying the
/// input bytes or an `object_key` part referencing a previously staged
/// object, plus an optional `parameters` part holding a JSON object.
pub async fn submit_job(
    State(state): State<AppState>,
    Owner(owner): Owner,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<JobStatusView>)> {
    let mut input: Option<SubmittedInput> = None;
    let mut parameters = JobParameters::empty();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().map(|s| s.to_string());
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read file: {e}")))?
                    .to_vec();
                input = Some(SubmittedInput::Bytes {
                    filename,
                    content_type,
                    data,
                });
            }
            Some("object_key") => {
                let key = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read object_key: {e}")))?;
                input = Some(SubmittedInput::StagedKey(key));
            }
            Some("parameters") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read parameters: {e}")))?;
                let value: serde_json::Value = serde_json::from_str(&text)
                    .map_err(|e| ApiError::validation(format!("parameters is not valid JSON: {e}")))?;
                parameters = JobParameters(value);
            }
            _ => {}
        }
    }

    let input = input
        .ok_or_else(|| ApiError::bad_request("either a file or an object_key is required"))?;

    let job = submission::submit(
        &state,
        Submission {
            owner,
            input,
            parameters,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(job.status_view())))
}

/// Read the current status of a job.
///
/// Reads are owner-scoped: another owner's job answers 404, not 403, so
/// the endpoint never confirms that a job id exists.
pub async fn get_job_status(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusView>> {
    let job_id = JobId::from_string(&job_id);
    let job = state.store.get(&job_id).await?;

    if job.owner != owner {
        return Err(ApiError::not_found(format!("job {job_id}")));
    }

    Ok(Json(job.status_view()))
}

//! Job record, identifiers and lifecycle types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle status.
///
/// `Queued` is assigned at submission; a worker moves the job to
/// `Processing` and finally to one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting in the queue
    #[default]
    Queued,
    /// Job is actively being processed
    Processing,
    /// Job completed successfully
    Completed,
    /// Job failed with an error
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates permitted).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Parse from the stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Broad classification of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// Input could not be fetched from the object store
    Download,
    /// The transformation itself failed
    Execution,
    /// Result could not be uploaded to the object store
    Upload,
    /// Queue publish failed after the job row was created
    Enqueue,
}

impl JobErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobErrorKind::Download => "download",
            JobErrorKind::Execution => "execution",
            JobErrorKind::Upload => "upload",
            JobErrorKind::Enqueue => "enqueue",
        }
    }
}

/// Structured failure detail stored on a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
    /// Pipeline stage the failure occurred in, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stage: None,
        }
    }

    pub fn at_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

/// Opaque transformation parameters, stored verbatim and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct JobParameters(pub serde_json::Value);

impl JobParameters {
    pub fn empty() -> Self {
        Self(serde_json::Value::Object(serde_json::Map::new()))
    }

    /// True when no parameters were submitted.
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_json::Value::Null => true,
            serde_json::Value::Object(m) => m.is_empty(),
            _ => false,
        }
    }

    /// Look up a string parameter by key.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }
}

/// Pipeline stage names, reported with progress checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Fetching input bytes into scratch storage
    Download,
    /// Validating and normalizing the input
    Preprocess,
    /// Running the content transformation
    Transform,
    /// Assembling the final output artifact
    Assemble,
    /// Uploading the result to the object store
    Upload,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Preprocess => "preprocess",
            Stage::Transform => "transform",
            Stage::Assemble => "assemble",
            Stage::Upload => "upload",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The canonical job record, mirrored 1:1 by the `jobs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub owner: String,
    pub status: JobStatus,
    pub progress: u8,
    pub input_ref: String,
    pub result_ref: Option<String>,
    pub error: Option<JobError>,
    pub parameters: JobParameters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Point-in-time status view served to clients.
    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            result_ref: self.result_ref.clone(),
            error: self.error.clone(),
        }
    }
}

/// Status read shape: same truth for polling and the WebSocket snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    #[serde(rename = "jobId")]
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(rename = "resultRef", skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_roundtrip() {
        for s in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(JobStatus::parse("stale"), None);
    }

    #[test]
    fn test_parameters_empty() {
        assert!(JobParameters::empty().is_empty());
        assert!(JobParameters(serde_json::Value::Null).is_empty());
        let p = JobParameters(serde_json::json!({"style": "noir"}));
        assert!(!p.is_empty());
        assert_eq!(p.get_str("style"), Some("noir"));
    }

    #[test]
    fn test_status_view_serialization() {
        let view = JobStatusView {
            job_id: JobId::from_string("job-1"),
            status: JobStatus::Completed,
            progress: 100,
            result_ref: Some("outputs/job-1/output".to_string()),
            error: None,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["progress"], 100);
        assert_eq!(json["resultRef"], "outputs/job-1/output");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_job_error_serialization() {
        let err = JobError::new(JobErrorKind::Execution, "transform exploded")
            .at_stage(Stage::Transform);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "execution");
        assert_eq!(json["stage"], "transform");
    }
}

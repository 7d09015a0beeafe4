//! WebSocket message envelope for live progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobStatus, Stage};

/// Messages exchanged over the progress WebSocket.
///
/// The client opens the socket and sends `subscribe`; the server replies
/// with `progress` events until the job reaches a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Client request to follow a job.
    Subscribe {
        #[serde(rename = "jobId")]
        job_id: JobId,
    },

    /// One progress checkpoint (or the snapshot sent on subscribe).
    Progress {
        #[serde(rename = "jobId")]
        job_id: JobId,
        status: JobStatus,
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<Stage>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Protocol or lookup error; the server closes after sending this.
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl WsMessage {
    /// Create a progress event.
    pub fn progress(job_id: JobId, status: JobStatus, progress: u8) -> Self {
        WsMessage::Progress {
            job_id,
            status,
            progress: progress.min(100),
            stage: None,
            message: None,
        }
    }

    /// Attach the pipeline stage.
    pub fn with_stage(mut self, s: Stage) -> Self {
        if let WsMessage::Progress { ref mut stage, .. } = self {
            *stage = Some(s);
        }
        self
    }

    /// Attach a human-readable note.
    pub fn with_message(mut self, m: impl Into<String>) -> Self {
        if let WsMessage::Progress { ref mut message, .. } = self {
            *message = Some(m.into());
        }
        self
    }

    /// Create an error message.
    pub fn error(message: impl Into<String>) -> Self {
        WsMessage::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// True when this event carries a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WsMessage::Progress { status, .. } if status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_wire_shape() {
        let msg: WsMessage =
            serde_json::from_str(r#"{"type":"subscribe","jobId":"job-7"}"#).unwrap();
        match msg {
            WsMessage::Subscribe { job_id } => assert_eq!(job_id.as_str(), "job-7"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_progress_wire_shape() {
        let msg = WsMessage::progress(JobId::from_string("job-7"), JobStatus::Processing, 35)
            .with_stage(Stage::Transform);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["jobId"], "job-7");
        assert_eq!(json["status"], "processing");
        assert_eq!(json["progress"], 35);
        assert_eq!(json["stage"], "transform");
        assert!(json.get("message").is_none());
    }

    #[test]
    fn test_progress_clamped() {
        let msg = WsMessage::progress(JobId::new(), JobStatus::Processing, 250);
        match msg {
            WsMessage::Progress { progress, .. } => assert_eq!(progress, 100),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_terminal_detection() {
        let done = WsMessage::progress(JobId::new(), JobStatus::Completed, 100);
        assert!(done.is_terminal());
        let tick = WsMessage::progress(JobId::new(), JobStatus::Processing, 50);
        assert!(!tick.is_terminal());
    }
}

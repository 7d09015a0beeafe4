//! Progress events via Redis Pub/Sub.
//!
//! The channel is the broadcast backplane between workers and API
//! instances: a worker publishes one event per checkpoint, every API
//! instance with a subscriber for that job relays it. Delivery is
//! best-effort; a dropped event is superseded by the next, and the
//! terminal value is always recoverable from the job store.

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use mmotion_models::{JobId, JobStatus, Stage, WsMessage};

use crate::error::QueueResult;

/// Progress event published to Redis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Job ID
    pub job_id: JobId,
    /// Progress message, already in wire shape
    pub message: WsMessage,
}

/// Channel for publishing/subscribing to progress events.
pub struct ProgressChannel {
    client: redis::Client,
}

impl ProgressChannel {
    /// Create a new progress channel.
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Create from the `REDIS_URL` environment variable.
    pub fn from_env() -> QueueResult<Self> {
        let url = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::new(&url)
    }

    /// Get the channel name for a job.
    pub fn channel_name(job_id: &JobId) -> String {
        format!("progress:{}", job_id)
    }

    /// Publish a progress event.
    pub async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(&event.job_id);
        let payload = serde_json::to_string(event)?;

        debug!("Publishing progress event to {}", channel);
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }

    /// Publish a checkpoint.
    pub async fn checkpoint(
        &self,
        job_id: &JobId,
        status: JobStatus,
        progress: u8,
        stage: Option<Stage>,
    ) -> QueueResult<()> {
        let mut message = WsMessage::progress(job_id.clone(), status, progress);
        if let Some(stage) = stage {
            message = message.with_stage(stage);
        }
        self.publish(&ProgressEvent {
            job_id: job_id.clone(),
            message,
        })
        .await
    }

    /// Publish the terminal completed event.
    pub async fn completed(&self, job_id: &JobId) -> QueueResult<()> {
        self.checkpoint(job_id, JobStatus::Completed, 100, None).await
    }

    /// Publish the terminal failed event.
    pub async fn failed(&self, job_id: &JobId, progress: u8, detail: impl Into<String>) -> QueueResult<()> {
        let message = WsMessage::progress(job_id.clone(), JobStatus::Failed, progress)
            .with_message(detail);
        self.publish(&ProgressEvent {
            job_id: job_id.clone(),
            message,
        })
        .await
    }

    /// Subscribe to progress events for a job.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
        job_id: &JobId,
    ) -> QueueResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = ProgressEvent> + Send>>>
    {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = Self::channel_name(job_id);

        pubsub.subscribe(&channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name() {
        let id = JobId::from_string("job-42");
        assert_eq!(ProgressChannel::channel_name(&id), "progress:job-42");
    }

    #[test]
    fn test_event_roundtrip() {
        let id = JobId::from_string("job-42");
        let event = ProgressEvent {
            job_id: id.clone(),
            message: WsMessage::progress(id, JobStatus::Processing, 65)
                .with_stage(Stage::Transform),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ProgressEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.job_id.as_str(), "job-42");
        match back.message {
            WsMessage::Progress { progress, stage, .. } => {
                assert_eq!(progress, 65);
                assert_eq!(stage, Some(Stage::Transform));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}

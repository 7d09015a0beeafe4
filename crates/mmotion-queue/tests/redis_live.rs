//! Redis integration tests. Run against a live instance with
//! `cargo test -p mmotion-queue -- --ignored`.

use std::time::Duration;

use mmotion_models::{JobId, JobParameters, JobStatus};
use mmotion_queue::{JobQueue, JobStartMessage, ProgressChannel};

fn message(owner: &str) -> JobStartMessage {
    JobStartMessage::new(
        JobId::new(),
        owner,
        format!("uploads/{owner}/test-input.png"),
        JobParameters::empty(),
    )
}

/// Test Redis connection and basic operations.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_connection() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let len = queue.len().await.expect("Failed to get queue length");
    println!("Queue length: {}", len);
}

/// Test publish, consume and ack cycle.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_publish_consume_ack() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let msg = message("test_user_123");
    let job_id = msg.job_id.clone();

    let message_id = queue.publish(&msg).await.expect("Failed to publish");
    println!("Published job {} with message ID {}", job_id, message_id);

    let consumer_name = "test-consumer";
    let jobs = queue
        .consume(consumer_name, 1000, 1)
        .await
        .expect("Failed to consume");

    assert_eq!(jobs.len(), 1);
    let (msg_id, consumed) = &jobs[0];
    assert_eq!(consumed.job_id, job_id);
    assert_eq!(consumed.input_ref, msg.input_ref);

    queue.ack(msg_id).await.expect("Failed to ack");
    println!("Job {} acknowledged", job_id);
}

/// Test reject-without-requeue moves the message to the rejected stream.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_reject_without_requeue() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let msg = message("test_reject_user");
    let job_id = msg.job_id.clone();

    queue.publish(&msg).await.expect("Failed to publish");

    let consumer_name = "test-reject-consumer";
    let jobs = queue
        .consume(consumer_name, 1000, 1)
        .await
        .expect("Failed to consume");
    assert!(!jobs.is_empty());
    let (message_id, consumed) = &jobs[0];
    assert_eq!(consumed.job_id, job_id);

    queue
        .reject(message_id, consumed, "Test error")
        .await
        .expect("Failed to reject");

    let rejected = queue
        .rejected_len()
        .await
        .expect("Failed to get rejected length");
    assert!(rejected > 0);

    // Rejected messages are acked on the main stream: nothing redelivered.
    let redelivered = queue
        .consume(consumer_name, 500, 1)
        .await
        .expect("Failed to consume");
    assert!(redelivered.iter().all(|(_, m)| m.job_id != job_id));
}

/// Test progress channel pub/sub.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_progress_channel() {
    use futures_util::StreamExt;

    dotenvy::dotenv().ok();

    let progress = ProgressChannel::from_env().expect("Failed to create progress channel");
    let subscriber_channel =
        ProgressChannel::from_env().expect("Failed to create subscriber channel");

    let job_id = JobId::new();

    let job_id_clone = job_id.clone();
    let subscriber = tokio::spawn(async move {
        let mut stream = subscriber_channel
            .subscribe(&job_id_clone)
            .await
            .expect("Failed to subscribe");
        let mut events = Vec::new();

        let timeout = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(event) = stream.next().await {
                events.push(event);
                if events.len() >= 2 {
                    break;
                }
            }
        });

        let _ = timeout.await;
        events
    });

    // Give the subscriber time to connect
    tokio::time::sleep(Duration::from_millis(100)).await;

    progress
        .checkpoint(&job_id, JobStatus::Processing, 35, None)
        .await
        .ok();
    progress.completed(&job_id).await.ok();

    let events = subscriber.await.expect("Subscriber task failed");
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.job_id == job_id));
    assert!(events.last().map(|e| e.message.is_terminal()).unwrap_or(false));
}

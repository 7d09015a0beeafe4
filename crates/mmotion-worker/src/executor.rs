//! Job executor.
//!
//! Runs N independent worker slots bounded by a semaphore; each slot
//! consumes one message at a time. Holding the unacknowledged message is
//! the only mutual exclusion on a job. A background task periodically
//! claims messages left pending by crashed workers, which restarts those
//! jobs from scratch on this worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use mmotion_queue::{JobQueue, JobStartMessage};

use crate::error::{WorkerError, WorkerResult};
use crate::pipeline::Transform;
use crate::processor::{process_job, record_failure, ProcessingContext};

/// Job executor that processes jobs from the queue.
pub struct JobExecutor<T: Transform> {
    ctx: Arc<ProcessingContext<T>>,
    queue: Arc<JobQueue>,
    job_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl<T: Transform> JobExecutor<T> {
    /// Create a new job executor.
    pub fn new(ctx: ProcessingContext<T>, queue: JobQueue) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(ctx.config.max_concurrent_jobs));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            ctx: Arc::new(ctx),
            queue: Arc::new(queue),
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Start the executor.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} slots",
            self.consumer_name, self.ctx.config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_task = self.spawn_claim_task();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        // Back off on queue errors
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        let _ = tokio::time::timeout(self.ctx.config.shutdown_timeout, self.wait_for_jobs()).await;

        info!("Job executor stopped");
        Ok(())
    }

    /// Periodically claim messages left pending by crashed workers.
    fn spawn_claim_task(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let ctx = Arc::clone(&self.ctx);
        let semaphore = Arc::clone(&self.job_semaphore);
        let consumer_name = self.consumer_name.clone();
        let interval = self.ctx.config.claim_interval;
        let min_idle_ms = self.ctx.config.claim_min_idle.as_millis() as u64;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match queue.claim_pending(&consumer_name, min_idle_ms, 5).await {
                            Ok(messages) if !messages.is_empty() => {
                                info!("Claimed {} pending jobs", messages.len());
                                for (message_id, msg) in messages {
                                    let ctx = Arc::clone(&ctx);
                                    let queue = Arc::clone(&queue);
                                    let permit = match semaphore.clone().acquire_owned().await {
                                        Ok(p) => p,
                                        Err(_) => break,
                                    };
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        execute_job(ctx, queue, message_id, msg).await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!("Failed to claim pending jobs: {}", e);
                            }
                        }
                    }
                }
            }
        })
    }

    /// Consume and dispatch jobs from the queue.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            // All slots busy
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let messages = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;

        if messages.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} messages from queue", messages.len());

        for (message_id, msg) in messages {
            let ctx = Arc::clone(&self.ctx);
            let queue = Arc::clone(&self.queue);
            let permit = self
                .job_semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::Shutdown("job slots closed".to_string()))?;

            tokio::spawn(async move {
                let _permit = permit;
                execute_job(ctx, queue, message_id, msg).await;
            });
        }

        Ok(())
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            if self.job_semaphore.available_permits() == self.ctx.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Execute a single delivered message inside one slot.
///
/// Success acks only after the terminal store write has committed inside
/// `process_job`. Failure marks the job failed and rejects the message
/// without requeue; no error escapes the slot.
async fn execute_job<T: Transform>(
    ctx: Arc<ProcessingContext<T>>,
    queue: Arc<JobQueue>,
    message_id: String,
    msg: JobStartMessage,
) {
    let job_id = msg.job_id.clone();

    match process_job(&ctx, &msg).await {
        Ok(_) => {
            if let Err(e) = queue.ack(&message_id).await {
                // The job is already terminal in the store; redelivery of
                // this message will be refused there and re-rejected here.
                error!(job_id = %job_id, "Failed to ack message: {}", e);
            }
        }
        Err(e) => {
            error!(job_id = %job_id, "Job failed: {}", e);
            record_failure(&ctx, &msg, &e).await;
            if let Err(reject_err) = queue.reject(&message_id, &msg, &e.to_string()).await {
                error!(job_id = %job_id, "Failed to reject message: {}", reject_err);
            }
        }
    }
}

//! Per-message job processing.
//!
//! One invocation handles one delivered job-start message end to end:
//! mark processing, fetch input into scratch, run the staged pipeline,
//! upload the result, commit the terminal store write. The caller acks
//! the queue message only after this returns Ok, so a crash between the
//! terminal write and the ack can at worst cause a redelivered,
//! already-terminal job - never a lost completed one.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use mmotion_models::Stage;
use mmotion_queue::{JobStartMessage, ProgressChannel};
use mmotion_storage::{result_key, ObjectStore};
use mmotion_store::JobStore;

use crate::checkpoint::{milestones, Checkpointer};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::pipeline::{assemble, preprocess, Transform};

/// Everything a worker slot needs to process jobs.
pub struct ProcessingContext<T: Transform> {
    pub config: WorkerConfig,
    pub store: JobStore,
    pub storage: ObjectStore,
    pub progress: ProgressChannel,
    pub transform: Arc<T>,
}

impl<T: Transform> ProcessingContext<T> {
    pub fn new(
        config: WorkerConfig,
        store: JobStore,
        storage: ObjectStore,
        progress: ProgressChannel,
        transform: T,
    ) -> Self {
        Self {
            config,
            store,
            storage,
            progress,
            transform: Arc::new(transform),
        }
    }
}

/// Process one delivered message. Returns the result key on success.
pub async fn process_job<T: Transform>(
    ctx: &ProcessingContext<T>,
    msg: &JobStartMessage,
) -> WorkerResult<String> {
    let job_id = &msg.job_id;
    info!(job_id = %job_id, input_ref = %msg.input_ref, "Processing job");

    // A redelivered message for a still-processing job lands here too;
    // mark_processing resets progress so the attempt restarts from scratch.
    ctx.store.mark_processing(job_id).await?;

    let scratch = PathBuf::from(&ctx.config.work_dir).join(job_id.as_str());
    tokio::fs::create_dir_all(&scratch).await?;

    let result = run_pipeline(ctx, msg, &scratch).await;

    if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
        warn!(job_id = %job_id, "Failed to clean scratch dir: {}", e);
    }

    result
}

async fn run_pipeline<T: Transform>(
    ctx: &ProcessingContext<T>,
    msg: &JobStartMessage,
    scratch: &std::path::Path,
) -> WorkerResult<String> {
    let job_id = &msg.job_id;
    let cp = Checkpointer::new(&ctx.store, &ctx.progress, job_id);

    // Stage: download
    let input_path = scratch.join("input");
    ctx.storage
        .get_file(&msg.input_ref, &input_path)
        .await
        .map_err(|e| WorkerError::download_failed(e.to_string()))?;
    cp.tick(Stage::Download, milestones::DOWNLOADED).await?;

    // Stage: preprocess
    let preprocessed = preprocess(&input_path, scratch).await?;
    cp.tick(Stage::Preprocess, milestones::PREPROCESSED).await?;

    // Stage: transform, off the async executor
    cp.tick(Stage::Transform, milestones::TRANSFORM_START).await?;
    let transformed = scratch.join("transformed");
    run_transform(ctx, msg, &cp, &preprocessed, &transformed).await?;
    cp.tick(Stage::Transform, milestones::TRANSFORM_END).await?;

    // Stage: assemble
    let output_path = scratch.join("output");
    assemble(&transformed, &output_path).await?;
    cp.tick(Stage::Assemble, milestones::ASSEMBLED).await?;

    // Stage: upload, under the key derived from the job id
    let key = result_key(job_id);
    ctx.storage
        .put_file(&key, &output_path, "application/octet-stream")
        .await
        .map_err(|e| WorkerError::upload_failed(e.to_string()))?;
    cp.tick(Stage::Upload, milestones::UPLOADED).await?;

    // Terminal commit. The queue ack happens after this returns.
    ctx.store.mark_completed(job_id, &key).await?;
    if let Err(e) = ctx.progress.completed(job_id).await {
        warn!(job_id = %job_id, "Completed broadcast failed: {}", e);
    }

    info!(job_id = %job_id, result_ref = %key, "Job completed");
    Ok(key)
}

async fn run_transform<T: Transform>(
    ctx: &ProcessingContext<T>,
    msg: &JobStartMessage,
    cp: &Checkpointer<'_>,
    input: &std::path::Path,
    output: &std::path::Path,
) -> WorkerResult<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let transform = Arc::clone(&ctx.transform);
    let input = input.to_path_buf();
    let output = output.to_path_buf();
    let parameters = msg.parameters.clone();

    debug!(job_id = %msg.job_id, transform = transform.name(), "Running transform");

    let handle = tokio::task::spawn_blocking(move || {
        transform.run(&input, &parameters, &output, &tx)
    });

    // Relay transform milestones into the overall progress window. The
    // sender drops when the blocking task finishes, ending the loop.
    let mut tick_err: Option<WorkerError> = None;
    while let Some(fraction) = rx.recv().await {
        if tick_err.is_none() {
            if let Err(e) = cp
                .tick(Stage::Transform, milestones::transform_progress(fraction))
                .await
            {
                tick_err = Some(e);
            }
        }
    }

    let result = handle
        .await
        .map_err(|e| WorkerError::transform_failed(Stage::Transform, e.to_string()))?;
    result.map_err(|e| WorkerError::transform_failed(Stage::Transform, e.0))?;

    match tick_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Record a failed attempt: terminal store write plus a final broadcast.
///
/// Never returns an error; failure handling must not escape the slot.
pub async fn record_failure<T: Transform>(
    ctx: &ProcessingContext<T>,
    msg: &JobStartMessage,
    err: &WorkerError,
) {
    let job_id = &msg.job_id;
    let job_error = err.to_job_error();

    if let Err(e) = ctx.store.mark_failed(job_id, &job_error).await {
        error!(job_id = %job_id, "Failed to mark job failed: {}", e);
    }

    let progress = match ctx.store.get(job_id).await {
        Ok(job) => job.progress,
        Err(_) => 0,
    };
    if let Err(e) = ctx
        .progress
        .failed(job_id, progress, job_error.to_string())
        .await
    {
        warn!(job_id = %job_id, "Failure broadcast failed: {}", e);
    }
}

//! Staged processing pipeline.
//!
//! Execution is split into explicit stages so that every milestone becomes
//! a durable checkpoint: preprocess -> transform -> assemble. The
//! transform itself is pluggable; the shipped implementation is a
//! pass-through, the contract being: consume input bytes plus parameters,
//! produce output bytes, report coarse progress.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use mmotion_models::JobParameters;
use mmotion_models::Stage;

use crate::error::{WorkerError, WorkerResult};

/// Error raised inside a transform implementation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransformError(pub String);

impl TransformError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<std::io::Error> for TransformError {
    fn from(e: std::io::Error) -> Self {
        Self(e.to_string())
    }
}

/// Sender for transform-stage progress fractions (0-100 of the stage).
pub type TransformProgress = mpsc::UnboundedSender<u8>;

/// The content transformation. Implementations are synchronous and
/// CPU/subprocess-bound; the processor runs them off the async executor.
pub trait Transform: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Consume the preprocessed input and produce the output artifact,
    /// reporting coarse milestones through `progress`.
    fn run(
        &self,
        input: &Path,
        parameters: &JobParameters,
        output: &Path,
        progress: &TransformProgress,
    ) -> Result<(), TransformError>;
}

impl fmt::Debug for dyn Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transform({})", self.name())
    }
}

/// Placeholder transformation: copies input bytes to the output unchanged.
#[derive(Debug, Clone, Default)]
pub struct PassThroughTransform;

impl Transform for PassThroughTransform {
    fn name(&self) -> &'static str {
        "pass_through"
    }

    fn run(
        &self,
        input: &Path,
        _parameters: &JobParameters,
        output: &Path,
        progress: &TransformProgress,
    ) -> Result<(), TransformError> {
        std::fs::copy(input, output)?;
        let _ = progress.send(100);
        Ok(())
    }
}

/// Validate and normalize the downloaded input.
///
/// Placeholder normalization copies the file; a real implementation would
/// convert container/resolution here.
pub async fn preprocess(input: &Path, scratch_dir: &Path) -> WorkerResult<PathBuf> {
    let meta = tokio::fs::metadata(input)
        .await
        .map_err(|e| WorkerError::transform_failed(Stage::Preprocess, e.to_string()))?;

    if meta.len() == 0 {
        return Err(WorkerError::transform_failed(
            Stage::Preprocess,
            "input is empty",
        ));
    }

    let out = scratch_dir.join("preprocessed");
    tokio::fs::copy(input, &out)
        .await
        .map_err(|e| WorkerError::transform_failed(Stage::Preprocess, e.to_string()))?;

    debug!("Preprocessed {} -> {}", input.display(), out.display());
    Ok(out)
}

/// Assemble the transformed bytes into the final output artifact.
pub async fn assemble(transformed: &Path, output: &Path) -> WorkerResult<()> {
    tokio::fs::copy(transformed, output)
        .await
        .map_err(|e| WorkerError::transform_failed(Stage::Assemble, e.to_string()))?;

    debug!("Assembled {}", output.display());
    Ok(())
}

//! Store error types.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No job row exists for the given id. Distinct from the HTTP-level
    /// not-found response, which the API maps this onto.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Write refused because the job already reached a terminal status.
    #[error("Job is terminal: {0}")]
    Terminal(String),

    /// Write refused because the job is not in a state that accepts it
    /// (e.g. a progress tick on a job that is not processing).
    #[error("Invalid state for write: {0}")]
    InvalidState(String),

    /// A stored value could not be decoded.
    #[error("Corrupt job row {0}: {1}")]
    Corrupt(String, String),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

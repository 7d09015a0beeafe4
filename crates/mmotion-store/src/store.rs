//! The `jobs` table and its operations.
//!
//! All writes are unconditional single-row updates keyed by id; mutual
//! exclusion on a job is implied by the queue's single unacknowledged
//! consumer, so no optimistic concurrency is layered on top. Terminality
//! is still enforced in SQL: a completed or failed row never changes again.

use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use mmotion_models::{Job, JobError, JobId, JobParameters, JobStatus};

use crate::error::{StoreError, StoreResult};

/// Durable job store backed by SQLite.
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    /// Open (or create) the database at `database_url` and run migrations.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create from the `DATABASE_URL` environment variable.
    pub async fn from_env() -> StoreResult<Self> {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://mmotion.sqlite3".to_string());
        Self::connect(&url).await
    }

    /// In-memory store, used by tests. A single connection keeps every
    /// query on the same in-memory database.
    pub async fn in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Job store migrations applied");
        Ok(())
    }

    /// Insert a new queued job and return the full record.
    pub async fn create(
        &self,
        owner: &str,
        input_ref: &str,
        parameters: &JobParameters,
    ) -> StoreResult<Job> {
        let id = JobId::new();
        let now = Utc::now();
        let params_json = serde_json::to_string(parameters)
            .map_err(|e| StoreError::Corrupt(id.to_string(), e.to_string()))?;

        sqlx::query(
            "INSERT INTO jobs (id, owner, status, progress, input_ref, parameters, created_at, updated_at)
             VALUES (?, ?, 'queued', 0, ?, ?, ?, ?)",
        )
        .bind(id.as_str())
        .bind(owner)
        .bind(input_ref)
        .bind(&params_json)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(job_id = %id, owner = %owner, "Created job");

        Ok(Job {
            id,
            owner: owner.to_string(),
            status: JobStatus::Queued,
            progress: 0,
            input_ref: input_ref.to_string(),
            result_ref: None,
            error: None,
            parameters: parameters.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Fetch a job by id.
    pub async fn get(&self, job_id: &JobId) -> StoreResult<Job> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        job_from_row(&row)
    }

    /// Move a job into `processing` and reset progress to zero.
    ///
    /// A crash-redelivered message lands here while the job is already
    /// `processing`; the restarted attempt overwrites prior progress.
    pub async fn mark_processing(&self, job_id: &JobId) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'processing', progress = 0, updated_at = ?
             WHERE id = ? AND status IN ('queued', 'processing')",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.refused(job_id).await);
        }
        debug!(job_id = %job_id, "Job marked processing");
        Ok(())
    }

    /// Checkpoint a progress percentage. Only valid while processing.
    ///
    /// Writes are capped at 99: a row only reads 100 through
    /// `mark_completed`, so progress 100 always means completed.
    pub async fn update_progress(&self, job_id: &JobId, pct: u8) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET progress = ?, updated_at = ?
             WHERE id = ? AND status = 'processing'",
        )
        .bind(pct.min(99) as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.refused(job_id).await);
        }
        Ok(())
    }

    /// Terminal success transition. Sets progress to 100 and the result
    /// pointer in the same write.
    pub async fn mark_completed(&self, job_id: &JobId, result_ref: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'completed', progress = 100, result_ref = ?, updated_at = ?
             WHERE id = ? AND status IN ('queued', 'processing')",
        )
        .bind(result_ref)
        .bind(Utc::now().to_rfc3339())
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.refused(job_id).await);
        }
        info!(job_id = %job_id, result_ref = %result_ref, "Job completed");
        Ok(())
    }

    /// Terminal failure transition with structured error detail.
    pub async fn mark_failed(&self, job_id: &JobId, error: &JobError) -> StoreResult<()> {
        let error_json = serde_json::to_string(error)
            .map_err(|e| StoreError::Corrupt(job_id.to_string(), e.to_string()))?;

        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', error = ?, updated_at = ?
             WHERE id = ? AND status IN ('queued', 'processing')",
        )
        .bind(&error_json)
        .bind(Utc::now().to_rfc3339())
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.refused(job_id).await);
        }
        info!(job_id = %job_id, error = %error, "Job failed");
        Ok(())
    }

    /// Number of job rows. Readiness probes use this as a cheap liveness
    /// query against the pool.
    pub async fn count(&self) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")? as u64)
    }

    /// Classify a zero-row update: missing row, terminal row, or a write
    /// the current status does not accept.
    async fn refused(&self, job_id: &JobId) -> StoreError {
        match self.get(job_id).await {
            Ok(job) if job.is_terminal() => StoreError::Terminal(job_id.to_string()),
            Ok(job) => StoreError::InvalidState(format!("{} is {}", job_id, job.status)),
            Err(e) => e,
        }
    }
}

fn job_from_row(row: &SqliteRow) -> StoreResult<Job> {
    let id: String = row.try_get("id")?;
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| StoreError::Corrupt(id.clone(), format!("unknown status {status_str}")))?;

    let params_json: String = row.try_get("parameters")?;
    let parameters: JobParameters = serde_json::from_str(&params_json)
        .map_err(|e| StoreError::Corrupt(id.clone(), e.to_string()))?;

    let error: Option<JobError> = match row.try_get::<Option<String>, _>("error")? {
        Some(json) => Some(
            serde_json::from_str(&json)
                .map_err(|e| StoreError::Corrupt(id.clone(), e.to_string()))?,
        ),
        None => None,
    };

    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let parse_ts = |s: &str| {
        chrono::DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&chrono::Utc))
            .map_err(|e| StoreError::Corrupt(id.clone(), e.to_string()))
    };

    Ok(Job {
        id: JobId::from_string(&id),
        owner: row.try_get("owner")?,
        status,
        progress: row.try_get::<i64, _>("progress")? as u8,
        input_ref: row.try_get("input_ref")?,
        result_ref: row.try_get("result_ref")?,
        error,
        parameters,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmotion_models::JobErrorKind;

    async fn store() -> JobStore {
        JobStore::in_memory().await.expect("in-memory store")
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = store().await;
        let job = store
            .create("alice", "uploads/a.png", &JobParameters::empty())
            .await
            .unwrap();

        let fetched = store.get(&job.id).await.unwrap();
        assert_eq!(fetched.owner, "alice");
        assert_eq!(fetched.status, JobStatus::Queued);
        assert_eq!(fetched.progress, 0);
        assert_eq!(fetched.input_ref, "uploads/a.png");
        assert!(fetched.result_ref.is_none());
        assert!(fetched.error.is_none());
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let store = store().await;
        let err = store.get(&JobId::from_string("missing")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let store = store().await;
        let job = store
            .create("bob", "uploads/b.png", &JobParameters::empty())
            .await
            .unwrap();

        store.mark_processing(&job.id).await.unwrap();
        store.update_progress(&job.id, 35).await.unwrap();
        store.update_progress(&job.id, 75).await.unwrap();
        store.mark_completed(&job.id, "outputs/x/output").await.unwrap();

        let done = store.get(&job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.result_ref.as_deref(), Some("outputs/x/output"));
        assert!(done.error.is_none());
        assert!(done.updated_at >= done.created_at);
    }

    #[tokio::test]
    async fn test_progress_requires_processing() {
        let store = store().await;
        let job = store
            .create("bob", "uploads/b.png", &JobParameters::empty())
            .await
            .unwrap();

        // Still queued: progress ticks are refused.
        let err = store.update_progress(&job.id, 10).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_terminal_rows_are_frozen() {
        let store = store().await;
        let job = store
            .create("carol", "uploads/c.png", &JobParameters::empty())
            .await
            .unwrap();
        store.mark_processing(&job.id).await.unwrap();
        store.mark_completed(&job.id, "outputs/c/output").await.unwrap();

        assert!(matches!(
            store.update_progress(&job.id, 50).await.unwrap_err(),
            StoreError::Terminal(_)
        ));
        assert!(matches!(
            store.mark_processing(&job.id).await.unwrap_err(),
            StoreError::Terminal(_)
        ));
        assert!(matches!(
            store
                .mark_failed(&job.id, &JobError::new(JobErrorKind::Execution, "late"))
                .await
                .unwrap_err(),
            StoreError::Terminal(_)
        ));

        // Repeated reads return the identical terminal record.
        let a = store.get(&job.id).await.unwrap();
        let b = store.get(&job.id).await.unwrap();
        assert_eq!(a.status, b.status);
        assert_eq!(a.progress, b.progress);
        assert_eq!(a.result_ref, b.result_ref);
        assert_eq!(a.updated_at, b.updated_at);
    }

    #[tokio::test]
    async fn test_failed_job_shape() {
        let store = store().await;
        let job = store
            .create("dave", "uploads/d.png", &JobParameters::empty())
            .await
            .unwrap();
        store.mark_processing(&job.id).await.unwrap();
        store.update_progress(&job.id, 35).await.unwrap();

        let error = JobError::new(JobErrorKind::Execution, "model blew up");
        store.mark_failed(&job.id, &error).await.unwrap();

        let failed = store.get(&job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.result_ref.is_none());
        assert_eq!(failed.error, Some(error));
        // progress stays where the last checkpoint left it, never 100
        assert_eq!(failed.progress, 35);
    }

    #[tokio::test]
    async fn test_redelivery_restart_overwrites_progress() {
        let store = store().await;
        let job = store
            .create("erin", "uploads/e.png", &JobParameters::empty())
            .await
            .unwrap();
        store.mark_processing(&job.id).await.unwrap();
        store.update_progress(&job.id, 65).await.unwrap();

        // Redelivered message: a new attempt restarts from scratch.
        store.mark_processing(&job.id).await.unwrap();
        let restarted = store.get(&job.id).await.unwrap();
        assert_eq!(restarted.status, JobStatus::Processing);
        assert_eq!(restarted.progress, 0);
    }

    #[tokio::test]
    async fn test_progress_never_reads_100_while_processing() {
        let store = store().await;
        let job = store
            .create("gail", "uploads/g.png", &JobParameters::empty())
            .await
            .unwrap();
        store.mark_processing(&job.id).await.unwrap();

        // An over-eager checkpoint is capped below the completion mark.
        store.update_progress(&job.id, 100).await.unwrap();
        let running = store.get(&job.id).await.unwrap();
        assert_eq!(running.status, JobStatus::Processing);
        assert_eq!(running.progress, 99);

        store.mark_completed(&job.id, "outputs/g/output").await.unwrap();
        let done = store.get(&job.id).await.unwrap();
        assert_eq!(done.progress, 100);
    }

    #[tokio::test]
    async fn test_count_tracks_rows() {
        let store = store().await;
        assert_eq!(store.count().await.unwrap(), 0);

        store
            .create("hank", "uploads/h.png", &JobParameters::empty())
            .await
            .unwrap();
        store
            .create("hank", "uploads/h2.png", &JobParameters::empty())
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_parameters_stored_verbatim() {
        let store = store().await;
        let params = JobParameters(serde_json::json!({
            "style": "noir",
            "seed": 42,
            "nested": {"fps": 24}
        }));
        let job = store.create("frank", "uploads/f.png", &params).await.unwrap();

        let fetched = store.get(&job.id).await.unwrap();
        assert_eq!(fetched.parameters, params);
    }
}

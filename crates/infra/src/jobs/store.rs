//! Job storage implementations.
//!
//! Dead-lettered jobs stay in the same table with status `dead_lettered`;
//! `retry_dead_letter` moves one back to `pending`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use grainlify_core::JobId;

use super::types::{Job, JobStatus};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job already exists: {0}")]
    AlreadyExists(JobId),

    #[error("job {0} is not dead-lettered")]
    NotDeadLettered(JobId),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Per-status job counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    pub cancelled: usize,
}

impl JobStats {
    fn count(&mut self, status: &str, n: usize) {
        match status {
            "pending" => self.pending += n,
            "running" => self.running += n,
            "completed" => self.completed += n,
            "failed" => self.failed += n,
            "dead_lettered" => self.dead_lettered += n,
            "cancelled" => self.cancelled += n,
            _ => {}
        }
    }
}

/// Job store abstraction.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    async fn update(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Claim the oldest ready job and mark it running.
    ///
    /// Returns `None` if nothing is ready. Concurrent claimers never receive
    /// the same job.
    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError>;

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<Job>, JobStoreError>;

    /// Move a dead-lettered job back to pending with a fresh attempt count.
    async fn retry_dead_letter(&self, job_id: JobId) -> Result<Job, JobStoreError>;

    async fn stats(&self) -> Result<JobStats, JobStoreError>;
}

#[async_trait]
impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        (**self).enqueue(job).await
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(job_id).await
    }

    async fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).update(job).await
    }

    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_next().await
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        (**self).list_dead_letters(limit).await
    }

    async fn retry_dead_letter(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        (**self).retry_dead_letter(job_id).await
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats().await
    }
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

fn poisoned<T>(_: T) -> JobStoreError {
    JobStoreError::Storage("lock poisoned".to_string())
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        Ok(jobs.get(&job_id).cloned())
    }

    async fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        match jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job.clone();
                Ok(())
            }
            None => Err(JobStoreError::NotFound(job.id)),
        }
    }

    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let now = Utc::now();

        let next = jobs
            .values()
            .filter(|j| j.status.is_claimable() && j.is_ready(now))
            .min_by_key(|j| (j.run_at, j.created_at))
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.mark_running();
                job.clone()
            })
        }))
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut dead: Vec<_> = jobs
            .values()
            .filter(|j| matches!(j.status, JobStatus::DeadLettered { .. }))
            .cloned()
            .collect();
        dead.sort_by_key(|j| j.updated_at);
        dead.truncate(limit);
        Ok(dead)
    }

    async fn retry_dead_letter(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if !matches!(job.status, JobStatus::DeadLettered { .. }) {
            return Err(JobStoreError::NotDeadLettered(job_id));
        }

        let now = Utc::now();
        job.status = JobStatus::Pending;
        job.attempt = 0;
        job.run_at = now;
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut stats = JobStats::default();
        for job in jobs.values() {
            stats.count(job.status.as_str(), 1);
        }
        Ok(stats)
    }
}

/// Postgres job store over the `sync_jobs` table.
///
/// Claims use `FOR UPDATE SKIP LOCKED`, so several workers can poll the same
/// table. Only `max_attempts` of the retry policy is persisted; the backoff
/// shape comes from [`RetryPolicy::default`].
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

const JOB_COLUMNS: &str = "id, kind, payload, status, attempt, max_attempts, last_error, run_at, created_at, updated_at";

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    JobStoreError::Storage(format!("sqlx error in {operation}: {err}"))
}

fn job_from_row(row: &sqlx::postgres::PgRow) -> Result<Job, JobStoreError> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_job", e);

    let status: String = row.try_get("status").map_err(decode)?;
    let last_error: Option<String> = row.try_get("last_error").map_err(decode)?;
    let attempt: i32 = row.try_get("attempt").map_err(decode)?;
    let max_attempts: i32 = row.try_get("max_attempts").map_err(decode)?;
    let attempt = u32::try_from(attempt).unwrap_or_default();

    let status = JobStatus::from_parts(&status, last_error, attempt)
        .ok_or_else(|| JobStoreError::Storage(format!("unknown job status '{status}'")))?;

    Ok(Job {
        id: JobId::from_uuid(row.try_get("id").map_err(decode)?),
        kind: row.try_get("kind").map_err(decode)?,
        payload: row.try_get("payload").map_err(decode)?,
        status,
        retry_policy: RetryPolicy {
            max_attempts: u32::try_from(max_attempts).unwrap_or_default(),
            ..RetryPolicy::default()
        },
        attempt,
        run_at: row.try_get::<DateTime<Utc>, _>("run_at").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, kind = %job.kind), err)]
    async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_jobs (id, kind, payload, status, attempt, max_attempts, last_error, run_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(&job.kind)
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(to_i32(job.attempt))
        .bind(to_i32(job.retry_policy.max_attempts))
        .bind(job.status.error())
        .bind(job.run_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("enqueue", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        Ok(job.id)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM sync_jobs WHERE id = $1"))
            .bind(job_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = $2, attempt = $3, last_error = $4, run_at = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(to_i32(job.attempt))
        .bind(job.status.error())
        .bind(job.run_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(job.id));
        }
        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE sync_jobs
            SET status = 'running', attempt = attempt + 1, updated_at = now()
            WHERE id = (
                SELECT id FROM sync_jobs
                WHERE status IN ('pending', 'failed') AND run_at <= now()
                ORDER BY run_at, created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_next", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM sync_jobs WHERE status = 'dead_lettered' ORDER BY updated_at LIMIT $1"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_dead_letters", e))?;

        rows.iter().map(job_from_row).collect()
    }

    async fn retry_dead_letter(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE sync_jobs
            SET status = 'pending', attempt = 0, last_error = NULL, run_at = now(), updated_at = now()
            WHERE id = $1 AND status = 'dead_lettered'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("retry_dead_letter", e))?;

        match row {
            Some(row) => job_from_row(&row),
            None => match self.get(job_id).await? {
                Some(_) => Err(JobStoreError::NotDeadLettered(job_id)),
                None => Err(JobStoreError::NotFound(job_id)),
            },
        }
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as("SELECT status, COUNT(*) FROM sync_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for (status, n) in rows {
            stats.count(&status, usize::try_from(n).unwrap_or_default());
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn enqueue_and_claim() {
        let store = InMemoryJobStore::new();

        let job_id = store.enqueue(Job::new("github.sync_repo", serde_json::json!({}))).await.unwrap();

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, job_id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.attempt, 1);

        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_rejected() {
        let store = InMemoryJobStore::new();
        let job = Job::new("github.sync_repo", serde_json::json!({}));

        store.enqueue(job.clone()).await.unwrap();
        let err = store.enqueue(job).await.unwrap_err();
        assert!(matches!(err, JobStoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn delayed_jobs_are_not_claimed_early() {
        let store = InMemoryJobStore::new();
        store
            .enqueue(Job::new("github.sync_repo", serde_json::json!({})).delayed(Duration::from_secs(3600)))
            .await
            .unwrap();

        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dead_letters_can_be_listed_and_retried() {
        let store = InMemoryJobStore::new();
        let job = Job::new("github.sync_repo", serde_json::json!({})).with_retry_policy(RetryPolicy::no_retry());
        store.enqueue(job).await.unwrap();

        let mut claimed = store.claim_next().await.unwrap().unwrap();
        claimed.mark_failed("404".to_string());
        store.update(&claimed).await.unwrap();

        let dead = store.list_dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);

        let revived = store.retry_dead_letter(claimed.id).await.unwrap();
        assert_eq!(revived.status, JobStatus::Pending);
        assert_eq!(revived.attempt, 0);

        let err = store.retry_dead_letter(claimed.id).await.unwrap_err();
        assert!(matches!(err, JobStoreError::NotDeadLettered(_)));
    }

    #[tokio::test]
    async fn stats_tracking() {
        let store = InMemoryJobStore::new();
        for i in 0..5 {
            store.enqueue(Job::new("github.sync_repo", serde_json::json!({"i": i}))).await.unwrap();
        }

        assert_eq!(store.stats().await.unwrap().pending, 5);

        store.claim_next().await.unwrap();
        store.claim_next().await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.running, 2);
    }
}

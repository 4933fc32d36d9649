//! Repository for the `job_queue` table: a durable, at-least-once work
//! queue with competing consumers.
//!
//! A claim is a single `UPDATE .. WHERE seq = (SELECT .. LIMIT 1)`, which
//! SQLite executes under the write lock, so no two workers can claim the
//! same row. Claims carry a lease; a row whose lease expired is claimable
//! again, which is how jobs held by a crashed worker get redelivered.

use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::SqliteExecutor;
use sqlx::types::Json;
use sqlx::Row;
use taskforge_core::types::TaskId;

use crate::models::job::{ClaimedJob, JobDescriptor};
use crate::DbPool;

fn lease_deadline(lease: Duration) -> i64 {
    Utc::now().timestamp_millis() + i64::try_from(lease.as_millis()).unwrap_or(i64::MAX / 2)
}

/// Provides queue operations for background task execution.
pub struct JobQueueRepo;

impl JobQueueRepo {
    /// Append a job. The job id is the task id.
    pub async fn enqueue<'e, E>(executor: E, job: &JobDescriptor) -> Result<TaskId, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query("INSERT INTO job_queue (job_id, payload, enqueued_at) VALUES (?1, ?2, ?3)")
            .bind(job.task_id.to_string())
            .bind(Json(job))
            .bind(Utc::now())
            .execute(executor)
            .await?;
        Ok(job.task_id)
    }

    /// Atomically claim the oldest claimable job for `worker_id`.
    pub async fn claim_next(
        pool: &DbPool,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<ClaimedJob>, sqlx::Error> {
        let now_ms = Utc::now().timestamp_millis();
        let row = sqlx::query(
            "UPDATE job_queue \
             SET claimed_by = ?1, lease_expires_at = ?2, attempts = attempts + 1 \
             WHERE seq = ( \
                 SELECT seq FROM job_queue \
                 WHERE claimed_by IS NULL OR lease_expires_at < ?3 \
                 ORDER BY seq \
                 LIMIT 1 \
             ) \
             RETURNING payload, claimed_by, attempts, lease_expires_at",
        )
        .bind(worker_id)
        .bind(lease_deadline(lease))
        .bind(now_ms)
        .fetch_optional(pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let Json(job) = row.try_get::<Json<JobDescriptor>, _>("payload")?;
        Ok(Some(ClaimedJob {
            job,
            worker_id: row.try_get("claimed_by")?,
            attempts: row.try_get("attempts")?,
            lease_expires_at: row.try_get("lease_expires_at")?,
        }))
    }

    /// Extend the lease on a job still held by `worker_id`.
    ///
    /// Returns `false` when the claim was lost (expired and taken over, or
    /// the job was already removed).
    pub async fn renew_lease(
        pool: &DbPool,
        job_id: TaskId,
        worker_id: &str,
        lease: Duration,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE job_queue SET lease_expires_at = ?1 WHERE job_id = ?2 AND claimed_by = ?3",
        )
        .bind(lease_deadline(lease))
        .bind(job_id.to_string())
        .bind(worker_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Acknowledge a finished job, removing it from the queue.
    pub async fn ack(pool: &DbPool, job_id: TaskId, worker_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM job_queue WHERE job_id = ?1 AND claimed_by = ?2")
            .bind(job_id.to_string())
            .bind(worker_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Hand a claimed job back so another worker can pick it up at once.
    pub async fn release(
        pool: &DbPool,
        job_id: TaskId,
        worker_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE job_queue SET claimed_by = NULL, lease_expires_at = NULL \
             WHERE job_id = ?1 AND claimed_by = ?2",
        )
        .bind(job_id.to_string())
        .bind(worker_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a job nobody has claimed yet.
    ///
    /// Returns `false` if the job is claimed or gone; the caller then relies
    /// on the task's status guard to stop it.
    pub async fn remove_pending(pool: &DbPool, job_id: TaskId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM job_queue WHERE job_id = ?1 AND claimed_by IS NULL")
            .bind(job_id.to_string())
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether a job row exists, claimed or not.
    pub async fn contains(pool: &DbPool, job_id: TaskId) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT seq FROM job_queue WHERE job_id = ?1")
            .bind(job_id.to_string())
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    /// Total number of queued jobs, claimed or not.
    pub async fn depth(pool: &DbPool) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM job_queue")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}

//! `PostgreSQL` job queue.
//!
//! One row per pending `(entity, entity_id, event)`. Scheduling the same key
//! again replaces the row, which is how a timer is reset. Workers claim due
//! rows with `FOR UPDATE SKIP LOCKED` and a lease, so two workers never run
//! the same job at once and a crashed worker's jobs become due again when the
//! lease runs out.
//!
//! Completion, retry and dead-lettering address the row by its delivery id.
//! A job rescheduled while a worker held it gets a fresh id, so the worker's
//! bookkeeping cannot clobber the newer timer.

use boxoffice_core::job::{EntityKind, Job, JobKey, JobRequest, JobScheduler, SchedulerError};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

fn unavailable(e: sqlx::Error) -> SchedulerError {
    SchedulerError::Unavailable(e.to_string())
}

/// Durable job scheduler over the `jobs` table
#[derive(Clone, Debug)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    /// Create a queue on an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lease up to `limit` due jobs for `lease`, soonest first.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Unavailable`] if the query fails and
    /// [`SchedulerError::SerializationError`] if a row cannot be decoded.
    pub async fn claim_due(
        &self,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<Job>, SchedulerError> {
        #[allow(clippy::cast_possible_wrap)] // Limit is reasonable size, i64 is safe
        let rows = sqlx::query(
            r"
            UPDATE jobs
            SET locked_until = now() + make_interval(secs => $2)
            WHERE id IN (
                SELECT id FROM jobs
                WHERE due_at <= now()
                  AND (locked_until IS NULL OR locked_until < now())
                ORDER BY due_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, entity, entity_id, event, expected_state, payload, due_at, attempts
            ",
        )
        .bind(limit as i64)
        .bind(lease.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let mut jobs = rows.iter().map(Self::row_to_job).collect::<Result<Vec<_>, _>>()?;
        jobs.sort_by_key(|job| job.due_at);
        Ok(jobs)
    }

    /// Remove a delivered job.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Unavailable`] if the delete fails.
    pub async fn complete(&self, id: Uuid) -> Result<(), SchedulerError> {
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    /// Release a failed job for redelivery after `delay`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Unavailable`] if the update fails.
    pub async fn retry(
        &self,
        id: Uuid,
        delay: Duration,
        error: &str,
    ) -> Result<(), SchedulerError> {
        sqlx::query(
            r"
            UPDATE jobs
            SET attempts = attempts + 1,
                due_at = now() + make_interval(secs => $2),
                last_error = $3,
                locked_until = NULL
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(delay.as_secs_f64())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    /// Move a job to `dead_jobs` in one transaction; returns the dead-letter id,
    /// or `None` if the job was replaced or removed meanwhile.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Unavailable`] if the transaction fails.
    pub async fn dead_letter(&self, job: &Job, error: &str) -> Result<Option<i64>, SchedulerError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        let removed = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job.id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        if removed.rows_affected() == 0 {
            tx.rollback().await.map_err(unavailable)?;
            return Ok(None);
        }

        #[allow(clippy::cast_possible_wrap)] // Attempt counts are small
        let (dead_id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO dead_jobs (
                job_id, entity, entity_id, event, expected_state, payload,
                error_message, attempts, first_due_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            ",
        )
        .bind(job.id)
        .bind(job.key.entity.as_str())
        .bind(job.key.entity_id)
        .bind(&job.key.event)
        .bind(job.expected_state.as_deref())
        .bind(job.payload.as_ref())
        .bind(error)
        .bind(job.attempts.saturating_add(1) as i32)
        .bind(job.due_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(unavailable)?;

        tx.commit().await.map_err(unavailable)?;

        tracing::warn!(
            dlq_id = dead_id,
            job = %job.key,
            error = error,
            attempts = job.attempts + 1,
            "Job added to Dead Letter Queue"
        );
        metrics::counter!("boxoffice_dead_jobs_total", "entity" => job.key.entity.as_str())
            .increment(1);

        Ok(Some(dead_id))
    }

    /// Number of jobs waiting, due or not.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Unavailable`] if the query fails.
    pub async fn pending_count(&self) -> Result<i64, SchedulerError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(count)
    }

    /// Pending job with `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Unavailable`] if the query fails.
    pub async fn find(&self, key: &JobKey) -> Result<Option<Job>, SchedulerError> {
        let row = sqlx::query(
            r"
            SELECT id, entity, entity_id, event, expected_state, payload, due_at, attempts
            FROM jobs
            WHERE entity = $1 AND entity_id = $2 AND event = $3
            ",
        )
        .bind(key.entity.as_str())
        .bind(key.entity_id)
        .bind(&key.event)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job, SchedulerError> {
        let entity: String = row.get("entity");
        let entity = EntityKind::parse(&entity)
            .ok_or_else(|| SchedulerError::SerializationError(format!("unknown entity {entity}")))?;
        let attempts: i32 = row.get("attempts");
        let due_at: DateTime<Utc> = row.get("due_at");

        Ok(Job {
            id: row.get("id"),
            key: JobKey {
                entity,
                entity_id: row.get("entity_id"),
                event: row.get("event"),
            },
            expected_state: row.get("expected_state"),
            payload: row.get("payload"),
            due_at,
            attempts: u32::try_from(attempts).unwrap_or_default(),
        })
    }
}

impl JobScheduler for PgJobQueue {
    fn schedule(&self, request: JobRequest) -> BoxFuture<'_, Result<(), SchedulerError>> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO jobs (id, entity, entity_id, event, expected_state, payload, due_at)
                VALUES ($1, $2, $3, $4, $5, $6, now() + make_interval(secs => $7))
                ON CONFLICT (entity, entity_id, event) DO UPDATE
                SET id = EXCLUDED.id,
                    expected_state = EXCLUDED.expected_state,
                    payload = EXCLUDED.payload,
                    due_at = EXCLUDED.due_at,
                    attempts = 0,
                    last_error = NULL,
                    locked_until = NULL
                ",
            )
            .bind(Uuid::new_v4())
            .bind(request.key.entity.as_str())
            .bind(request.key.entity_id)
            .bind(&request.key.event)
            .bind(request.expected_state.as_deref())
            .bind(request.payload.as_ref())
            .bind(request.delay.as_secs_f64())
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

            tracing::debug!(job = %request.key, delay = ?request.delay, "Job scheduled");
            Ok(())
        })
    }

    fn cancel(&self, key: JobKey) -> BoxFuture<'_, Result<bool, SchedulerError>> {
        Box::pin(async move {
            let result = sqlx::query(
                "DELETE FROM jobs WHERE entity = $1 AND entity_id = $2 AND event = $3",
            )
                .bind(key.entity.as_str())
                .bind(key.entity_id)
                .bind(&key.event)
                .execute(&self.pool)
                .await
                .map_err(unavailable)?;
            Ok(result.rows_affected() > 0)
        })
    }
}

//! Dead Letter Queue (DLQ) for jobs that could not be delivered.
//!
//! Jobs land in `dead_jobs` after a fatal handler error or after exhausting
//! their retries (see [`crate::PgJobQueue::dead_letter`]). Operators list
//! them, requeue the ones whose cause has been fixed and close out the rest.

use boxoffice_core::job::{EntityKind, JobKey, SchedulerError};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Status of a dead job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadJobStatus {
    /// Waiting for investigation
    Pending,
    /// Put back on the job queue
    Requeued,
    /// Handled by hand
    Resolved,
    /// Permanently dropped
    Discarded,
}

impl DeadJobStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Requeued => "requeued",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, SchedulerError> {
        match s {
            "pending" => Ok(Self::Pending),
            "requeued" => Ok(Self::Requeued),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(SchedulerError::SerializationError(format!(
                "Invalid dead job status: {s}"
            ))),
        }
    }
}

/// A row of the Dead Letter Queue.
#[derive(Debug, Clone)]
pub struct DeadJob {
    /// DLQ entry id
    pub id: i64,
    /// Delivery id the job had on the queue
    pub job_id: Uuid,
    /// What the job was meant to deliver
    pub key: JobKey,
    /// State tag hint carried by the job
    pub expected_state: Option<String>,
    /// Payload carried by the job
    pub payload: Option<serde_json::Value>,
    /// Last handler error
    pub error_message: String,
    /// Deliveries made before giving up
    pub attempts: i32,
    /// When the job first became due
    pub first_due_at: DateTime<Utc>,
    /// When it was dead-lettered
    pub failed_at: DateTime<Utc>,
    /// Current status
    pub status: DeadJobStatus,
    /// When it was closed out
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who closed it out
    pub resolved_by: Option<String>,
    /// Notes about the resolution
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-backed Dead Letter Queue for jobs.
///
/// # Example
///
/// ```no_run
/// use boxoffice_postgres::{DeadJobQueue, DeadJobStatus};
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dlq = DeadJobQueue::new(pool);
///
/// for dead in dlq.list_pending(100).await? {
///     println!("{} failed: {}", dead.key, dead.error_message);
/// }
///
/// // Put a job back once its cause is fixed
/// dlq.requeue(42, "ops").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct DeadJobQueue {
    pool: PgPool,
}

impl DeadJobQueue {
    /// Create a Dead Letter Queue on an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List pending dead jobs, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Unavailable`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<DeadJob>, SchedulerError> {
        self.list_by_status(DeadJobStatus::Pending, limit).await
    }

    /// List dead jobs by status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Unavailable`] if the query fails.
    pub async fn list_by_status(
        &self,
        status: DeadJobStatus,
        limit: usize,
    ) -> Result<Vec<DeadJob>, SchedulerError> {
        #[allow(clippy::cast_possible_wrap)] // Limit is reasonable size, i64 is safe
        let rows = sqlx::query(
            r"
            SELECT
                id, job_id, entity, entity_id, event, expected_state, payload,
                error_message, attempts, first_due_at, failed_at, status,
                resolved_at, resolved_by, resolution_notes
            FROM dead_jobs
            WHERE status = $1
            ORDER BY failed_at ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SchedulerError::Unavailable(e.to_string()))?;

        rows.iter().map(Self::row_to_dead_job).collect()
    }

    /// Get a dead job by DLQ id.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Unavailable`] if the query fails or the entry does not exist.
    pub async fn get_by_id(&self, id: i64) -> Result<DeadJob, SchedulerError> {
        let row = sqlx::query(
            r"
            SELECT
                id, job_id, entity, entity_id, event, expected_state, payload,
                error_message, attempts, first_due_at, failed_at, status,
                resolved_at, resolved_by, resolution_notes
            FROM dead_jobs
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SchedulerError::Unavailable(e.to_string()))?;

        Self::row_to_dead_job(&row)
    }

    /// Put a dead job back on the queue, due now, and mark it requeued.
    ///
    /// A pending job with the same key is replaced, exactly as a fresh
    /// schedule would. Returns the new delivery id.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Unavailable`] if the entry does not exist,
    /// is not pending, or the transaction fails.
    pub async fn requeue(&self, id: i64, requeued_by: &str) -> Result<Uuid, SchedulerError> {
        let dead = self.get_by_id(id).await?;
        if dead.status != DeadJobStatus::Pending {
            return Err(SchedulerError::Unavailable(format!(
                "dead job {id} is {}, not pending",
                dead.status.as_str()
            )));
        }

        let job_id = Uuid::new_v4();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SchedulerError::Unavailable(e.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO jobs (id, entity, entity_id, event, expected_state, payload, due_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
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
        .bind(job_id)
        .bind(dead.key.entity.as_str())
        .bind(dead.key.entity_id)
        .bind(&dead.key.event)
        .bind(dead.expected_state.as_deref())
        .bind(dead.payload.as_ref())
        .execute(&mut *tx)
        .await
        .map_err(|e| SchedulerError::Unavailable(e.to_string()))?;

        sqlx::query(
            r"
            UPDATE dead_jobs
            SET status = 'requeued',
                resolved_at = NOW(),
                resolved_by = $1
            WHERE id = $2
            ",
        )
        .bind(requeued_by)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| SchedulerError::Unavailable(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| SchedulerError::Unavailable(e.to_string()))?;

        tracing::info!(dlq_id = id, job = %dead.key, %job_id, "Dead job requeued");
        metrics::counter!("boxoffice_dead_jobs_requeued_total").increment(1);

        Ok(job_id)
    }

    /// Mark a dead job as resolved by hand.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Unavailable`] if the update fails.
    pub async fn mark_resolved(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), SchedulerError> {
        sqlx::query(
            r"
            UPDATE dead_jobs
            SET status = 'resolved',
                resolved_at = NOW(),
                resolved_by = $1,
                resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| SchedulerError::Unavailable(e.to_string()))?;

        tracing::info!(dlq_id = id, resolved_by = resolved_by, "Dead job marked as resolved");

        Ok(())
    }

    /// Mark a dead job as permanently dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Unavailable`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), SchedulerError> {
        sqlx::query(
            r"
            UPDATE dead_jobs
            SET status = 'discarded',
                resolved_at = NOW(),
                resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| SchedulerError::Unavailable(e.to_string()))?;

        tracing::warn!(dlq_id = id, reason = reason, "Dead job discarded");

        Ok(())
    }

    /// Count of pending dead jobs, for health checks and alerts.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Unavailable`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, SchedulerError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM dead_jobs WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SchedulerError::Unavailable(e.to_string()))?;

        Ok(count)
    }

    fn row_to_dead_job(row: &sqlx::postgres::PgRow) -> Result<DeadJob, SchedulerError> {
        let entity: String = row.get("entity");
        let entity = EntityKind::parse(&entity)
            .ok_or_else(|| SchedulerError::SerializationError(format!("unknown entity {entity}")))?;
        let status: String = row.get("status");

        Ok(DeadJob {
            id: row.get("id"),
            job_id: row.get("job_id"),
            key: JobKey {
                entity,
                entity_id: row.get("entity_id"),
                event: row.get("event"),
            },
            expected_state: row.get("expected_state"),
            payload: row.get("payload"),
            error_message: row.get("error_message"),
            attempts: row.get("attempts"),
            first_due_at: row.get("first_due_at"),
            failed_at: row.get("failed_at"),
            status: DeadJobStatus::parse(&status)?,
            resolved_at: row.get("resolved_at"),
            resolved_by: row.get("resolved_by"),
            resolution_notes: row.get("resolution_notes"),
        })
    }
}

//! `PostgreSQL` snapshot store.
//!
//! Snapshots live in JSONB columns next to a `version` counter. Saves are
//! `UPDATE ... WHERE version = $expected`, so a writer that loaded a stale
//! snapshot affects zero rows and gets [`SaveOutcome::Conflict`]. Seat claims
//! run as a single `UPDATE` that checks and moves the counters inside the
//! database.

use boxoffice_core::persistence::{
    DecrementOutcome, InventoryField, PersistenceError, SaveOutcome, SnapshotStore, Versioned,
};
use boxoffice_core::show::Show;
use boxoffice_core::ticket::Ticket;
use boxoffice_core::types::{InvoiceId, ShowId, TicketId};
use futures::future::BoxFuture;
use serde_json::Value;
use sqlx::PgPool;

fn db_error(e: sqlx::Error) -> PersistenceError {
    PersistenceError::DatabaseError(e.to_string())
}

fn encode<T: serde::Serialize>(snapshot: &T) -> Result<Value, PersistenceError> {
    serde_json::to_value(snapshot).map_err(|e| PersistenceError::SerializationError(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(
    (snapshot, version): (Value, i64),
) -> Result<Versioned<T>, PersistenceError> {
    let snapshot = serde_json::from_value(snapshot)
        .map_err(|e| PersistenceError::SerializationError(e.to_string()))?;
    let version = u64::try_from(version)
        .map_err(|_| PersistenceError::SerializationError(format!("negative version {version}")))?;
    Ok(Versioned { snapshot, version })
}

fn expected_version(expected: u64) -> Result<i64, PersistenceError> {
    i64::try_from(expected)
        .map_err(|_| PersistenceError::DatabaseError(format!("version {expected} out of range")))
}

/// Snapshot store over the `shows` and `tickets` tables
#[derive(Clone, Debug)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    /// Create a store on an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn show_exists(&self, id: ShowId) -> Result<bool, PersistenceError> {
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM shows WHERE id = $1)")
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(exists)
    }
}

impl SnapshotStore for PgSnapshotStore {
    fn load_show(
        &self,
        id: ShowId,
    ) -> BoxFuture<'_, Result<Option<Versioned<Show>>, PersistenceError>> {
        Box::pin(async move {
            let row: Option<(Value, i64)> =
                sqlx::query_as("SELECT snapshot, version FROM shows WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
            row.map(decode).transpose()
        })
    }

    fn save_show<'a>(
        &'a self,
        show: &'a Show,
        expected: Option<u64>,
    ) -> BoxFuture<'a, Result<SaveOutcome, PersistenceError>> {
        Box::pin(async move {
            let snapshot = encode(show)?;
            let saved: Option<(i64,)> = match expected {
                None => sqlx::query_as(
                    r"
                    INSERT INTO shows (id, version, status, snapshot)
                    VALUES ($1, 1, $2, $3)
                    ON CONFLICT (id) DO NOTHING
                    RETURNING version
                    ",
                )
                .bind(show.id.as_uuid())
                .bind(show.status.tag())
                .bind(&snapshot)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?,
                Some(expected) => sqlx::query_as(
                    r"
                    UPDATE shows
                    SET snapshot = $3, status = $2, version = version + 1, updated_at = now()
                    WHERE id = $1 AND version = $4
                    RETURNING version
                    ",
                )
                .bind(show.id.as_uuid())
                .bind(show.status.tag())
                .bind(&snapshot)
                .bind(expected_version(expected)?)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?,
            };
            Ok(saved.map_or(SaveOutcome::Conflict, |(version,)| {
                SaveOutcome::Saved(u64::try_from(version).unwrap_or_default())
            }))
        })
    }

    fn conditional_decrement(
        &self,
        id: ShowId,
        field: InventoryField,
        by: u32,
    ) -> BoxFuture<'_, Result<DecrementOutcome, PersistenceError>> {
        Box::pin(async move {
            // Check and move in one statement; the row lock serializes claims
            let row: Option<(Value, i64)> = sqlx::query_as(
                r"
                UPDATE shows
                SET snapshot = jsonb_set(
                        jsonb_set(
                            snapshot,
                            ARRAY['counters', $2::text],
                            to_jsonb((snapshot #>> ARRAY['counters', $2::text])::bigint - $4)
                        ),
                        ARRAY['counters', $3::text],
                        to_jsonb((snapshot #>> ARRAY['counters', $3::text])::bigint + $4)
                    ),
                    version = version + 1,
                    updated_at = now()
                WHERE id = $1
                  AND status IN ('boxOfficeOpen', 'boxOfficeClosed')
                  AND (snapshot #>> ARRAY['counters', $2::text])::bigint >= $4
                RETURNING snapshot, version
                ",
            )
            .bind(id.as_uuid())
            .bind(field.as_str())
            .bind(field.holding_field())
            .bind(i64::from(by))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            match row {
                Some(row) => Ok(DecrementOutcome::Applied(decode(row)?)),
                None if self.show_exists(id).await? => {
                    tracing::debug!(
                        show_id = %id,
                        field = field.as_str(),
                        by,
                        "Conditional decrement exhausted or box office gone"
                    );
                    Ok(DecrementOutcome::Exhausted)
                },
                None => Err(PersistenceError::DatabaseError(format!("show {id} not found"))),
            }
        })
    }

    fn load_ticket(
        &self,
        id: TicketId,
    ) -> BoxFuture<'_, Result<Option<Versioned<Ticket>>, PersistenceError>> {
        Box::pin(async move {
            let row: Option<(Value, i64)> =
                sqlx::query_as("SELECT snapshot, version FROM tickets WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
            row.map(decode).transpose()
        })
    }

    fn save_ticket<'a>(
        &'a self,
        ticket: &'a Ticket,
        expected: Option<u64>,
    ) -> BoxFuture<'a, Result<SaveOutcome, PersistenceError>> {
        Box::pin(async move {
            let snapshot = encode(ticket)?;
            let invoice_id = ticket.payment.invoice_id.as_ref().map(InvoiceId::as_str);
            let saved: Option<(i64,)> = match expected {
                None => sqlx::query_as(
                    r"
                    INSERT INTO tickets (id, show_id, version, status, invoice_id, snapshot)
                    VALUES ($1, $2, 1, $3, $4, $5)
                    ON CONFLICT (id) DO NOTHING
                    RETURNING version
                    ",
                )
                .bind(ticket.id.as_uuid())
                .bind(ticket.show_id.as_uuid())
                .bind(ticket.status.tag())
                .bind(invoice_id)
                .bind(&snapshot)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?,
                Some(expected) => sqlx::query_as(
                    r"
                    UPDATE tickets
                    SET snapshot = $4, status = $2, invoice_id = $3,
                        version = version + 1, updated_at = now()
                    WHERE id = $1 AND version = $5
                    RETURNING version
                    ",
                )
                .bind(ticket.id.as_uuid())
                .bind(ticket.status.tag())
                .bind(invoice_id)
                .bind(&snapshot)
                .bind(expected_version(expected)?)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?,
            };
            Ok(saved.map_or(SaveOutcome::Conflict, |(version,)| {
                SaveOutcome::Saved(u64::try_from(version).unwrap_or_default())
            }))
        })
    }

    fn ticket_for_invoice<'a>(
        &'a self,
        invoice_id: &'a InvoiceId,
    ) -> BoxFuture<'a, Result<Option<TicketId>, PersistenceError>> {
        Box::pin(async move {
            let row: Option<(uuid::Uuid,)> =
                sqlx::query_as("SELECT id FROM tickets WHERE invoice_id = $1")
                .bind(invoice_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
            Ok(row.map(|(id,)| TicketId::from_uuid(id)))
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), PersistenceError>> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            Ok(())
        })
    }
}

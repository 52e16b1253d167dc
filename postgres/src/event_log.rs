//! `PostgreSQL` show activity log.

use boxoffice_core::event_log::{EventLog, EventLogError, ShowEventKind, ShowLogEntry};
use boxoffice_core::types::{ShowId, TicketId};
use futures::future::BoxFuture;
use sqlx::{PgPool, Row};

/// Event log over the `show_events` table
#[derive(Clone, Debug)]
pub struct PgEventLog {
    pool: PgPool,
}

impl PgEventLog {
    /// Create an event log on an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl EventLog for PgEventLog {
    fn append(&self, entry: ShowLogEntry) -> BoxFuture<'_, Result<(), EventLogError>> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO show_events (show_id, kind, ticket_id, payload, occurred_at)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(entry.show_id.as_uuid())
            .bind(entry.kind.as_str())
            .bind(entry.ticket_id.map(|id| *id.as_uuid()))
            .bind(&entry.payload)
            .bind(entry.occurred_at)
            .execute(&self.pool)
            .await
            .map_err(|e| EventLogError::DatabaseError(e.to_string()))?;
            Ok(())
        })
    }

    fn entries(
        &self,
        show_id: ShowId,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ShowLogEntry>, EventLogError>> {
        Box::pin(async move {
            // Newest `limit` rows, then flipped so the newest comes last
            #[allow(clippy::cast_possible_wrap)] // Limit is reasonable size, i64 is safe
            let rows = sqlx::query(
                r"
                SELECT kind, ticket_id, payload, occurred_at
                FROM (
                    SELECT id, kind, ticket_id, payload, occurred_at
                    FROM show_events
                    WHERE show_id = $1
                    ORDER BY id DESC
                    LIMIT $2
                ) recent
                ORDER BY id ASC
                ",
            )
            .bind(show_id.as_uuid())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EventLogError::DatabaseError(e.to_string()))?;

            rows.iter()
                .map(|row| {
                    let kind: String = row.get("kind");
                    let kind = ShowEventKind::parse(&kind)
                        .ok_or_else(|| {
                            EventLogError::SerializationError(format!("unknown event kind {kind}"))
                        })?;
                    let ticket_id: Option<uuid::Uuid> = row.get("ticket_id");
                    Ok(ShowLogEntry {
                        show_id,
                        kind,
                        ticket_id: ticket_id.map(TicketId::from_uuid),
                        payload: row.get("payload"),
                        occurred_at: row.get("occurred_at"),
                    })
                })
                .collect()
        })
    }
}

//! `PostgreSQL` transaction ledger.
//!
//! Rows are unique per `(direction, reference)` and a trigger rejects any
//! `UPDATE` or `DELETE`, so the table only ever grows.

use boxoffice_core::ledger::{Direction, Ledger, LedgerError, RecordOutcome, Transaction};
use boxoffice_core::types::{Money, ShowId, TicketId, TransactionId};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::{PgPool, Row};

/// Append-only ledger over the `transactions` table
#[derive(Clone, Debug)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    /// Create a ledger on an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Result<Transaction, LedgerError> {
        let direction: String = row.get("direction");
        let direction = Direction::parse(&direction)
            .ok_or_else(|| LedgerError::CorruptRow(format!("unknown direction {direction}")))?;
        let amount: i64 = row.get("amount_cents");
        let amount = u64::try_from(amount)
            .map_err(|_| LedgerError::CorruptRow(format!("negative amount {amount}")))?;
        let confirmations: i32 = row.get("confirmations");
        let recorded_at: DateTime<Utc> = row.get("recorded_at");

        Ok(Transaction {
            reference: TransactionId::new(row.get::<String, _>("reference")),
            ticket_id: TicketId::from_uuid(row.get("ticket_id")),
            show_id: ShowId::from_uuid(row.get("show_id")),
            direction,
            amount: Money::from_cents(amount),
            currency: row.get("currency"),
            confirmations: u32::try_from(confirmations).unwrap_or_default(),
            recorded_at,
        })
    }
}

impl Ledger for PgLedger {
    fn record(
        &self,
        transaction: Transaction,
    ) -> BoxFuture<'_, Result<RecordOutcome, LedgerError>> {
        Box::pin(async move {
            let amount = i64::try_from(transaction.amount.cents())
                .map_err(|_| {
                    let reason = format!("amount {} out of range", transaction.amount);
                    LedgerError::DatabaseError(reason)
                })?;
            #[allow(clippy::cast_possible_wrap)] // Confirmation counts are small
            let confirmations = transaction.confirmations as i32;

            let result = sqlx::query(
                r"
                INSERT INTO transactions (
                    reference, direction, ticket_id, show_id,
                    amount_cents, currency, confirmations, recorded_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (direction, reference) DO NOTHING
                ",
            )
            .bind(transaction.reference.as_str())
            .bind(transaction.direction.as_str())
            .bind(transaction.ticket_id.as_uuid())
            .bind(transaction.show_id.as_uuid())
            .bind(amount)
            .bind(&transaction.currency)
            .bind(confirmations)
            .bind(transaction.recorded_at)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::DatabaseError(e.to_string()))?;

            if result.rows_affected() == 0 {
                tracing::debug!(
                    reference = transaction.reference.as_str(),
                    direction = transaction.direction.as_str(),
                    "Duplicate ledger row ignored"
                );
                return Ok(RecordOutcome::Duplicate);
            }
            Ok(RecordOutcome::Recorded)
        })
    }

    fn for_ticket(
        &self,
        ticket_id: TicketId,
    ) -> BoxFuture<'_, Result<Vec<Transaction>, LedgerError>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT reference, direction, ticket_id, show_id,
                       amount_cents, currency, confirmations, recorded_at
                FROM transactions
                WHERE ticket_id = $1
                ORDER BY id ASC
                ",
            )
            .bind(ticket_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LedgerError::DatabaseError(e.to_string()))?;

            rows.iter().map(Self::row_to_transaction).collect()
        })
    }
}

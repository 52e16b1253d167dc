//! Immutable money ledger.
//!
//! One [`Transaction`] per settled payment or refund. Rows are written before
//! the state transition they justify, so a ticket can never be observed as
//! paid without the ledger entry that paid it.

use crate::types::{Money, ShowId, TicketId, TransactionId};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Direction of money movement
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Customer paid for a ticket
    Payment,
    /// Money returned to the customer
    Refund,
}

impl Direction {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Refund => "refund",
        }
    }

    /// Parse from the storage representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "payment" => Some(Self::Payment),
            "refund" => Some(Self::Refund),
            _ => None,
        }
    }
}

/// Ledger entry. Append-only: never updated or deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// External hash/reference; unique per direction
    pub reference: TransactionId,
    /// Ticket the money belongs to
    pub ticket_id: TicketId,
    /// Show of that ticket
    pub show_id: ShowId,
    /// Payment or refund
    pub direction: Direction,
    /// Amount in minor units
    pub amount: Money,
    /// ISO currency or asset code
    pub currency: String,
    /// Confirmations reported by the gateway
    pub confirmations: u32,
    /// When the row was written
    pub recorded_at: DateTime<Utc>,
}

/// Result of a ledger write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    /// New row written
    Recorded,
    /// A row with the same reference and direction already exists
    Duplicate,
}

/// Errors raised by the ledger
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Database connection or query failed
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A stored row could not be decoded
    #[error("Corrupt ledger row: {0}")]
    CorruptRow(String),
}

/// Durable, append-only transaction ledger
pub trait Ledger: Send + Sync {
    /// Write a transaction row; duplicates are reported, not rewritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is not durably written. The caller must not
    /// advance any state on the strength of this transaction.
    fn record(&self, transaction: Transaction) -> BoxFuture<'_, Result<RecordOutcome, LedgerError>>;

    /// All rows for a ticket in write order.
    ///
    /// # Errors
    ///
    /// Returns an error when the ledger cannot be read.
    fn for_ticket(&self, ticket_id: TicketId)
    -> BoxFuture<'_, Result<Vec<Transaction>, LedgerError>>;
}

//! Append-only audit log of notable show activity.
//!
//! Entries are appended after the snapshot they describe has been persisted.
//! The log feeds activity views and reconciliation audits; it is never read
//! back to decide a transition, so a lost append costs history, not state.

use crate::types::{ShowId, TicketId};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of a show event row
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum ShowEventKind {
    TicketReserved,
    TicketSold,
    TicketCancelled,
    TicketRefunded,
    TicketDisputed,
    DisputeResolved,
    CustomerJoined,
    CustomerLeft,
    BoxOfficeClosed,
    BoxOfficeReopened,
    ShowStarted,
    ShowStopped,
    ShowEnded,
    CancellationInitiated,
    ShowCancelled,
    ShowFinalized,
}

impl ShowEventKind {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TicketReserved => "TICKET_RESERVED",
            Self::TicketSold => "TICKET_SOLD",
            Self::TicketCancelled => "TICKET_CANCELLED",
            Self::TicketRefunded => "TICKET_REFUNDED",
            Self::TicketDisputed => "TICKET_DISPUTED",
            Self::DisputeResolved => "DISPUTE_RESOLVED",
            Self::CustomerJoined => "CUSTOMER_JOINED",
            Self::CustomerLeft => "CUSTOMER_LEFT",
            Self::BoxOfficeClosed => "BOX_OFFICE_CLOSED",
            Self::BoxOfficeReopened => "BOX_OFFICE_REOPENED",
            Self::ShowStarted => "SHOW_STARTED",
            Self::ShowStopped => "SHOW_STOPPED",
            Self::ShowEnded => "SHOW_ENDED",
            Self::CancellationInitiated => "CANCELLATION_INITIATED",
            Self::ShowCancelled => "SHOW_CANCELLED",
            Self::ShowFinalized => "SHOW_FINALIZED",
        }
    }

    /// Parse from the storage representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        const ALL: [ShowEventKind; 16] = [
            ShowEventKind::TicketReserved,
            ShowEventKind::TicketSold,
            ShowEventKind::TicketCancelled,
            ShowEventKind::TicketRefunded,
            ShowEventKind::TicketDisputed,
            ShowEventKind::DisputeResolved,
            ShowEventKind::CustomerJoined,
            ShowEventKind::CustomerLeft,
            ShowEventKind::BoxOfficeClosed,
            ShowEventKind::BoxOfficeReopened,
            ShowEventKind::ShowStarted,
            ShowEventKind::ShowStopped,
            ShowEventKind::ShowEnded,
            ShowEventKind::CancellationInitiated,
            ShowEventKind::ShowCancelled,
            ShowEventKind::ShowFinalized,
        ];
        ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

/// One row of the show activity log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShowLogEntry {
    /// Show the row belongs to
    pub show_id: ShowId,
    /// What happened
    pub kind: ShowEventKind,
    /// Ticket involved, if any
    pub ticket_id: Option<TicketId>,
    /// Free-form details (amounts, reasons, counters)
    pub payload: serde_json::Value,
    /// When the transition was applied
    pub occurred_at: DateTime<Utc>,
}

impl ShowLogEntry {
    /// Entry with an empty payload
    #[must_use]
    pub fn new(show_id: ShowId, kind: ShowEventKind, occurred_at: DateTime<Utc>) -> Self {
        Self {
            show_id,
            kind,
            ticket_id: None,
            payload: serde_json::Value::Null,
            occurred_at,
        }
    }

    /// Attach the ticket involved
    #[must_use]
    pub const fn with_ticket(mut self, ticket_id: TicketId) -> Self {
        self.ticket_id = Some(ticket_id);
        self
    }

    /// Attach a details payload
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Errors raised by an event log sink
#[derive(Error, Debug)]
pub enum EventLogError {
    /// Database connection or query failed
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Best-effort sink for show events
pub trait EventLog: Send + Sync {
    /// Append one entry.
    ///
    /// # Errors
    ///
    /// Returns an error when the entry could not be written. Callers log and
    /// continue: the snapshot is already authoritative.
    fn append(&self, entry: ShowLogEntry) -> BoxFuture<'_, Result<(), EventLogError>>;

    /// Most recent entries for a show, newest last.
    ///
    /// # Errors
    ///
    /// Returns an error when the log cannot be read.
    fn entries(
        &self,
        show_id: ShowId,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ShowLogEntry>, EventLogError>>;
}

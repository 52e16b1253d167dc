//! Persistence Adapter contract.
//!
//! Snapshots are stored whole and versioned. Every save is a compare-and-set
//! on the version the caller loaded, so two writers racing on the same
//! aggregate cannot both win. Seat inventory additionally gets a dedicated
//! [`SnapshotStore::conditional_decrement`] primitive that the store executes
//! atomically, without an application-level read in between.
//!
//! # Dyn Compatibility
//!
//! Methods return boxed futures instead of using `async fn` so the store can
//! be shared as `Arc<dyn SnapshotStore>`.

use crate::show::Show;
use crate::ticket::Ticket;
use crate::types::{InvoiceId, ShowId, TicketId};
use futures::future::BoxFuture;
use thiserror::Error;

/// A snapshot together with the version it was stored under
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<T> {
    /// The snapshot
    pub snapshot: T,
    /// Storage version; bumps on every write
    pub version: u64,
}

/// Result of a compare-and-set save
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Written; the new version
    Saved(u64),
    /// Someone else wrote first (or the row already exists on insert)
    Conflict,
}

/// Counter that can be decremented atomically
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InventoryField {
    /// `tickets_available`; the seats move into `tickets_reserved`
    TicketsAvailable,
}

impl InventoryField {
    /// Column/field name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TicketsAvailable => "tickets_available",
        }
    }

    /// Counter the decremented amount is moved into
    #[must_use]
    pub const fn holding_field(self) -> &'static str {
        match self {
            Self::TicketsAvailable => "tickets_reserved",
        }
    }
}

/// Result of a conditional decrement
#[derive(Clone, Debug, PartialEq)]
pub enum DecrementOutcome {
    /// Applied; the show as stored afterwards
    Applied(Versioned<Show>),
    /// The counter was lower than requested; nothing changed
    Exhausted,
}

/// Errors raised by a snapshot store
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Database connection or query failed
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Snapshot could not be encoded or decoded
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Durable store of show and ticket snapshots
pub trait SnapshotStore: Send + Sync {
    /// Load a show.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn load_show(
        &self,
        id: ShowId,
    ) -> BoxFuture<'_, Result<Option<Versioned<Show>>, PersistenceError>>;

    /// Save a show. `expected` is the version it was loaded at, `None` to insert.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written. A lost race is
    /// [`SaveOutcome::Conflict`], not an error.
    fn save_show<'a>(
        &'a self,
        show: &'a Show,
        expected: Option<u64>,
    ) -> BoxFuture<'a, Result<SaveOutcome, PersistenceError>>;

    /// Atomically subtract `by` from `field` if it holds at least `by`,
    /// adding the same amount to the field's holding counter. Only a show
    /// whose box office is open or closed (not yet started) can be claimed
    /// from; any other status is [`DecrementOutcome::Exhausted`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn conditional_decrement(
        &self,
        id: ShowId,
        field: InventoryField,
        by: u32,
    ) -> BoxFuture<'_, Result<DecrementOutcome, PersistenceError>>;

    /// Load a ticket.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn load_ticket(
        &self,
        id: TicketId,
    ) -> BoxFuture<'_, Result<Option<Versioned<Ticket>>, PersistenceError>>;

    /// Save a ticket with the same compare-and-set rules as [`Self::save_show`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn save_ticket<'a>(
        &'a self,
        ticket: &'a Ticket,
        expected: Option<u64>,
    ) -> BoxFuture<'a, Result<SaveOutcome, PersistenceError>>;

    /// Resolve the ticket an invoice was created for.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn ticket_for_invoice<'a>(
        &'a self,
        invoice_id: &'a InvoiceId,
    ) -> BoxFuture<'a, Result<Option<TicketId>, PersistenceError>>;

    /// Cheap connectivity check for readiness probes.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    fn ping(&self) -> BoxFuture<'_, Result<(), PersistenceError>>;
}

/// Snapshot kinds the orchestration facade can load and save generically
pub trait Aggregate: Clone + PartialEq + Send + Sync + 'static {
    /// Identifier type
    type Id: Copy + std::fmt::Display + Send + Sync + 'static;

    /// Machine name used in logs, metrics and rejections
    const MACHINE: &'static str;

    /// Identifier of this snapshot
    fn id(&self) -> Self::Id;

    /// Load by id from `store`.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    fn load(
        store: &dyn SnapshotStore,
        id: Self::Id,
    ) -> BoxFuture<'_, Result<Option<Versioned<Self>>, PersistenceError>>;

    /// Compare-and-set save into `store`.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    fn save<'a>(
        &'a self,
        store: &'a dyn SnapshotStore,
        expected: Option<u64>,
    ) -> BoxFuture<'a, Result<SaveOutcome, PersistenceError>>;
}

impl Aggregate for Show {
    type Id = ShowId;

    const MACHINE: &'static str = "show";

    fn id(&self) -> ShowId {
        self.id
    }

    fn load(
        store: &dyn SnapshotStore,
        id: ShowId,
    ) -> BoxFuture<'_, Result<Option<Versioned<Self>>, PersistenceError>> {
        store.load_show(id)
    }

    fn save<'a>(
        &'a self,
        store: &'a dyn SnapshotStore,
        expected: Option<u64>,
    ) -> BoxFuture<'a, Result<SaveOutcome, PersistenceError>> {
        store.save_show(self, expected)
    }
}

impl Aggregate for Ticket {
    type Id = TicketId;

    const MACHINE: &'static str = "ticket";

    fn id(&self) -> TicketId {
        self.id
    }

    fn load(
        store: &dyn SnapshotStore,
        id: TicketId,
    ) -> BoxFuture<'_, Result<Option<Versioned<Self>>, PersistenceError>> {
        store.load_ticket(id)
    }

    fn save<'a>(
        &'a self,
        store: &'a dyn SnapshotStore,
        expected: Option<u64>,
    ) -> BoxFuture<'a, Result<SaveOutcome, PersistenceError>> {
        store.save_ticket(self, expected)
    }
}

//! # Boxoffice Core
//!
//! Pure lifecycle logic for selling seats to time-boxed live shows.
//!
//! Two correlated state machines live here: the **Show** machine owns seat
//! inventory and the show's running/settlement lifecycle, the **Ticket**
//! machine owns one customer's payment, attendance and refund lifecycle.
//! Neither performs I/O. Each returns effect descriptions that the runtime
//! executes after persisting the new snapshot.
//!
//! ## Core Concepts
//!
//! - **Snapshot**: [`Show`] and [`Ticket`], persisted whole with a version
//! - **Action**: [`ShowAction`] / [`TicketAction`], the events each machine accepts
//! - **Reducer**: `(State, Action, Environment) → Result<Effects, Rejection>`
//! - **Effect**: logging, timer jobs and messages to the other machine
//! - **Environment**: clock and timer delays, injected via [`MachineEnvironment`]
//!
//! ## Collaborator Contracts
//!
//! The runtime talks to the outside world through the traits defined here:
//! [`SnapshotStore`], [`Ledger`], [`EventLog`], [`JobScheduler`] and
//! [`PaymentGateway`]. All are dyn-compatible and return boxed futures.
//!
//! ## Example
//!
//! ```
//! use boxoffice_core::*;
//!
//! let env = MachineEnvironment::default();
//! let mut show = Show::open(
//!     ShowId::new(),
//!     NewShow {
//!         host_id: UserId::new(),
//!         agent_id: None,
//!         title: "Late set".into(),
//!         capacity: 2,
//!         price: Money::from_cents(1000),
//!         duration_minutes: 45,
//!     },
//!     env.now(),
//! )
//! .map_err(|e| e.to_string())?;
//!
//! let ticket_id = TicketId::new();
//! ShowMachine::new()
//!     .reduce(&mut show, ShowAction::TicketReserved { ticket_id, seat_claimed: false }, &env)
//!     .map_err(|e| e.to_string())?;
//!
//! assert_eq!(show.counters.tickets_available, 1);
//! assert!(!show.can_transition("SHOW_STARTED"));
//! # Ok::<(), String>(())
//! ```

// Re-export commonly used types
pub use boxoffice_macros::MachineEvent;
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

pub mod effect;
pub mod environment;
pub mod error;
pub mod event_log;
pub mod gateway;
pub mod job;
pub mod ledger;
pub mod persistence;
pub mod reducer;
pub mod show;
pub mod ticket;
pub mod types;

pub use effect::{Dispatch, Effect, Effects};
pub use environment::{Clock, MachineEnvironment, SystemClock, TimerSettings};
pub use error::Rejection;
pub use event_log::{EventLog, EventLogError, ShowEventKind, ShowLogEntry};
pub use gateway::{
    GatewayError, Invoice, InvoiceStatus, InvoiceWebhook, PaymentGateway, PaymentLine,
    PayoutStatus, RefundRequest,
};
pub use job::{
    EntityKind, ISSUE_REFUND, Job, JobError, JobHandler, JobKey, JobOutcome, JobRequest,
    JobScheduler, POLL_PAYOUT, SchedulerError,
};
pub use ledger::{Direction, Ledger, LedgerError, RecordOutcome, Transaction};
pub use persistence::{
    Aggregate, DecrementOutcome, InventoryField, PersistenceError, SaveOutcome, SnapshotStore,
    Versioned,
};
pub use reducer::{Lifecycle, Reducer};
pub use show::{
    NewShow, SalesCounters, SeatState, Show, ShowAction, ShowCancellation, ShowMachine, ShowStatus,
    ShowTimestamps, ShowView,
};
pub use ticket::{
    Feedback, NewTicket, Ticket, TicketAction, TicketCancellation, TicketDispute, TicketMachine,
    TicketPayment, TicketStatus, TicketTimestamps, TicketView,
};
pub use types::{
    Actor, CancellationReason, InvoiceId, Money, PayoutId, ShowId, TicketId, TransactionId, UserId,
};

//! Show machine: one bookable session and its seat inventory.
//!
//! The show owns the sales counters. Every seat a ticket holds is also kept in
//! [`Show::seats`], which makes each ticket→show message idempotent and tells
//! the show which tickets to notify when it ends or is called off.
//!
//! ```text
//! boxOfficeOpen ⇄ boxOfficeClosed → started → stopped → ended.inEscrow → finalized
//!                                                          ⇅
//!                                                     ended.inDispute
//! open / closed / started / stopped / inDispute
//!       → requestedCancellation.waiting4Refund → cancelled
//! ```

use crate::effect::{Effect, Effects};
use crate::environment::MachineEnvironment;
use crate::error::Rejection;
use crate::event_log::{ShowEventKind, ShowLogEntry};
use crate::job::{JobKey, JobRequest};
use crate::reducer::{Lifecycle, Reducer};
use crate::ticket::TicketAction;
use crate::types::{Actor, CancellationReason, Money, ShowId, TicketId, UserId};
use boxoffice_macros::MachineEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use smallvec::smallvec;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

// ============================================================================
// Snapshot
// ============================================================================

/// Lifecycle status of a show
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShowStatus {
    /// Taking reservations
    BoxOfficeOpen,
    /// Sold out; reopens if a reservation is released
    BoxOfficeClosed,
    /// Live
    Started,
    /// Host stopped the stream; grace period running
    Stopped,
    /// Ended; escrow period running
    InEscrow,
    /// Ended with at least one open ticket dispute
    InDispute,
    /// Settled for good
    Finalized,
    /// Cancelled; waiting for every outstanding seat to be refunded or released
    Waiting4Refund,
    /// Cancelled and fully settled
    Cancelled,
}

impl ShowStatus {
    /// State tag used in views, job hints and rejections
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::BoxOfficeOpen => "boxOfficeOpen",
            Self::BoxOfficeClosed => "boxOfficeClosed",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::InEscrow => "ended.inEscrow",
            Self::InDispute => "ended.inDispute",
            Self::Finalized => "finalized",
            Self::Waiting4Refund => "requestedCancellation.waiting4Refund",
            Self::Cancelled => "cancelled",
        }
    }

    /// In one of the `ended.*` states
    #[must_use]
    pub const fn is_ended(self) -> bool {
        matches!(self, Self::InEscrow | Self::InDispute)
    }

    /// `finalized` or `cancelled`
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Cancelled)
    }
}

/// Sales counters. `available + sold + reserved == capacity` always holds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesCounters {
    /// Seats still on sale
    pub tickets_available: u32,
    /// Seats paid for (refunded and redeemed seats stay counted here)
    pub tickets_sold: u32,
    /// Seats held by unpaid reservations
    pub tickets_reserved: u32,
    /// Sold seats whose money went back
    pub tickets_refunded: u32,
    /// Sold seats whose holder joined the show
    pub tickets_redeemed: u32,
    /// Gross sales
    pub total_sales: Money,
    /// Money returned
    pub total_refunded: Money,
}

impl SalesCounters {
    /// Counters of a fresh show
    #[must_use]
    pub fn opening(capacity: u32) -> Self {
        Self {
            tickets_available: capacity,
            ..Self::default()
        }
    }

    /// `available + sold + reserved`
    #[must_use]
    pub const fn seats_accounted(&self) -> u64 {
        self.tickets_available as u64 + self.tickets_sold as u64 + self.tickets_reserved as u64
    }
}

/// What the show knows about one ticket's seat
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SeatState {
    /// Held by an unpaid reservation
    Reserved,
    /// Paid for
    Sold,
    /// Paid for and used
    Redeemed,
    /// Money returned to the customer
    Refunded,
    /// Reservation given back to inventory
    Released,
}

impl SeatState {
    /// Still has to be settled if the show is cancelled
    #[must_use]
    pub const fn is_outstanding(self) -> bool {
        matches!(self, Self::Reserved | Self::Sold | Self::Redeemed)
    }
}

/// Cancellation record of a show
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowCancellation {
    /// Why
    pub reason: CancellationReason,
    /// Who
    pub cancelled_by: Actor,
    /// State the show was in when cancelled
    pub cancelled_in: ShowStatus,
    /// Seats that had to be settled at cancellation time
    pub outstanding: u32,
    /// Seats settled since
    pub settled: u32,
    /// When cancellation started
    pub initiated_at: DateTime<Utc>,
}

/// Lifecycle timestamps
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct ShowTimestamps {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub box_office_closed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl ShowTimestamps {
    fn created(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            box_office_closed_at: None,
            started_at: None,
            stopped_at: None,
            ended_at: None,
            finalized_at: None,
            cancelled_at: None,
        }
    }
}

/// Show snapshot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Show {
    /// Identity
    pub id: ShowId,
    /// Host running the show
    pub host_id: UserId,
    /// Commission-taking agent, if any
    pub agent_id: Option<UserId>,
    /// Display title
    pub title: String,
    /// Seats on offer
    pub capacity: u32,
    /// Ticket price
    pub price: Money,
    /// Planned running time
    pub duration_minutes: u32,
    /// Current status
    pub status: ShowStatus,
    /// Sales counters
    pub counters: SalesCounters,
    /// Seat held by each ticket
    pub seats: BTreeMap<TicketId, SeatState>,
    /// Tickets with an open dispute
    pub disputes: BTreeSet<TicketId>,
    /// Present once cancellation was initiated
    pub cancellation: Option<ShowCancellation>,
    /// Lifecycle timestamps
    pub timestamps: ShowTimestamps,
}

/// Host input for a new show
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewShow {
    /// Host running the show
    pub host_id: UserId,
    /// Commission-taking agent
    #[serde(default)]
    pub agent_id: Option<UserId>,
    /// Display title
    pub title: String,
    /// Seats on offer
    pub capacity: u32,
    /// Ticket price in minor units
    pub price: Money,
    /// Planned running time
    pub duration_minutes: u32,
}

impl Show {
    /// Opens the box office of a new show.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::InvalidInput`] for a zero capacity, a zero price
    /// or an empty title.
    pub fn open(id: ShowId, new: NewShow, now: DateTime<Utc>) -> Result<Self, Rejection> {
        if new.capacity == 0 {
            return Err(Rejection::InvalidInput("capacity must be at least 1".into()));
        }
        if new.price.is_zero() {
            return Err(Rejection::InvalidInput("price must be positive".into()));
        }
        if new.title.trim().is_empty() {
            return Err(Rejection::InvalidInput("title must not be empty".into()));
        }
        Ok(Self {
            id,
            host_id: new.host_id,
            agent_id: new.agent_id,
            title: new.title,
            capacity: new.capacity,
            price: new.price,
            duration_minutes: new.duration_minutes,
            status: ShowStatus::BoxOfficeOpen,
            counters: SalesCounters::opening(new.capacity),
            seats: BTreeMap::new(),
            disputes: BTreeSet::new(),
            cancellation: None,
            timestamps: ShowTimestamps::created(now),
        })
    }

    /// Inventory invariant: every seat is available, sold or reserved
    #[must_use]
    pub const fn inventory_balanced(&self) -> bool {
        self.counters.seats_accounted() == self.capacity as u64
    }

    /// Seats the store reserved that no ticket has recorded yet
    #[must_use]
    pub fn unrecorded_claims(&self) -> u32 {
        let recorded = self
            .seats
            .values()
            .filter(|seat| **seat == SeatState::Reserved)
            .count();
        let recorded = u32::try_from(recorded).unwrap_or(u32::MAX);
        self.counters.tickets_reserved.saturating_sub(recorded)
    }

    /// Tickets whose seat is still outstanding
    pub fn outstanding_tickets(&self) -> impl Iterator<Item = TicketId> + '_ {
        self.seats
            .iter()
            .filter(|(_, seat)| seat.is_outstanding())
            .map(|(id, _)| *id)
    }

    /// `fullyRefunded`: every seat outstanding at cancellation time is settled
    #[must_use]
    pub fn fully_refunded(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|c| c.settled >= c.outstanding)
    }

    /// Read-only projection for UI/API consumers
    #[must_use]
    pub fn describe(&self) -> ShowView {
        ShowView {
            id: self.id,
            title: self.title.clone(),
            status: self.status.tag(),
            capacity: self.capacity,
            price: self.price,
            counters: self.counters.clone(),
            open_disputes: self.disputes.len(),
            cancellation: self.cancellation.clone(),
            timestamps: self.timestamps.clone(),
        }
    }
}

/// `describe(snapshot)` projection of a show
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct ShowView {
    pub id: ShowId,
    pub title: String,
    pub status: &'static str,
    pub capacity: u32,
    pub price: Money,
    pub counters: SalesCounters,
    pub open_disputes: usize,
    pub cancellation: Option<ShowCancellation>,
    pub timestamps: ShowTimestamps,
}

// ============================================================================
// Events
// ============================================================================

/// Events the show machine accepts
#[derive(MachineEvent, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShowAction {
    /// A ticket took a seat. `seat_claimed` is set when the store already
    /// moved the seat with a conditional decrement and only the bookkeeping
    /// is left to do.
    TicketReserved {
        /// Ticket holding the seat
        ticket_id: TicketId,
        /// Counters were already moved by the store
        #[serde(default)]
        seat_claimed: bool,
    },
    /// An unpaid reservation timed out
    TicketReservationTimeout {
        /// Ticket whose reservation lapsed
        ticket_id: TicketId,
    },
    /// A ticket was cancelled
    TicketCancelled {
        /// Cancelled ticket
        ticket_id: TicketId,
    },
    /// A seat taken by the store's conditional decrement was never recorded
    /// for its ticket and goes back to inventory
    ClaimReleased {
        /// Ticket the seat was claimed for
        ticket_id: TicketId,
    },
    /// A reservation was paid in full
    TicketSold {
        /// Paid ticket
        ticket_id: TicketId,
        /// Amount paid
        amount: Money,
    },
    /// A ticket's money was returned
    TicketRefunded {
        /// Refunded ticket
        ticket_id: TicketId,
        /// Total refunded for the ticket
        amount: Money,
    },
    /// A ticket holder joined for the first time
    TicketRedeemed {
        /// Redeemed ticket
        ticket_id: TicketId,
    },
    /// A ticket holder disputed the show
    TicketDisputed {
        /// Disputing ticket
        ticket_id: TicketId,
    },
    /// A ticket dispute was closed
    DisputeResolved {
        /// Ticket whose dispute closed
        ticket_id: TicketId,
    },
    /// Sold out
    #[event(name = "BOX_OFFICE_CLOSED")]
    #[serde(rename = "BOX_OFFICE_CLOSED")]
    CloseBoxOffice,
    /// Host went live
    ShowStarted,
    /// Host stopped, or the duration timer fired
    ShowStopped,
    /// Host ended, or the grace timer fired
    ShowEnded,
    /// Show called off
    CancellationInitiated {
        /// Why
        reason: CancellationReason,
        /// Who
        actor: Actor,
    },
    /// Escrow elapsed without dispute, or an operator settled it
    ShowFinalized,
}

// ============================================================================
// Transition table
// ============================================================================

impl Lifecycle for Show {
    fn state_tag(&self) -> &'static str {
        self.status.tag()
    }

    fn can_transition(&self, event: &str) -> bool {
        use ShowStatus::{
            BoxOfficeClosed, BoxOfficeOpen, Cancelled, Finalized, InDispute, InEscrow, Started,
            Stopped, Waiting4Refund,
        };
        let counters = &self.counters;
        match (event, self.status) {
            ("TICKET_RESERVED", BoxOfficeOpen) => counters.tickets_available > 0,
            ("CLAIM_RELEASED", _) => true,
            ("TICKET_RESERVATION_TIMEOUT" | "TICKET_CANCELLED", status) => status != Finalized,
            ("TICKET_SOLD", BoxOfficeOpen | BoxOfficeClosed | Started | Stopped)
            | ("TICKET_REDEEMED", Started)
            | ("TICKET_DISPUTED", InEscrow | InDispute)
            | ("DISPUTE_RESOLVED", InDispute)
            | ("SHOW_STARTED" | "SHOW_STOPPED", Started)
            | ("SHOW_STOPPED", Stopped)
            | ("SHOW_ENDED", Started | Stopped | InEscrow | InDispute)
            | ("SHOW_FINALIZED", InEscrow)
            | (
                "CANCELLATION_INITIATED",
                BoxOfficeOpen | BoxOfficeClosed | Started | Stopped | InDispute | Waiting4Refund
                | Cancelled,
            ) => true,
            ("TICKET_REFUNDED", status) => !matches!(status, Finalized | Cancelled),
            ("BOX_OFFICE_CLOSED", BoxOfficeOpen) => counters.tickets_available == 0,
            ("SHOW_STARTED", BoxOfficeOpen | BoxOfficeClosed) => counters.tickets_sold >= 1,
            _ => false,
        }
    }
}

/// Name of the guard reported when `event` is refused
fn guard_for(event: &str) -> &'static str {
    match event {
        "SHOW_STARTED" => "canStartShow",
        "CANCELLATION_INITIATED" => "canCancelShow",
        "BOX_OFFICE_CLOSED" => "soldOut",
        "TICKET_SOLD" | "TICKET_REDEEMED" => "seatHeld",
        _ => "transition",
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer of the show machine
#[derive(Clone, Copy, Debug, Default)]
pub struct ShowMachine;

impl ShowMachine {
    /// Creates the show machine
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn ensure(state: &Show, event: &'static str) -> Result<(), Rejection> {
        if state.can_transition(event) {
            Ok(())
        } else {
            Err(Self::reject(state, event, guard_for(event)))
        }
    }

    const fn reject(state: &Show, event: &'static str, guard: &'static str) -> Rejection {
        Rejection::GuardRejected {
            machine: "show",
            event,
            state: state.status.tag(),
            guard,
        }
    }

    fn log(state: &Show, kind: ShowEventKind, now: DateTime<Utc>) -> ShowLogEntry {
        ShowLogEntry::new(state.id, kind, now)
    }

    fn counters_payload(state: &Show) -> serde_json::Value {
        json!({
            "tickets_available": state.counters.tickets_available,
            "tickets_reserved": state.counters.tickets_reserved,
            "tickets_sold": state.counters.tickets_sold,
        })
    }

    /// Gives a reserved seat back to inventory
    fn release_seat(
        state: &mut Show,
        ticket_id: TicketId,
        now: DateTime<Utc>,
        effects: &mut Effects,
    ) {
        Self::return_to_inventory(state, ticket_id, now, effects);
        Self::settle(state, now, effects);
    }

    fn return_to_inventory(
        state: &mut Show,
        ticket_id: TicketId,
        now: DateTime<Utc>,
        effects: &mut Effects,
    ) {
        state.counters.tickets_reserved -= 1;
        state.counters.tickets_available += 1;
        state.seats.insert(ticket_id, SeatState::Released);
        state.timestamps.updated_at = now;

        if state.status == ShowStatus::BoxOfficeClosed && state.counters.tickets_available > 0 {
            state.status = ShowStatus::BoxOfficeOpen;
            effects.push(Effect::Log(Self::log(state, ShowEventKind::BoxOfficeReopened, now)));
        }
    }

    /// Counts one outstanding seat as settled during cancellation
    fn settle(state: &mut Show, now: DateTime<Utc>, effects: &mut Effects) {
        if state.status != ShowStatus::Waiting4Refund {
            return;
        }
        if let Some(cancellation) = state.cancellation.as_mut() {
            cancellation.settled += 1;
        }
        Self::complete_cancellation(state, now, effects);
    }

    fn complete_cancellation(state: &mut Show, now: DateTime<Utc>, effects: &mut Effects) {
        if state.status == ShowStatus::Waiting4Refund && state.fully_refunded() {
            state.status = ShowStatus::Cancelled;
            state.timestamps.cancelled_at = Some(now);
            state.timestamps.updated_at = now;
            effects.push(Effect::Log(
                Self::log(state, ShowEventKind::ShowCancelled, now).with_payload(json!({
                    "total_refunded": state.counters.total_refunded,
                })),
            ));
        }
    }

    fn reserve(
        state: &mut Show,
        ticket_id: TicketId,
        seat_claimed: bool,
        now: DateTime<Utc>,
    ) -> Result<Effects, Rejection> {
        if state.seats.contains_key(&ticket_id) {
            return Ok(Effects::new());
        }
        let selling =
            matches!(state.status, ShowStatus::BoxOfficeOpen | ShowStatus::BoxOfficeClosed);
        if seat_claimed {
            // The store already moved the counters
            if !selling || state.unrecorded_claims() == 0 {
                return Err(Self::reject(state, "TICKET_RESERVED", "transition"));
            }
        } else {
            if selling && state.counters.tickets_available == 0 {
                return Err(Rejection::InventoryExhausted { show_id: state.id });
            }
            Self::ensure(state, "TICKET_RESERVED")?;
            state.counters.tickets_available -= 1;
            state.counters.tickets_reserved += 1;
        }

        state.seats.insert(ticket_id, SeatState::Reserved);
        state.timestamps.updated_at = now;

        let mut effects: Effects = smallvec![Effect::Log(
            Self::log(state, ShowEventKind::TicketReserved, now)
                .with_ticket(ticket_id)
                .with_payload(Self::counters_payload(state)),
        )];

        if state.status == ShowStatus::BoxOfficeOpen && state.counters.tickets_available == 0 {
            state.status = ShowStatus::BoxOfficeClosed;
            state.timestamps.box_office_closed_at = Some(now);
            effects.push(Effect::Log(Self::log(state, ShowEventKind::BoxOfficeClosed, now)));
        }
        Ok(effects)
    }

    fn ticket_released(
        state: &mut Show,
        event: &'static str,
        ticket_id: TicketId,
        now: DateTime<Utc>,
    ) -> Result<Effects, Rejection> {
        Self::ensure(state, event)?;
        let mut effects = Effects::new();
        match state.seats.get(&ticket_id).copied() {
            Some(SeatState::Reserved) => Self::release_seat(state, ticket_id, now, &mut effects),
            // A paid seat stays sold until its refund arrives
            Some(SeatState::Sold | SeatState::Redeemed) if event == "TICKET_CANCELLED" => {},
            _ => return Ok(effects),
        }
        effects.push(Effect::Log(
            Self::log(state, ShowEventKind::TicketCancelled, now)
                .with_ticket(ticket_id)
                .with_payload(json!({ "event": event })),
        ));
        Ok(effects)
    }

    /// Returns a seat the store handed out for a ticket that never got a
    /// seat record. A recorded seat is released the usual way.
    fn claim_released(
        state: &mut Show,
        ticket_id: TicketId,
        now: DateTime<Utc>,
    ) -> Result<Effects, Rejection> {
        Self::ensure(state, "CLAIM_RELEASED")?;
        let mut effects = Effects::new();
        match state.seats.get(&ticket_id).copied() {
            Some(SeatState::Reserved) => Self::release_seat(state, ticket_id, now, &mut effects),
            None if state.unrecorded_claims() > 0 => {
                Self::return_to_inventory(state, ticket_id, now, &mut effects);
            },
            _ => return Ok(effects),
        }
        effects.push(Effect::Log(
            Self::log(state, ShowEventKind::TicketCancelled, now)
                .with_ticket(ticket_id)
                .with_payload(json!({ "event": "CLAIM_RELEASED" })),
        ));
        Ok(effects)
    }

    fn sold(
        state: &mut Show,
        ticket_id: TicketId,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Result<Effects, Rejection> {
        Self::ensure(state, "TICKET_SOLD")?;
        match state.seats.get(&ticket_id).copied() {
            Some(SeatState::Sold | SeatState::Redeemed | SeatState::Refunded) => {
                return Ok(Effects::new());
            },
            Some(SeatState::Released) | None => {
                return Err(Self::reject(state, "TICKET_SOLD", "seatHeld"));
            },
            Some(SeatState::Reserved) => {},
        }

        state.counters.tickets_reserved -= 1;
        state.counters.tickets_sold += 1;
        state.counters.total_sales = state.counters.total_sales.saturating_add(amount);
        state.seats.insert(ticket_id, SeatState::Sold);
        state.timestamps.updated_at = now;

        Ok(smallvec![Effect::Log(
            Self::log(state, ShowEventKind::TicketSold, now)
                .with_ticket(ticket_id)
                .with_payload(json!({ "amount": amount })),
        )])
    }

    fn refunded(
        state: &mut Show,
        ticket_id: TicketId,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Result<Effects, Rejection> {
        Self::ensure(state, "TICKET_REFUNDED")?;
        let seat = state.seats.get(&ticket_id).copied();
        if seat == Some(SeatState::Refunded) {
            return Ok(Effects::new());
        }

        let mut effects = Effects::new();
        match seat {
            Some(SeatState::Reserved) => Self::release_seat(state, ticket_id, now, &mut effects),
            Some(SeatState::Sold | SeatState::Redeemed) => {
                state.counters.tickets_refunded += 1;
            },
            // Released reservations were settled when released
            _ => {},
        }
        state.counters.total_refunded = state.counters.total_refunded.saturating_add(amount);
        state.seats.insert(ticket_id, SeatState::Refunded);
        state.timestamps.updated_at = now;
        effects.push(Effect::Log(
            Self::log(state, ShowEventKind::TicketRefunded, now)
                .with_ticket(ticket_id)
                .with_payload(json!({ "amount": amount })),
        ));
        if matches!(seat, Some(SeatState::Sold | SeatState::Redeemed)) {
            Self::settle(state, now, &mut effects);
        }
        Ok(effects)
    }

    fn redeemed(
        state: &mut Show,
        ticket_id: TicketId,
        now: DateTime<Utc>,
    ) -> Result<Effects, Rejection> {
        Self::ensure(state, "TICKET_REDEEMED")?;
        match state.seats.get(&ticket_id).copied() {
            Some(SeatState::Redeemed) => Ok(Effects::new()),
            Some(SeatState::Sold) => {
                state.seats.insert(ticket_id, SeatState::Redeemed);
                state.counters.tickets_redeemed += 1;
                state.timestamps.updated_at = now;
                Ok(Effects::new())
            },
            _ => Err(Self::reject(state, "TICKET_REDEEMED", "seatHeld")),
        }
    }

    fn disputed(
        state: &mut Show,
        ticket_id: TicketId,
        now: DateTime<Utc>,
    ) -> Result<Effects, Rejection> {
        Self::ensure(state, "TICKET_DISPUTED")?;
        if !state.disputes.insert(ticket_id) {
            return Ok(Effects::new());
        }
        state.status = ShowStatus::InDispute;
        state.timestamps.updated_at = now;
        Ok(smallvec![Effect::Log(
            Self::log(state, ShowEventKind::TicketDisputed, now).with_ticket(ticket_id)
        )])
    }

    fn dispute_resolved(
        state: &mut Show,
        ticket_id: TicketId,
        now: DateTime<Utc>,
    ) -> Result<Effects, Rejection> {
        Self::ensure(state, "DISPUTE_RESOLVED")?;
        if !state.disputes.remove(&ticket_id) {
            return Ok(Effects::new());
        }
        if state.disputes.is_empty() {
            state.status = ShowStatus::InEscrow;
        }
        state.timestamps.updated_at = now;
        Ok(smallvec![Effect::Log(
            Self::log(state, ShowEventKind::DisputeResolved, now).with_ticket(ticket_id)
        )])
    }

    fn started(state: &mut Show, now: DateTime<Utc>) -> Result<Effects, Rejection> {
        if state.status == ShowStatus::Started {
            return Ok(Effects::new());
        }
        Self::ensure(state, "SHOW_STARTED")?;
        state.status = ShowStatus::Started;
        state.timestamps.started_at = Some(now);
        state.timestamps.updated_at = now;

        let mut effects = Effects::new();
        if state.duration_minutes > 0 {
            let running_time = Duration::from_secs(u64::from(state.duration_minutes) * 60);
            effects.push(Effect::Schedule(
                JobRequest::after(JobKey::show(state.id, "SHOW_STOPPED"), running_time)
                    .expecting(ShowStatus::Started.tag()),
            ));
        }
        effects.push(Effect::Log(
            Self::log(state, ShowEventKind::ShowStarted, now)
                .with_payload(Self::counters_payload(state)),
        ));
        Ok(effects)
    }

    fn stopped(
        state: &mut Show,
        env: &MachineEnvironment,
        now: DateTime<Utc>,
    ) -> Result<Effects, Rejection> {
        if state.status == ShowStatus::Stopped {
            return Ok(Effects::new());
        }
        Self::ensure(state, "SHOW_STOPPED")?;
        state.status = ShowStatus::Stopped;
        state.timestamps.stopped_at = Some(now);
        state.timestamps.updated_at = now;

        Ok(smallvec![
            Effect::CancelJob(JobKey::show(state.id, "SHOW_STOPPED")),
            Effect::Schedule(
                JobRequest::after(JobKey::show(state.id, "SHOW_ENDED"), env.timers.grace_period)
                    .expecting(ShowStatus::Stopped.tag()),
            ),
            Effect::Log(Self::log(state, ShowEventKind::ShowStopped, now)),
        ])
    }

    fn ended(
        state: &mut Show,
        env: &MachineEnvironment,
        now: DateTime<Utc>,
    ) -> Result<Effects, Rejection> {
        if state.status.is_ended() {
            return Ok(Effects::new());
        }
        Self::ensure(state, "SHOW_ENDED")?;
        state.status = ShowStatus::InEscrow;
        state.timestamps.ended_at = Some(now);
        state.timestamps.updated_at = now;

        let mut effects: Effects = smallvec![
            Effect::CancelJob(JobKey::show(state.id, "SHOW_STOPPED")),
            Effect::CancelJob(JobKey::show(state.id, "SHOW_ENDED")),
            Effect::Schedule(
                JobRequest::after(
                    JobKey::show(state.id, "SHOW_FINALIZED"),
                    env.timers.escrow_period,
                )
                .expecting(ShowStatus::InEscrow.tag()),
            ),
        ];
        effects.extend(
            state
                .seats
                .iter()
                .filter(|(_, seat)| matches!(seat, SeatState::Sold | SeatState::Redeemed))
                .map(|(ticket_id, _)| Effect::to_ticket(*ticket_id, TicketAction::ShowEnded)),
        );
        effects.push(Effect::Log(
            Self::log(state, ShowEventKind::ShowEnded, now)
                .with_payload(Self::counters_payload(state)),
        ));
        Ok(effects)
    }

    fn cancellation_initiated(
        state: &mut Show,
        reason: CancellationReason,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Effects, Rejection> {
        if matches!(state.status, ShowStatus::Waiting4Refund | ShowStatus::Cancelled) {
            return Ok(Effects::new());
        }
        Self::ensure(state, "CANCELLATION_INITIATED")?;

        let outstanding: Vec<TicketId> = state.outstanding_tickets().collect();
        let count = u32::try_from(outstanding.len()).unwrap_or(u32::MAX);
        state.cancellation = Some(ShowCancellation {
            reason: reason.clone(),
            cancelled_by: actor,
            cancelled_in: state.status,
            outstanding: count,
            settled: 0,
            initiated_at: now,
        });
        state.status = ShowStatus::Waiting4Refund;
        state.timestamps.updated_at = now;

        let mut effects: Effects = smallvec![
            Effect::CancelJob(JobKey::show(state.id, "SHOW_STOPPED")),
            Effect::CancelJob(JobKey::show(state.id, "SHOW_ENDED")),
            Effect::CancelJob(JobKey::show(state.id, "SHOW_FINALIZED")),
            Effect::Log(
                Self::log(state, ShowEventKind::CancellationInitiated, now).with_payload(json!({
                    "reason": reason,
                    "actor": actor.as_str(),
                    "outstanding": count,
                })),
            ),
        ];
        effects.extend(outstanding.into_iter().map(|ticket_id| {
            Effect::to_ticket(
                ticket_id,
                TicketAction::ShowCancelled {
                    reason: reason.clone(),
                    actor,
                },
            )
        }));
        Self::complete_cancellation(state, now, &mut effects);
        Ok(effects)
    }
}

impl Reducer for ShowMachine {
    type State = Show;
    type Action = ShowAction;
    type Environment = MachineEnvironment;

    fn reduce(
        &self,
        state: &mut Show,
        action: ShowAction,
        env: &MachineEnvironment,
    ) -> Result<Effects, Rejection> {
        let now = env.now();
        match action {
            // ========== Inventory ==========
            ShowAction::TicketReserved {
                ticket_id,
                seat_claimed,
            } => Self::reserve(state, ticket_id, seat_claimed, now),
            ShowAction::TicketReservationTimeout { ticket_id } => {
                Self::ticket_released(state, "TICKET_RESERVATION_TIMEOUT", ticket_id, now)
            },
            ShowAction::TicketCancelled { ticket_id } => {
                Self::ticket_released(state, "TICKET_CANCELLED", ticket_id, now)
            },
            ShowAction::ClaimReleased { ticket_id } => Self::claim_released(state, ticket_id, now),
            ShowAction::TicketSold { ticket_id, amount } => {
                Self::sold(state, ticket_id, amount, now)
            },
            ShowAction::TicketRefunded { ticket_id, amount } => {
                Self::refunded(state, ticket_id, amount, now)
            },
            ShowAction::TicketRedeemed { ticket_id } => Self::redeemed(state, ticket_id, now),
            ShowAction::CloseBoxOffice => {
                Self::ensure(state, "BOX_OFFICE_CLOSED")?;
                state.status = ShowStatus::BoxOfficeClosed;
                state.timestamps.box_office_closed_at = Some(now);
                state.timestamps.updated_at = now;
                Ok(smallvec![Effect::Log(Self::log(state, ShowEventKind::BoxOfficeClosed, now))])
            },

            // ========== Running ==========
            ShowAction::ShowStarted => Self::started(state, now),
            ShowAction::ShowStopped => Self::stopped(state, env, now),
            ShowAction::ShowEnded => Self::ended(state, env, now),

            // ========== Settlement ==========
            ShowAction::TicketDisputed { ticket_id } => Self::disputed(state, ticket_id, now),
            ShowAction::DisputeResolved { ticket_id } => {
                Self::dispute_resolved(state, ticket_id, now)
            },
            ShowAction::ShowFinalized => {
                Self::ensure(state, "SHOW_FINALIZED")?;
                state.status = ShowStatus::Finalized;
                state.timestamps.finalized_at = Some(now);
                state.timestamps.updated_at = now;
                Ok(smallvec![Effect::Log(
                    Self::log(state, ShowEventKind::ShowFinalized, now).with_payload(json!({
                        "total_sales": state.counters.total_sales,
                        "total_refunded": state.counters.total_refunded,
                    })),
                )])
            },
            ShowAction::CancellationInitiated { reason, actor } => {
                Self::cancellation_initiated(state, reason, actor, now)
            },
        }
    }
}

//! Ticket machine: one customer's seat from reservation to settlement.
//!
//! ```text
//! reserved.waiting4Payment → reserved.waiting4Show → redeemed
//!        │                          │                   │
//!        │                          ▼                   ▼
//!        │                 ended.missedShow      ended.inEscrow ⇄ ended.inDispute
//!        │                          └──────── finalized ◄──┘
//!        ▼
//! cancelled.waiting4Refund → cancelled
//! ```
//!
//! Payments and refunds are deduplicated by external transaction reference, so
//! a webhook delivered twice never moves money twice.

use crate::effect::{Effect, Effects};
use crate::environment::MachineEnvironment;
use crate::error::Rejection;
use crate::event_log::{ShowEventKind, ShowLogEntry};
use crate::job::{ISSUE_REFUND, JobKey, JobRequest};
use crate::reducer::{Lifecycle, Reducer};
use crate::show::{ShowAction, ShowStatus};
use crate::types::{
    Actor, CancellationReason, InvoiceId, Money, PayoutId, ShowId, TicketId, TransactionId,
};
use boxoffice_macros::MachineEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use smallvec::smallvec;
use std::collections::BTreeSet;

// ============================================================================
// Snapshot
// ============================================================================

/// Lifecycle status of a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TicketStatus {
    /// Seat held, invoice open
    Waiting4Payment,
    /// Paid in full
    Waiting4Show,
    /// Holder joined the show
    Redeemed,
    /// Show ended without the holder joining
    MissedShow,
    /// Show ended after the holder joined
    InEscrow,
    /// Holder disputed the show
    InDispute,
    /// Feedback received; settled
    Finalized,
    /// Cancelled with money still to return
    Waiting4Refund,
    /// Cancelled and settled
    Cancelled,
}

impl TicketStatus {
    /// State tag used in views, job hints and rejections
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Waiting4Payment => "reserved.waiting4Payment",
            Self::Waiting4Show => "reserved.waiting4Show",
            Self::Redeemed => "redeemed",
            Self::MissedShow => "ended.missedShow",
            Self::InEscrow => "ended.inEscrow",
            Self::InDispute => "ended.inDispute",
            Self::Finalized => "finalized",
            Self::Waiting4Refund => "cancelled.waiting4Refund",
            Self::Cancelled => "cancelled",
        }
    }

    /// In one of the `ended.*` states
    #[must_use]
    pub const fn is_ended(self) -> bool {
        matches!(self, Self::MissedShow | Self::InEscrow | Self::InDispute)
    }

    /// In `cancelled` or `cancelled.waiting4Refund`
    #[must_use]
    pub const fn is_cancelled(self) -> bool {
        matches!(self, Self::Waiting4Refund | Self::Cancelled)
    }
}

/// Money movements of a ticket
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketPayment {
    /// Gateway invoice the customer pays
    pub invoice_id: Option<InvoiceId>,
    /// Sum of settled payments
    pub total_paid: Money,
    /// Sum of settled refunds
    pub total_refunded: Money,
    /// Settled payment references
    pub transactions: BTreeSet<TransactionId>,
    /// Settled refund references
    pub refund_transactions: BTreeSet<TransactionId>,
    /// Refund payout in flight
    pub payout_id: Option<PayoutId>,
}

impl TicketPayment {
    /// Money still owed back to the customer
    #[must_use]
    pub const fn refund_due(&self) -> Money {
        self.total_paid.saturating_sub(self.total_refunded)
    }
}

/// Cancellation record of a ticket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketCancellation {
    /// Why
    pub reason: CancellationReason,
    /// Who
    pub cancelled_by: Actor,
    /// State the ticket was in
    pub cancelled_in: TicketStatus,
    /// When
    pub requested_at: DateTime<Utc>,
}

/// Dispute raised by the holder
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketDispute {
    /// Holder's complaint
    pub reason: String,
    /// When it was opened
    pub opened_at: DateTime<Utc>,
    /// When it was closed
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Post-show feedback
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    /// 1 to 5
    pub rating: u8,
    /// Free text
    pub comment: Option<String>,
    /// When it was submitted
    pub submitted_at: DateTime<Utc>,
}

/// Lifecycle timestamps
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct TicketTimestamps {
    pub reserved_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Ticket snapshot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Identity
    pub id: TicketId,
    /// Show the seat belongs to
    pub show_id: ShowId,
    /// Name the holder booked under
    pub customer_name: String,
    /// Price at reservation time
    pub price: Money,
    /// Hash of the holder's access pin, computed by the caller
    pub pin_hash: Option<String>,
    /// Current status
    pub status: TicketStatus,
    /// Money movements
    pub payment: TicketPayment,
    /// Present once cancelled
    pub cancellation: Option<TicketCancellation>,
    /// Present once disputed
    pub dispute: Option<TicketDispute>,
    /// Present once finalized
    pub feedback: Option<Feedback>,
    /// Lifecycle timestamps
    pub timestamps: TicketTimestamps,
}

/// Customer input for a reservation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTicket {
    /// Name to book under
    pub customer_name: String,
    /// Hash of an access pin
    #[serde(default)]
    pub pin_hash: Option<String>,
}

impl Ticket {
    /// Builds the snapshot of a fresh reservation.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::InvalidInput`] for an empty customer name.
    pub fn reserve(
        id: TicketId,
        show_id: ShowId,
        price: Money,
        new: NewTicket,
        invoice_id: Option<InvoiceId>,
        now: DateTime<Utc>,
    ) -> Result<Self, Rejection> {
        if new.customer_name.trim().is_empty() {
            return Err(Rejection::InvalidInput("customer name must not be empty".into()));
        }
        Ok(Self {
            id,
            show_id,
            customer_name: new.customer_name,
            price,
            pin_hash: new.pin_hash,
            status: TicketStatus::Waiting4Payment,
            payment: TicketPayment {
                invoice_id,
                ..TicketPayment::default()
            },
            cancellation: None,
            dispute: None,
            feedback: None,
            timestamps: TicketTimestamps {
                reserved_at: now,
                updated_at: now,
                paid_at: None,
                redeemed_at: None,
                ended_at: None,
                finalized_at: None,
                cancelled_at: None,
            },
        })
    }

    /// `fullyRefunded`: every paid cent went back
    #[must_use]
    pub fn fully_refunded(&self) -> bool {
        self.payment.total_refunded >= self.payment.total_paid
    }

    /// Read-only projection for UI/API consumers
    #[must_use]
    pub fn describe(&self) -> TicketView {
        TicketView {
            id: self.id,
            show_id: self.show_id,
            customer_name: self.customer_name.clone(),
            status: self.status.tag(),
            price: self.price,
            total_paid: self.payment.total_paid,
            total_refunded: self.payment.total_refunded,
            invoice_id: self.payment.invoice_id.clone(),
            payout_id: self.payment.payout_id.clone(),
            cancellation: self.cancellation.clone(),
            dispute: self.dispute.clone(),
            feedback: self.feedback.clone(),
            timestamps: self.timestamps.clone(),
        }
    }
}

/// `describe(snapshot)` projection of a ticket; the pin hash is left out
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct TicketView {
    pub id: TicketId,
    pub show_id: ShowId,
    pub customer_name: String,
    pub status: &'static str,
    pub price: Money,
    pub total_paid: Money,
    pub total_refunded: Money,
    pub invoice_id: Option<InvoiceId>,
    pub payout_id: Option<PayoutId>,
    pub cancellation: Option<TicketCancellation>,
    pub dispute: Option<TicketDispute>,
    pub feedback: Option<Feedback>,
    pub timestamps: TicketTimestamps,
}

// ============================================================================
// Events
// ============================================================================

/// Events the ticket machine accepts
#[derive(MachineEvent, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketAction {
    /// A payment settled against the ticket's invoice
    PaymentReceived {
        /// External payment reference
        transaction_id: TransactionId,
        /// Amount of this payment
        amount: Money,
    },
    /// Holder joined the live show. `show_status` is filled in by the facade.
    JoinedShow {
        /// Status of the correlated show
        #[serde(default)]
        show_status: Option<ShowStatus>,
    },
    /// Holder left the live show
    LeftShow {
        /// Status of the correlated show
        #[serde(default)]
        show_status: Option<ShowStatus>,
    },
    /// Broadcast by the show when it ends
    ShowEnded,
    /// Holder disputes the show
    DisputeInitiated {
        /// Complaint
        reason: String,
    },
    /// Dispute closed by an operator
    DisputeResolved,
    /// Holder rated the show
    FeedbackReceived {
        /// 1 to 5
        rating: u8,
        /// Free text
        #[serde(default)]
        comment: Option<String>,
    },
    /// Holder (or the gateway on expiry) asks to cancel
    RequestCancellation {
        /// Why
        reason: CancellationReason,
        /// Who
        actor: Actor,
    },
    /// Broadcast by the show when it is called off
    ShowCancelled {
        /// Why the show was cancelled
        reason: CancellationReason,
        /// Who cancelled the show
        actor: Actor,
    },
    /// Refund payout started at the gateway
    RefundIssued {
        /// Gateway payout id
        payout_id: PayoutId,
    },
    /// A refund settled
    RefundReceived {
        /// External refund reference
        transaction_id: TransactionId,
        /// Amount of this refund
        amount: Money,
    },
    /// Reservation timer fired
    ReservationTimeout,
}

// ============================================================================
// Transition table
// ============================================================================

impl Lifecycle for Ticket {
    fn state_tag(&self) -> &'static str {
        self.status.tag()
    }

    fn can_transition(&self, event: &str) -> bool {
        use TicketStatus::{
            Cancelled, Finalized, InDispute, InEscrow, MissedShow, Redeemed, Waiting4Payment,
            Waiting4Refund, Waiting4Show,
        };
        match (event, self.status) {
            ("PAYMENT_RECEIVED", Waiting4Payment | Waiting4Refund | Cancelled)
            | ("RESERVATION_TIMEOUT", Waiting4Payment)
            | ("JOINED_SHOW" | "LEFT_SHOW", Waiting4Show | Redeemed)
            | ("DISPUTE_INITIATED", InEscrow)
            | ("DISPUTE_RESOLVED", InDispute)
            | ("FEEDBACK_RECEIVED", MissedShow | InEscrow | InDispute)
            | ("REQUEST_CANCELLATION", Waiting4Payment | Waiting4Show)
            | ("REFUND_ISSUED" | "REFUND_RECEIVED", Waiting4Refund) => true,
            (
                "SHOW_ENDED",
                Waiting4Show | Redeemed | MissedShow | InEscrow | InDispute | Finalized,
            ) => true,
            ("SHOW_CANCELLED", status) => !status.is_cancelled(),
            _ => false,
        }
    }
}

fn guard_for(event: &str) -> &'static str {
    match event {
        "JOINED_SHOW" | "LEFT_SHOW" => "canWatchShow",
        "REQUEST_CANCELLATION" => "canRequestCancellation",
        "PAYMENT_RECEIVED" => "awaitingPayment",
        _ => "transition",
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer of the ticket machine
#[derive(Clone, Copy, Debug, Default)]
pub struct TicketMachine;

/// How the show learns about a cancellation
#[derive(Clone, Copy)]
enum ShowNotice {
    Cancelled,
    TimedOut,
}

impl TicketMachine {
    /// Creates the ticket machine
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn ensure(state: &Ticket, event: &'static str) -> Result<(), Rejection> {
        if state.can_transition(event) {
            Ok(())
        } else {
            Err(Self::reject(state, event, guard_for(event)))
        }
    }

    const fn reject(state: &Ticket, event: &'static str, guard: &'static str) -> Rejection {
        Rejection::GuardRejected {
            machine: "ticket",
            event,
            state: state.status.tag(),
            guard,
        }
    }

    fn to_show(state: &Ticket, action: ShowAction) -> Effect {
        Effect::to_show(state.show_id, action)
    }

    fn payment_received(
        state: &mut Ticket,
        transaction_id: TransactionId,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Result<Effects, Rejection> {
        if state.payment.transactions.contains(&transaction_id) {
            return Ok(Effects::new());
        }
        Self::ensure(state, "PAYMENT_RECEIVED")?;
        if amount.is_zero() {
            return Err(Rejection::InvalidInput("payment amount must be positive".into()));
        }

        state.payment.transactions.insert(transaction_id);
        state.payment.total_paid = state.payment.total_paid.saturating_add(amount);
        state.timestamps.updated_at = now;

        if state.status.is_cancelled() {
            return Ok(Self::late_payment(state));
        }
        if state.payment.total_paid < state.price {
            return Ok(Effects::new());
        }

        state.status = TicketStatus::Waiting4Show;
        state.timestamps.paid_at = Some(now);
        Ok(smallvec![
            Effect::CancelJob(JobKey::ticket(state.id, "RESERVATION_TIMEOUT")),
            Self::to_show(
                state,
                ShowAction::TicketSold {
                    ticket_id: state.id,
                    amount: state.payment.total_paid,
                },
            ),
        ])
    }

    /// Money that lands after the ticket was cancelled is owed straight back
    fn late_payment(state: &mut Ticket) -> Effects {
        state.status = TicketStatus::Waiting4Refund;
        state.timestamps.cancelled_at = None;
        smallvec![Effect::Schedule(
            JobRequest::immediate(JobKey::ticket(state.id, ISSUE_REFUND))
                .expecting(TicketStatus::Waiting4Refund.tag()),
        )]
    }

    fn watch(
        state: &mut Ticket,
        event: &'static str,
        show_status: Option<ShowStatus>,
        now: DateTime<Utc>,
    ) -> Result<Effects, Rejection> {
        Self::ensure(state, event)?;
        if show_status != Some(ShowStatus::Started) {
            return Err(Self::reject(state, event, "canWatchShow"));
        }

        let mut effects = Effects::new();
        let kind = if event == "JOINED_SHOW" {
            if state.status == TicketStatus::Waiting4Show {
                state.status = TicketStatus::Redeemed;
                state.timestamps.redeemed_at = Some(now);
                state.timestamps.updated_at = now;
                effects.push(Self::to_show(
                    state,
                    ShowAction::TicketRedeemed { ticket_id: state.id },
                ));
            }
            ShowEventKind::CustomerJoined
        } else {
            ShowEventKind::CustomerLeft
        };
        effects.push(Effect::Log(
            ShowLogEntry::new(state.show_id, kind, now)
                .with_ticket(state.id)
                .with_payload(json!({ "customer_name": state.customer_name })),
        ));
        Ok(effects)
    }

    fn show_ended(state: &mut Ticket, now: DateTime<Utc>) -> Result<Effects, Rejection> {
        Self::ensure(state, "SHOW_ENDED")?;
        let next = match state.status {
            TicketStatus::Waiting4Show => TicketStatus::MissedShow,
            TicketStatus::Redeemed => TicketStatus::InEscrow,
            _ => return Ok(Effects::new()),
        };
        state.status = next;
        state.timestamps.ended_at = Some(now);
        state.timestamps.updated_at = now;
        Ok(Effects::new())
    }

    fn dispute_initiated(
        state: &mut Ticket,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<Effects, Rejection> {
        Self::ensure(state, "DISPUTE_INITIATED")?;
        state.status = TicketStatus::InDispute;
        state.dispute = Some(TicketDispute {
            reason,
            opened_at: now,
            resolved_at: None,
        });
        state.timestamps.updated_at = now;
        Ok(smallvec![Self::to_show(
            state,
            ShowAction::TicketDisputed { ticket_id: state.id },
        )])
    }

    fn close_dispute(state: &mut Ticket, now: DateTime<Utc>) -> Effect {
        if let Some(dispute) = state.dispute.as_mut() {
            dispute.resolved_at = Some(now);
        }
        Self::to_show(state, ShowAction::DisputeResolved { ticket_id: state.id })
    }

    fn feedback_received(
        state: &mut Ticket,
        rating: u8,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Effects, Rejection> {
        Self::ensure(state, "FEEDBACK_RECEIVED")?;
        if !(1..=5).contains(&rating) {
            return Err(Rejection::InvalidInput(format!("rating {rating} is outside 1..=5")));
        }

        let mut effects = Effects::new();
        if state.status == TicketStatus::InDispute {
            effects.push(Self::close_dispute(state, now));
        }
        state.status = TicketStatus::Finalized;
        state.feedback = Some(Feedback {
            rating,
            comment,
            submitted_at: now,
        });
        state.timestamps.finalized_at = Some(now);
        state.timestamps.updated_at = now;
        Ok(effects)
    }

    /// Moves into `cancelled` or `cancelled.waiting4Refund` and tells the show
    fn cancel(
        state: &mut Ticket,
        reason: CancellationReason,
        actor: Actor,
        notice: ShowNotice,
        now: DateTime<Utc>,
    ) -> Effects {
        state.cancellation = Some(TicketCancellation {
            reason,
            cancelled_by: actor,
            cancelled_in: state.status,
            requested_at: now,
        });
        state.timestamps.updated_at = now;

        let ticket_id = state.id;
        let notice = match notice {
            ShowNotice::Cancelled => ShowAction::TicketCancelled { ticket_id },
            ShowNotice::TimedOut => ShowAction::TicketReservationTimeout { ticket_id },
        };
        let mut effects: Effects = smallvec![
            Effect::CancelJob(JobKey::ticket(ticket_id, "RESERVATION_TIMEOUT")),
            Self::to_show(state, notice),
        ];

        if state.payment.refund_due().is_zero() {
            state.status = TicketStatus::Cancelled;
            state.timestamps.cancelled_at = Some(now);
        } else {
            state.status = TicketStatus::Waiting4Refund;
            effects.push(Effect::Schedule(
                JobRequest::immediate(JobKey::ticket(ticket_id, ISSUE_REFUND))
                    .expecting(TicketStatus::Waiting4Refund.tag()),
            ));
        }
        effects
    }

    fn refund_received(
        state: &mut Ticket,
        transaction_id: TransactionId,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Result<Effects, Rejection> {
        if state.payment.refund_transactions.contains(&transaction_id) {
            return Ok(Effects::new());
        }
        Self::ensure(state, "REFUND_RECEIVED")?;

        state.payment.refund_transactions.insert(transaction_id);
        state.payment.total_refunded = state.payment.total_refunded.saturating_add(amount);
        state.timestamps.updated_at = now;

        if !state.fully_refunded() {
            return Ok(Effects::new());
        }
        state.status = TicketStatus::Cancelled;
        state.timestamps.cancelled_at = Some(now);
        Ok(smallvec![Self::to_show(
            state,
            ShowAction::TicketRefunded {
                ticket_id: state.id,
                amount: state.payment.total_refunded,
            },
        )])
    }
}

impl Reducer for TicketMachine {
    type State = Ticket;
    type Action = TicketAction;
    type Environment = MachineEnvironment;

    fn reduce(
        &self,
        state: &mut Ticket,
        action: TicketAction,
        env: &MachineEnvironment,
    ) -> Result<Effects, Rejection> {
        let now = env.now();
        match action {
            TicketAction::PaymentReceived {
                transaction_id,
                amount,
            } => Self::payment_received(state, transaction_id, amount, now),
            TicketAction::JoinedShow { show_status } => {
                Self::watch(state, "JOINED_SHOW", show_status, now)
            },
            TicketAction::LeftShow { show_status } => {
                Self::watch(state, "LEFT_SHOW", show_status, now)
            },
            TicketAction::ShowEnded => Self::show_ended(state, now),
            TicketAction::DisputeInitiated { reason } => {
                Self::dispute_initiated(state, reason, now)
            },
            TicketAction::DisputeResolved => {
                Self::ensure(state, "DISPUTE_RESOLVED")?;
                let notice = Self::close_dispute(state, now);
                state.status = TicketStatus::InEscrow;
                state.timestamps.updated_at = now;
                Ok(smallvec![notice])
            },
            TicketAction::FeedbackReceived { rating, comment } => {
                Self::feedback_received(state, rating, comment, now)
            },
            TicketAction::RequestCancellation { reason, actor } => {
                Self::ensure(state, "REQUEST_CANCELLATION")?;
                Ok(Self::cancel(state, reason, actor, ShowNotice::Cancelled, now))
            },
            TicketAction::ShowCancelled { reason, actor } => {
                // The whole show is off: every holder gets their money back,
                // redeemed and finalized ones included
                if state.status.is_cancelled() {
                    return Ok(Effects::new());
                }
                Ok(Self::cancel(state, reason, actor, ShowNotice::Cancelled, now))
            },
            TicketAction::RefundIssued { payout_id } => {
                Self::ensure(state, "REFUND_ISSUED")?;
                if state.payment.payout_id.as_ref() == Some(&payout_id) {
                    return Ok(Effects::new());
                }
                state.payment.payout_id = Some(payout_id);
                state.timestamps.updated_at = now;
                Ok(Effects::new())
            },
            TicketAction::RefundReceived {
                transaction_id,
                amount,
            } => Self::refund_received(state, transaction_id, amount, now),
            TicketAction::ReservationTimeout => {
                Self::ensure(state, "RESERVATION_TIMEOUT")?;
                Ok(Self::cancel(
                    state,
                    CancellationReason::PaymentTimeout,
                    Actor::Timer,
                    ShowNotice::TimedOut,
                    now,
                ))
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::effect::Dispatch;
    use crate::environment::{Clock, TimerSettings};
    use std::sync::Arc;

    struct Frozen;

    impl Clock for Frozen {
        fn now(&self) -> DateTime<Utc> {
            DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap()
        }
    }

    fn env() -> MachineEnvironment {
        MachineEnvironment::new(Arc::new(Frozen), TimerSettings::default())
    }

    fn ticket() -> Ticket {
        Ticket::reserve(
            TicketId::new(),
            ShowId::new(),
            Money::from_cents(1000),
            NewTicket {
                customer_name: "Ada".into(),
                pin_hash: None,
            },
            Some(InvoiceId::new("inv-1")),
            env().now(),
        )
        .unwrap()
    }

    fn apply(state: &mut Ticket, action: TicketAction) -> Result<Effects, Rejection> {
        TicketMachine.reduce(state, action, &env())
    }

    fn pay(state: &mut Ticket, reference: &str, cents: u64) -> Result<Effects, Rejection> {
        apply(
            state,
            TicketAction::PaymentReceived {
                transaction_id: TransactionId::new(reference),
                amount: Money::from_cents(cents),
            },
        )
    }

    #[test]
    fn reserve_rejects_blank_customer_name() {
        let result = Ticket::reserve(
            TicketId::new(),
            ShowId::new(),
            Money::from_cents(1),
            NewTicket {
                customer_name: "  ".into(),
                pin_hash: None,
            },
            None,
            env().now(),
        );
        assert!(matches!(result, Err(Rejection::InvalidInput(_))));
    }

    #[test]
    fn partial_payments_accumulate_until_the_price_is_met() {
        let mut state = ticket();
        let effects = pay(&mut state, "tx-1", 400).unwrap();
        assert!(effects.is_empty());
        assert_eq!(state.status, TicketStatus::Waiting4Payment);

        let effects = pay(&mut state, "tx-2", 600).unwrap();
        assert_eq!(state.status, TicketStatus::Waiting4Show);
        assert!(effects.iter().any(|e| e.cancels("RESERVATION_TIMEOUT")));
        assert!(effects.contains(&Effect::to_show(
            state.show_id,
            ShowAction::TicketSold {
                ticket_id: state.id,
                amount: Money::from_cents(1000),
            },
        )));
    }

    #[test]
    fn duplicate_payment_reference_is_a_no_op_in_any_state() {
        let mut state = ticket();
        pay(&mut state, "tx-1", 1000).unwrap();
        let before = state.clone();
        let effects = pay(&mut state, "tx-1", 1000).unwrap();
        assert!(effects.is_empty());
        assert_eq!(state, before);
    }

    #[test]
    fn joining_requires_a_started_show() {
        let mut state = ticket();
        pay(&mut state, "tx-1", 1000).unwrap();

        let early = apply(
            &mut state,
            TicketAction::JoinedShow {
                show_status: Some(ShowStatus::BoxOfficeOpen),
            },
        );
        assert!(matches!(
            early,
            Err(Rejection::GuardRejected { guard: "canWatchShow", .. })
        ));

        let effects = apply(
            &mut state,
            TicketAction::JoinedShow {
                show_status: Some(ShowStatus::Started),
            },
        )
        .unwrap();
        assert_eq!(state.status, TicketStatus::Redeemed);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Dispatch(Dispatch::Show { action: ShowAction::TicketRedeemed { .. }, .. })
        )));
    }

    #[test]
    fn cancellation_is_forbidden_once_redeemed() {
        let mut state = ticket();
        pay(&mut state, "tx-1", 1000).unwrap();
        apply(
            &mut state,
            TicketAction::JoinedShow {
                show_status: Some(ShowStatus::Started),
            },
        )
        .unwrap();
        let result = apply(
            &mut state,
            TicketAction::RequestCancellation {
                reason: CancellationReason::CustomerRequested,
                actor: Actor::Customer,
            },
        );
        assert!(matches!(
            result,
            Err(Rejection::GuardRejected { guard: "canRequestCancellation", .. })
        ));
    }

    #[test]
    fn unpaid_cancellation_is_terminal_immediately() {
        let mut state = ticket();
        let effects = apply(
            &mut state,
            TicketAction::RequestCancellation {
                reason: CancellationReason::CustomerRequested,
                actor: Actor::Customer,
            },
        )
        .unwrap();
        assert_eq!(state.status, TicketStatus::Cancelled);
        assert!(!effects.iter().any(|e| e.schedules(ISSUE_REFUND)));
        assert!(!state.can_transition("RESERVATION_TIMEOUT"));
    }

    #[test]
    fn payment_after_timeout_is_owed_back() {
        let mut state = ticket();
        apply(&mut state, TicketAction::ReservationTimeout).unwrap();
        assert_eq!(state.status, TicketStatus::Cancelled);
        assert!(state.can_transition("PAYMENT_RECEIVED"));

        let effects = pay(&mut state, "tx-late", 1000).unwrap();
        assert_eq!(state.status, TicketStatus::Waiting4Refund);
        assert_eq!(state.payment.total_paid, Money::from_cents(1000));
        assert_eq!(state.payment.refund_due(), Money::from_cents(1000));
        assert!(state.timestamps.cancelled_at.is_none());
        assert!(effects.iter().any(|e| e.schedules(ISSUE_REFUND)));
        // The seat went back when the reservation lapsed
        assert!(!effects.iter().any(|e| matches!(e, Effect::Dispatch(_))));

        let effects = pay(&mut state, "tx-late", 1000).unwrap();
        assert!(effects.is_empty());
        assert_eq!(state.payment.total_paid, Money::from_cents(1000));

        apply(
            &mut state,
            TicketAction::RefundReceived {
                transaction_id: TransactionId::new("rf-late"),
                amount: Money::from_cents(1000),
            },
        )
        .unwrap();
        assert_eq!(state.status, TicketStatus::Cancelled);
    }

    #[test]
    fn payment_while_a_refund_is_pending_raises_the_amount_due() {
        let mut state = ticket();
        pay(&mut state, "tx-1", 1000).unwrap();
        apply(
            &mut state,
            TicketAction::RequestCancellation {
                reason: CancellationReason::CustomerRequested,
                actor: Actor::Customer,
            },
        )
        .unwrap();

        let effects = pay(&mut state, "tx-2", 250).unwrap();
        assert_eq!(state.status, TicketStatus::Waiting4Refund);
        assert_eq!(state.payment.refund_due(), Money::from_cents(1250));
        assert!(effects.iter().any(|e| e.schedules(ISSUE_REFUND)));
    }

    #[test]
    fn paid_cancellation_waits_for_the_full_refund() {
        let mut state = ticket();
        pay(&mut state, "tx-1", 1000).unwrap();
        let effects = apply(
            &mut state,
            TicketAction::RequestCancellation {
                reason: CancellationReason::CustomerRequested,
                actor: Actor::Customer,
            },
        )
        .unwrap();
        assert_eq!(state.status, TicketStatus::Waiting4Refund);
        assert!(effects.iter().any(|e| e.schedules(ISSUE_REFUND)));

        apply(
            &mut state,
            TicketAction::RefundReceived {
                transaction_id: TransactionId::new("rf-1"),
                amount: Money::from_cents(300),
            },
        )
        .unwrap();
        assert_eq!(state.status, TicketStatus::Waiting4Refund);

        let effects = apply(
            &mut state,
            TicketAction::RefundReceived {
                transaction_id: TransactionId::new("rf-2"),
                amount: Money::from_cents(700),
            },
        )
        .unwrap();
        assert_eq!(state.status, TicketStatus::Cancelled);
        assert_eq!(effects.len(), 1);
        assert!(state.payment.refund_due().is_zero());
    }

    #[test]
    fn reservation_timeout_only_applies_while_unpaid() {
        let mut paid = ticket();
        pay(&mut paid, "tx-1", 1000).unwrap();
        assert!(apply(&mut paid, TicketAction::ReservationTimeout).is_err());

        let mut unpaid = ticket();
        let effects = apply(&mut unpaid, TicketAction::ReservationTimeout).unwrap();
        assert_eq!(unpaid.status, TicketStatus::Cancelled);
        assert_eq!(
            unpaid.cancellation.as_ref().map(|c| c.cancelled_by),
            Some(Actor::Timer)
        );
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Dispatch(d) if d.event_name() == "TICKET_RESERVATION_TIMEOUT"
        )));
    }

    #[test]
    fn feedback_rating_is_validated() {
        let mut state = ticket();
        pay(&mut state, "tx-1", 1000).unwrap();
        apply(&mut state, TicketAction::ShowEnded).unwrap();
        assert_eq!(state.status, TicketStatus::MissedShow);

        let result = apply(
            &mut state,
            TicketAction::FeedbackReceived {
                rating: 9,
                comment: None,
            },
        );
        assert!(matches!(result, Err(Rejection::InvalidInput(_))));
        assert_eq!(state.status, TicketStatus::MissedShow);
    }

    #[test]
    fn action_names_round_trip_through_json() {
        let json = serde_json::to_value(TicketAction::ReservationTimeout).unwrap();
        assert_eq!(json, json!({ "type": "RESERVATION_TIMEOUT" }));
        assert_eq!(
            TicketAction::from_unit_name("RESERVATION_TIMEOUT"),
            Some(TicketAction::ReservationTimeout)
        );
        assert!(TicketAction::is_known("REFUND_RECEIVED"));
    }
}

//! End-to-end lifecycle tests
//!
//! Drives shows and tickets through the orchestrator, the reconciler and the
//! job dispatcher with a manual clock, checking inventory and ledger after
//! every step.

// Test code can use unwrap/expect/panic
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use boxoffice_core::{
    Actor, CancellationReason, Direction, ISSUE_REFUND, InvoiceStatus, JobKey, JobOutcome,
    JobRequest, Lifecycle, Money, Rejection, ShowAction, ShowEventKind, ShowStatus, TicketAction,
    TicketId, TicketStatus, Transaction, TransactionId,
};
use boxoffice_core::job::JobScheduler;
use boxoffice_core::persistence::{DecrementOutcome, InventoryField, SnapshotStore};
use boxoffice_core::Ledger;
use boxoffice_runtime::{Ack, Outcome, RESERVATION_TIMEOUT};
use common::{Harness, TOKEN};
use std::time::Duration;

const MINUTE: Duration = Duration::from_secs(60);

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn full_show_lifecycle_sells_one_seat_and_releases_the_other() {
    let h = Harness::new();
    let show = h.open_show(2).await;

    let paid = h.reserve(show.id, "Ada").await;
    let lapsed = h.reserve(show.id, "Grace").await;
    let after_reserving = h.show(show.id);
    assert_eq!(after_reserving.status, ShowStatus::BoxOfficeClosed);
    assert_eq!(after_reserving.counters.tickets_available, 0);
    assert_eq!(after_reserving.counters.tickets_reserved, 2);

    // Ada pays, Grace never does
    let ack = h.pay(&paid, "tx-ada", 1000).await.unwrap();
    assert_eq!(
        ack,
        Ack::Processed {
            ticket_id: paid.id,
            state: "reserved.waiting4Show",
        }
    );
    assert!(h.scheduler.find(&JobKey::ticket(paid.id, RESERVATION_TIMEOUT)).is_none());

    h.advance(15 * MINUTE);
    let delivered = h.run_jobs().await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].1, Ok(JobOutcome::Applied));
    assert_eq!(h.ticket(lapsed.id).status, TicketStatus::Cancelled);

    let reopened = h.show(show.id);
    assert_eq!(reopened.status, ShowStatus::BoxOfficeOpen);
    assert_eq!(reopened.counters.tickets_available, 1);
    assert_eq!(reopened.counters.tickets_sold, 1);

    // Live
    assert!(h.orchestrator.send_show(show.id, ShowAction::ShowStarted).await.unwrap().is_applied());
    let joined = h
        .orchestrator
        .send_ticket(paid.id, TicketAction::JoinedShow { show_status: None })
        .await
        .unwrap();
    assert_eq!(joined.snapshot().unwrap().status, TicketStatus::Redeemed);
    assert_eq!(h.show(show.id).counters.tickets_redeemed, 1);

    // Duration timer stops the show, grace timer ends it
    h.advance(60 * MINUTE);
    h.run_jobs().await;
    assert_eq!(h.show(show.id).status, ShowStatus::Stopped);

    h.advance(2 * MINUTE);
    h.run_jobs().await;
    assert_eq!(h.show(show.id).status, ShowStatus::InEscrow);
    assert_eq!(h.ticket(paid.id).status, TicketStatus::InEscrow);

    // Escrow elapses without dispute
    h.advance(Duration::from_secs(48 * 3600));
    h.run_jobs().await;
    let finalized = h.show(show.id);
    assert_eq!(finalized.status, ShowStatus::Finalized);
    assert_eq!(finalized.counters.tickets_sold, 1);
    assert_eq!(finalized.counters.tickets_available, 1);
    assert_eq!(finalized.counters.total_sales, Money::from_cents(1000));
    assert!(finalized.inventory_balanced());

    let feedback = h
        .orchestrator
        .send_ticket(
            paid.id,
            TicketAction::FeedbackReceived {
                rating: 5,
                comment: Some("great set".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(feedback.snapshot().unwrap().status, TicketStatus::Finalized);

    let kinds: Vec<ShowEventKind> = h.events.all().into_iter().map(|e| e.kind).collect();
    for expected in [
        ShowEventKind::TicketReserved,
        ShowEventKind::BoxOfficeClosed,
        ShowEventKind::TicketSold,
        ShowEventKind::BoxOfficeReopened,
        ShowEventKind::ShowStarted,
        ShowEventKind::CustomerJoined,
        ShowEventKind::ShowEnded,
        ShowEventKind::ShowFinalized,
    ] {
        assert!(kinds.contains(&expected), "missing {expected:?}");
    }
}

#[tokio::test]
async fn partial_payments_accumulate_across_webhooks() {
    let h = Harness::new();
    let show = h.open_show(1).await;
    let ticket = h.reserve(show.id, "Ada").await;

    let first = h.pay(&ticket, "tx-1", 400).await.unwrap();
    assert_eq!(
        first,
        Ack::Processed {
            ticket_id: ticket.id,
            state: "reserved.waiting4Payment",
        }
    );
    assert_eq!(h.show(show.id).counters.tickets_sold, 0);

    h.pay(&ticket, "tx-2", 600).await.unwrap();
    let stored = h.ticket(ticket.id);
    assert_eq!(stored.status, TicketStatus::Waiting4Show);
    assert_eq!(stored.payment.total_paid, Money::from_cents(1000));
    assert_eq!(h.ledger.rows().len(), 2);
    assert_eq!(h.show(show.id).counters.total_sales, Money::from_cents(1000));
}

// ============================================================================
// Timers
// ============================================================================

#[tokio::test]
async fn reservation_timeout_restores_inventory() {
    let h = Harness::new();
    let show = h.open_show(1).await;
    let ticket = h.reserve(show.id, "Ada").await;
    assert_eq!(h.show(show.id).counters.tickets_available, 0);

    h.advance(14 * MINUTE);
    assert!(h.run_jobs().await.is_empty());

    h.advance(MINUTE);
    h.run_jobs().await;

    let cancelled = h.ticket(ticket.id);
    assert_eq!(cancelled.status, TicketStatus::Cancelled);
    assert_eq!(
        cancelled.cancellation.map(|c| c.reason),
        Some(CancellationReason::PaymentTimeout)
    );
    let restored = h.show(show.id);
    assert_eq!(restored.counters.tickets_available, 1);
    assert_eq!(restored.counters.tickets_reserved, 0);
    assert_eq!(restored.status, ShowStatus::BoxOfficeOpen);
    assert!(restored.inventory_balanced());
}

#[tokio::test]
async fn late_reservation_timer_is_discarded() {
    let h = Harness::new();
    let show = h.open_show(1).await;
    let ticket = h.reserve(show.id, "Ada").await;
    h.pay(&ticket, "tx-1", 1000).await.unwrap();

    // A delivery that was already in flight when the payment landed
    h.scheduler
        .schedule(
            JobRequest::immediate(JobKey::ticket(ticket.id, RESERVATION_TIMEOUT))
                .expecting(TicketStatus::Waiting4Payment.tag()),
        )
        .await
        .unwrap();
    let delivered = h.run_jobs().await;
    assert!(matches!(delivered[0].1, Ok(JobOutcome::Discarded(_))));

    // Without the state hint the machine's guard still refuses it
    h.scheduler
        .schedule(JobRequest::immediate(JobKey::ticket(ticket.id, RESERVATION_TIMEOUT)))
        .await
        .unwrap();
    let delivered = h.run_jobs().await;
    assert!(matches!(delivered[0].1, Ok(JobOutcome::Discarded(_))));

    assert_eq!(h.ticket(ticket.id).status, TicketStatus::Waiting4Show);
    assert_eq!(h.show(show.id).counters.tickets_sold, 1);
}

#[tokio::test]
async fn host_stop_cancels_the_duration_timer() {
    let h = Harness::new();
    let show = h.open_show(1).await;
    let ticket = h.reserve(show.id, "Ada").await;
    h.pay(&ticket, "tx-1", 1000).await.unwrap();
    h.orchestrator.send_show(show.id, ShowAction::ShowStarted).await.unwrap();
    assert!(h.scheduler.find(&JobKey::show(show.id, "SHOW_STOPPED")).is_some());

    h.orchestrator.send_show(show.id, ShowAction::ShowStopped).await.unwrap();
    assert!(h.scheduler.find(&JobKey::show(show.id, "SHOW_STOPPED")).is_none());
    assert!(h.scheduler.find(&JobKey::show(show.id, "SHOW_ENDED")).is_some());

    // Never joined: the holder missed the show
    h.advance(2 * MINUTE);
    h.run_jobs().await;
    assert_eq!(h.ticket(ticket.id).status, TicketStatus::MissedShow);
}

// ============================================================================
// Disputes
// ============================================================================

#[tokio::test]
async fn dispute_holds_the_show_until_resolved() {
    let h = Harness::new();
    let show = h.open_show(1).await;
    let ticket = h.reserve(show.id, "Ada").await;
    h.pay(&ticket, "tx-1", 1000).await.unwrap();
    h.orchestrator.send_show(show.id, ShowAction::ShowStarted).await.unwrap();
    h.orchestrator
        .send_ticket(ticket.id, TicketAction::JoinedShow { show_status: None })
        .await
        .unwrap();
    h.orchestrator.send_show(show.id, ShowAction::ShowEnded).await.unwrap();

    h.orchestrator
        .send_ticket(
            ticket.id,
            TicketAction::DisputeInitiated {
                reason: "stream froze".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(h.show(show.id).status, ShowStatus::InDispute);

    // The escrow timer fires but the show is no longer in escrow
    h.advance(Duration::from_secs(48 * 3600));
    h.run_jobs().await;
    assert_eq!(h.show(show.id).status, ShowStatus::InDispute);

    h.orchestrator
        .send_ticket(ticket.id, TicketAction::DisputeResolved)
        .await
        .unwrap();
    assert_eq!(h.show(show.id).status, ShowStatus::InEscrow);
    assert_eq!(h.ticket(ticket.id).status, TicketStatus::InEscrow);
}

// ============================================================================
// Webhooks
// ============================================================================

#[tokio::test]
async fn duplicate_payment_webhook_is_idempotent() {
    let h = Harness::new();
    let show = h.open_show(2).await;
    let ticket = h.reserve(show.id, "Ada").await;

    h.pay(&ticket, "tx-1", 1000).await.unwrap();
    let again = h.pay(&ticket, "tx-1", 1000).await.unwrap();
    assert_eq!(
        again,
        Ack::Processed {
            ticket_id: ticket.id,
            state: "reserved.waiting4Show",
        }
    );

    assert_eq!(h.ledger.rows().len(), 1);
    assert_eq!(h.ticket(ticket.id).payment.total_paid, Money::from_cents(1000));
    let stored = h.show(show.id);
    assert_eq!(stored.counters.tickets_sold, 1);
    assert_eq!(stored.counters.total_sales, Money::from_cents(1000));
}

#[tokio::test]
async fn ledger_failure_leaves_the_ticket_untouched_until_redelivery() {
    let h = Harness::new();
    let show = h.open_show(1).await;
    let ticket = h.reserve(show.id, "Ada").await;

    h.ledger.set_unavailable(true);
    let error = h.pay(&ticket, "tx-1", 1000).await.unwrap_err();
    assert!(matches!(error, boxoffice_runtime::EngineError::LedgerWriteFailure(_)));
    assert!(error.is_retryable());

    let untouched = h.ticket(ticket.id);
    assert_eq!(untouched.status, TicketStatus::Waiting4Payment);
    assert!(untouched.payment.total_paid.is_zero());

    h.ledger.set_unavailable(false);
    h.pay(&ticket, "tx-1", 1000).await.unwrap();
    assert_eq!(h.ticket(ticket.id).status, TicketStatus::Waiting4Show);
    let rows = h.ledger.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].direction, Direction::Payment);
}

#[tokio::test]
async fn late_payment_is_recorded_and_refunded() {
    let h = Harness::new();
    let show = h.open_show(1).await;
    let ticket = h.reserve(show.id, "Ada").await;
    h.advance(16 * MINUTE);
    h.run_jobs().await;
    assert_eq!(h.ticket(ticket.id).status, TicketStatus::Cancelled);

    let ack = h.pay(&ticket, "tx-late", 1000).await.unwrap();
    assert_eq!(
        ack,
        Ack::Processed {
            ticket_id: ticket.id,
            state: "cancelled.waiting4Refund",
        }
    );
    assert_eq!(h.ledger.rows().len(), 1);
    let owed = h.ticket(ticket.id);
    assert_eq!(owed.payment.total_paid, Money::from_cents(1000));
    assert_eq!(owed.payment.refund_due(), Money::from_cents(1000));
    assert!(h.scheduler.find(&JobKey::ticket(ticket.id, ISSUE_REFUND)).is_some());
    // The seat stays released
    let stored = h.show(show.id);
    assert_eq!(stored.counters.tickets_sold, 0);
    assert_eq!(stored.counters.tickets_available, 1);

    h.run_jobs().await;
    let refunds = h.gateway.refunds();
    assert_eq!(refunds.len(), 1);
    let (payout_id, request) = refunds[0].clone();
    assert_eq!(request.ticket_id, ticket.id);
    assert_eq!(request.amount, Money::from_cents(1000));

    h.gateway.settle_payout(&payout_id);
    h.advance(5 * MINUTE);
    h.run_jobs().await;
    let settled = h.ticket(ticket.id);
    assert_eq!(settled.status, TicketStatus::Cancelled);
    assert_eq!(settled.payment.total_refunded, Money::from_cents(1000));
    let directions: Vec<Direction> = h.ledger.rows().into_iter().map(|r| r.direction).collect();
    assert_eq!(directions, vec![Direction::Payment, Direction::Refund]);
    assert!(h.show(show.id).inventory_balanced());
}

#[tokio::test]
async fn unverified_unknown_pending_and_expired_webhooks() {
    let h = Harness::new();
    let show = h.open_show(1).await;
    let ticket = h.reserve(show.id, "Ada").await;

    let forged = Harness::webhook(&ticket, InvoiceStatus::Complete, &[("tx-1", 1000)]);
    let ack = h.reconciler.handle_invoice_webhook("not-the-token", forged).await.unwrap();
    assert_eq!(ack, Ack::Ignored);
    assert!(h.ledger.rows().is_empty());

    let mut stranger = Harness::webhook(&ticket, InvoiceStatus::Complete, &[("tx-1", 1000)]);
    stranger.invoice_id = boxoffice_core::InvoiceId::new("inv-somebody-else");
    let ack = h.reconciler.handle_invoice_webhook(TOKEN, stranger).await.unwrap();
    assert_eq!(ack, Ack::UnknownInvoice);

    let pending = Harness::webhook(&ticket, InvoiceStatus::Pending, &[]);
    let ack = h.reconciler.handle_invoice_webhook(TOKEN, pending).await.unwrap();
    assert_eq!(ack, Ack::Pending { ticket_id: ticket.id });

    let expired = Harness::webhook(&ticket, InvoiceStatus::Expired, &[]);
    let ack = h.reconciler.handle_invoice_webhook(TOKEN, expired.clone()).await.unwrap();
    assert_eq!(
        ack,
        Ack::Processed {
            ticket_id: ticket.id,
            state: "cancelled",
        }
    );
    assert_eq!(h.show(show.id).counters.tickets_available, 1);

    // A second expiry notice finds nothing to cancel
    let ack = h.reconciler.handle_invoice_webhook(TOKEN, expired).await.unwrap();
    assert_eq!(
        ack,
        Ack::Processed {
            ticket_id: ticket.id,
            state: "cancelled",
        }
    );
    assert_eq!(h.show(show.id).counters.tickets_available, 1);
}

// ============================================================================
// Cancellation and refunds
// ============================================================================

#[tokio::test]
async fn customer_cancellation_refunds_and_is_terminal() {
    let h = Harness::new();
    let show = h.open_show(2).await;
    let ticket = h.reserve(show.id, "Ada").await;
    h.pay(&ticket, "tx-1", 1000).await.unwrap();

    let cancelled = h
        .orchestrator
        .send_ticket(
            ticket.id,
            TicketAction::RequestCancellation {
                reason: CancellationReason::CustomerRequested,
                actor: Actor::Customer,
            },
        )
        .await
        .unwrap();
    assert_eq!(cancelled.snapshot().unwrap().status, TicketStatus::Waiting4Refund);
    // A paid seat stays sold until the money is back
    assert_eq!(h.show(show.id).counters.tickets_sold, 1);

    h.run_jobs().await;
    let refunds = h.gateway.refunds();
    assert_eq!(refunds.len(), 1);
    let (payout_id, request) = refunds[0].clone();
    assert_eq!(request.amount, Money::from_cents(1000));
    assert_eq!(h.ticket(ticket.id).payment.payout_id, Some(payout_id.clone()));

    // Still pending at the first poll
    h.advance(5 * MINUTE);
    h.run_jobs().await;
    assert_eq!(h.ticket(ticket.id).status, TicketStatus::Waiting4Refund);

    h.gateway.settle_payout(&payout_id);
    h.advance(5 * MINUTE);
    h.run_jobs().await;

    let refunded = h.ticket(ticket.id);
    assert_eq!(refunded.status, TicketStatus::Cancelled);
    assert_eq!(refunded.payment.total_refunded, Money::from_cents(1000));
    assert_eq!(h.gateway.refunds().len(), 1);

    let stored = h.show(show.id);
    assert_eq!(stored.counters.tickets_refunded, 1);
    assert_eq!(stored.counters.total_refunded, Money::from_cents(1000));

    let directions: Vec<Direction> = h.ledger.rows().into_iter().map(|r| r.direction).collect();
    assert_eq!(directions, vec![Direction::Payment, Direction::Refund]);

    for event in TicketAction::NAMES {
        let allowed = h.orchestrator.can_ticket_transition(ticket.id, event).await.unwrap();
        assert_eq!(allowed, *event == "PAYMENT_RECEIVED", "{event} on a cancelled ticket");
    }
    let replay = h.pay(&ticket, "tx-1", 1000).await.unwrap();
    assert_eq!(
        replay,
        Ack::Processed {
            ticket_id: ticket.id,
            state: "cancelled",
        }
    );
    assert_eq!(h.ticket(ticket.id).payment.total_paid, Money::from_cents(1000));
}

#[tokio::test]
async fn failed_payout_is_replaced() {
    let h = Harness::new();
    let show = h.open_show(1).await;
    let ticket = h.reserve(show.id, "Ada").await;
    h.pay(&ticket, "tx-1", 1000).await.unwrap();
    h.orchestrator
        .send_ticket(
            ticket.id,
            TicketAction::RequestCancellation {
                reason: CancellationReason::CustomerRequested,
                actor: Actor::Customer,
            },
        )
        .await
        .unwrap();
    h.run_jobs().await;
    let (first, _) = h.gateway.refunds()[0].clone();

    h.gateway.fail_payout(&first, "account closed");
    h.advance(5 * MINUTE);
    h.run_jobs().await;

    // The failed poll schedules a fresh payout after the window
    h.advance(5 * MINUTE);
    h.run_jobs().await;
    let refunds = h.gateway.refunds();
    assert_eq!(refunds.len(), 2);
    let (second, _) = refunds[1].clone();
    assert_ne!(first, second);
    assert_eq!(h.ticket(ticket.id).payment.payout_id, Some(second.clone()));

    h.gateway.settle_payout(&second);
    h.advance(5 * MINUTE);
    h.run_jobs().await;
    assert_eq!(h.ticket(ticket.id).status, TicketStatus::Cancelled);
}

#[tokio::test]
async fn unpaid_cancellation_needs_no_refund() {
    let h = Harness::new();
    let show = h.open_show(1).await;
    let ticket = h.reserve(show.id, "Ada").await;

    h.orchestrator
        .send_ticket(
            ticket.id,
            TicketAction::RequestCancellation {
                reason: CancellationReason::CustomerRequested,
                actor: Actor::Customer,
            },
        )
        .await
        .unwrap();

    assert_eq!(h.ticket(ticket.id).status, TicketStatus::Cancelled);
    assert_eq!(h.show(show.id).counters.tickets_available, 1);
    assert!(h.scheduler.pending().is_empty());
    assert!(h.gateway.refunds().is_empty());
}

#[tokio::test]
async fn show_cancellation_settles_every_holder() {
    let h = Harness::with_gateway(boxoffice_testing::MockPaymentGateway::auto_settling());
    let show = h.open_show(3).await;
    let paid = h.reserve(show.id, "Ada").await;
    let unpaid = h.reserve(show.id, "Grace").await;
    h.pay(&paid, "tx-1", 1000).await.unwrap();

    let outcome = h
        .orchestrator
        .send_show(
            show.id,
            ShowAction::CancellationInitiated {
                reason: CancellationReason::HostCancelled,
                actor: Actor::Host,
            },
        )
        .await
        .unwrap();
    let cancelling = outcome.snapshot().unwrap();
    assert_eq!(cancelling.status, ShowStatus::Waiting4Refund);
    assert_eq!(cancelling.cancellation.as_ref().map(|c| c.outstanding), Some(2));

    assert_eq!(h.ticket(unpaid.id).status, TicketStatus::Cancelled);
    assert_eq!(h.ticket(paid.id).status, TicketStatus::Waiting4Refund);
    assert_eq!(h.show(show.id).status, ShowStatus::Waiting4Refund);

    h.run_jobs().await;
    h.advance(5 * MINUTE);
    h.run_jobs().await;

    assert_eq!(h.ticket(paid.id).status, TicketStatus::Cancelled);
    let cancelled = h.show(show.id);
    assert_eq!(cancelled.status, ShowStatus::Cancelled);
    assert!(cancelled.fully_refunded());
    assert_eq!(cancelled.counters.total_refunded, Money::from_cents(1000));
    assert!(!cancelled.can_transition("TICKET_RESERVED"));
}

#[tokio::test]
async fn cancelling_an_empty_show_completes_at_once() {
    let h = Harness::new();
    let show = h.open_show(3).await;
    let outcome = h
        .orchestrator
        .send_show(
            show.id,
            ShowAction::CancellationInitiated {
                reason: CancellationReason::HostCancelled,
                actor: Actor::Host,
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.snapshot().unwrap().status, ShowStatus::Cancelled);
}

// ============================================================================
// Guarded entry points
// ============================================================================

fn forged_payment(reference: &str, cents: u64) -> TicketAction {
    TicketAction::PaymentReceived {
        transaction_id: TransactionId::new(reference),
        amount: Money::from_cents(cents),
    }
}

#[tokio::test]
async fn payment_without_a_ledger_row_is_refused() {
    let h = Harness::new();
    let show = h.open_show(1).await;
    let ticket = h.reserve(show.id, "Ada").await;

    let outcome = h
        .orchestrator
        .send_ticket(ticket.id, forged_payment("forged", 1000))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Rejected(Rejection::InvalidInput(_))));
    assert_eq!(h.ticket(ticket.id).status, TicketStatus::Waiting4Payment);
    assert_eq!(h.ticket(ticket.id).payment.total_paid, Money::ZERO);
    assert!(h.ledger.rows().is_empty());
    assert_eq!(h.show(show.id).counters.tickets_sold, 0);

    let refund = TicketAction::RefundReceived {
        transaction_id: TransactionId::new("forged-refund"),
        amount: Money::from_cents(1000),
    };
    let outcome = h.orchestrator.send_ticket(ticket.id, refund).await.unwrap();
    assert!(outcome.is_rejected());
}

#[tokio::test]
async fn payment_must_match_its_ledger_row() {
    let h = Harness::new();
    let show = h.open_show(1).await;
    let ticket = h.reserve(show.id, "Ada").await;
    h.ledger
        .record(Transaction {
            reference: TransactionId::new("tx-1"),
            ticket_id: ticket.id,
            show_id: show.id,
            direction: Direction::Payment,
            amount: Money::from_cents(400),
            currency: "USD".to_string(),
            confirmations: 1,
            recorded_at: ticket.timestamps.reserved_at,
        })
        .await
        .unwrap();

    // Same reference, inflated amount
    let inflated = h
        .orchestrator
        .send_ticket(ticket.id, forged_payment("tx-1", 1000))
        .await
        .unwrap();
    assert!(inflated.is_rejected());

    // Another ticket cannot borrow the row
    let other = h.reserve(h.open_show(1).await.id, "Grace").await;
    let borrowed = h
        .orchestrator
        .send_ticket(other.id, forged_payment("tx-1", 400))
        .await
        .unwrap();
    assert!(borrowed.is_rejected());

    let recorded = h
        .orchestrator
        .send_ticket(ticket.id, forged_payment("tx-1", 400))
        .await
        .unwrap();
    assert!(recorded.is_applied());
    assert_eq!(h.ticket(ticket.id).payment.total_paid, Money::from_cents(400));
}

#[tokio::test]
async fn releasing_an_unknown_ticket_cannot_oversell() {
    let h = Harness::new();
    let show = h.open_show(1).await;
    let holder = h.reserve(show.id, "Ada").await;

    for release in [
        ShowAction::TicketCancelled { ticket_id: TicketId::new() },
        ShowAction::TicketReservationTimeout { ticket_id: TicketId::new() },
    ] {
        let outcome = h.orchestrator.send_show(show.id, release).await.unwrap();
        assert!(matches!(outcome, Outcome::Unchanged(_)));
    }
    let stored = h.show(show.id);
    assert_eq!(stored.counters.tickets_available, 0);
    assert_eq!(stored.status, ShowStatus::BoxOfficeClosed);

    let second = h
        .orchestrator
        .reserve_ticket(show.id, boxoffice_testing::fixtures::new_ticket("Grace"))
        .await
        .unwrap();
    assert_eq!(
        second.rejection(),
        Some(&Rejection::InventoryExhausted { show_id: show.id })
    );

    h.pay(&holder, "tx-1", 1000).await.unwrap();
    let sold = h.show(show.id);
    assert_eq!(sold.counters.tickets_sold, 1);
    assert!(sold.inventory_balanced());
}

#[tokio::test]
async fn claimed_reservation_on_a_cancelled_show_is_refused() {
    let h = Harness::new();
    let show = h.open_show(2).await;
    h.orchestrator
        .send_show(
            show.id,
            ShowAction::CancellationInitiated {
                reason: CancellationReason::HostCancelled,
                actor: Actor::Host,
            },
        )
        .await
        .unwrap();

    let claim = h
        .store
        .conditional_decrement(show.id, InventoryField::TicketsAvailable, 1)
        .await
        .unwrap();
    assert_eq!(claim, DecrementOutcome::Exhausted);

    let ticket_id = TicketId::new();
    let outcome = h
        .orchestrator
        .send_show(show.id, ShowAction::TicketReserved { ticket_id, seat_claimed: true })
        .await
        .unwrap();
    assert!(outcome.is_rejected());

    let stored = h.show(show.id);
    assert_eq!(stored.status, ShowStatus::Cancelled);
    assert!(!stored.seats.contains_key(&ticket_id));
    assert_eq!(stored.counters.tickets_reserved, 0);
    assert_eq!(stored.counters.tickets_available, 2);
}

#[tokio::test]
async fn seat_claimed_as_the_show_is_called_off_goes_back() {
    let h = Harness::new();
    let show = h.open_show(2).await;
    h.store.cancel_after_next_claim();

    let outcome = h
        .orchestrator
        .reserve_ticket(show.id, boxoffice_testing::fixtures::new_ticket("Ada"))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        Outcome::Rejected(Rejection::GuardRejected { event: "TICKET_RESERVED", .. })
    ));
    assert_eq!(h.store.inner.ticket_count(), 0);

    let stored = h.show(show.id);
    assert_eq!(stored.status, ShowStatus::Cancelled);
    assert_eq!(stored.counters.tickets_reserved, 0);
    assert_eq!(stored.counters.tickets_available, 2);
    assert!(stored.inventory_balanced());
    assert!(!h.scheduler.has_pending(RESERVATION_TIMEOUT));
}

//! Ticket machine transition tests

#![allow(clippy::unwrap_used)] // Tests can unwrap

use boxoffice_core::event_log::ShowEventKind;
use boxoffice_core::{
    Actor, CancellationReason, Dispatch, ISSUE_REFUND, Lifecycle, MachineEnvironment, Money,
    PayoutId, ShowAction, ShowStatus, Ticket, TicketAction, TicketMachine, TicketStatus,
    TransactionId,
};
use boxoffice_testing::assertions::{
    assert_cancels, assert_logs, assert_no_effects, assert_schedules, dispatched, dispatches,
};
use boxoffice_testing::{ReducerTest, fixtures, test_environment};

fn ticket() -> Ticket {
    fixtures::reserved_ticket(&fixtures::open_show(2))
}

fn test(state: Ticket) -> ReducerTest<TicketMachine, Ticket, TicketAction, MachineEnvironment> {
    ReducerTest::new(TicketMachine::new())
        .with_env(test_environment())
        .given_state(state)
}

fn paid(reference: &str, cents: u64) -> TicketAction {
    TicketAction::PaymentReceived {
        transaction_id: TransactionId::new(reference),
        amount: Money::from_cents(cents),
    }
}

fn joined() -> TicketAction {
    TicketAction::JoinedShow {
        show_status: Some(ShowStatus::Started),
    }
}

fn customer_cancel() -> TicketAction {
    TicketAction::RequestCancellation {
        reason: CancellationReason::CustomerRequested,
        actor: Actor::Customer,
    }
}

#[test]
fn full_payment_sells_the_seat() {
    test(ticket())
        .when_action(paid("tx-1", 1000))
        .then_state(|ticket| {
            assert_eq!(ticket.status, TicketStatus::Waiting4Show);
            assert_eq!(ticket.payment.total_paid, fixtures::PRICE);
            assert!(ticket.timestamps.paid_at.is_some());
        })
        .then_effects(|effects| {
            assert_cancels(effects, "RESERVATION_TIMEOUT");
            assert_eq!(dispatched(effects, "TICKET_SOLD"), 1);
        })
        .run();
}

#[test]
fn partial_payment_keeps_waiting() {
    test(ticket())
        .when_action(paid("tx-1", 250))
        .then_state(|ticket| {
            assert_eq!(ticket.status, TicketStatus::Waiting4Payment);
            assert_eq!(ticket.payment.total_paid, Money::from_cents(250));
        })
        .then_effects(assert_no_effects)
        .run();
}

#[test]
fn replayed_payment_is_a_no_op_even_after_the_ticket_moved_on() {
    test(ticket())
        .given_actions([paid("tx-1", 1000)])
        .when_action(paid("tx-1", 1000))
        .then_state(|ticket| assert_eq!(ticket.payment.total_paid, fixtures::PRICE))
        .then_effects(assert_no_effects)
        .run();
}

#[test]
fn payment_after_cancellation_is_refunded() {
    test(ticket())
        .given_actions([customer_cancel()])
        .when_action(paid("tx-9", 1000))
        .then_state(|ticket| {
            assert_eq!(ticket.status, TicketStatus::Waiting4Refund);
            assert_eq!(ticket.payment.refund_due(), fixtures::PRICE);
        })
        .then_effects(|effects| {
            assert_schedules(effects, ISSUE_REFUND);
            assert_eq!(dispatched(effects, "TICKET_SOLD"), 0);
        })
        .run();
}

#[test]
fn zero_payment_after_cancellation_is_rejected() {
    test(ticket())
        .given_actions([customer_cancel()])
        .when_action(paid("tx-0", 0))
        .then_rejected(|rejection| assert_eq!(rejection.code(), "INVALID_INPUT"))
        .run();
}

#[test]
fn joining_redeems_once_and_logs_every_time() {
    test(ticket())
        .given_actions([paid("tx-1", 1000), joined(), TicketAction::LeftShow {
            show_status: Some(ShowStatus::Started),
        }])
        .when_action(joined())
        .then_state(|ticket| assert_eq!(ticket.status, TicketStatus::Redeemed))
        .then_effects(|effects| {
            assert_eq!(dispatched(effects, "TICKET_REDEEMED"), 0);
            assert_logs(effects, ShowEventKind::CustomerJoined);
        })
        .run();
}

#[test]
fn joining_a_show_that_has_not_started_is_rejected() {
    test(ticket())
        .given_actions([paid("tx-1", 1000)])
        .when_action(TicketAction::JoinedShow { show_status: None })
        .then_rejected(|rejection| assert_eq!(rejection.code(), "GUARD_REJECTED"))
        .run();
}

#[test]
fn unpaid_ticket_cannot_join() {
    test(ticket())
        .when_action(joined())
        .then_rejected(|rejection| assert_eq!(rejection.code(), "GUARD_REJECTED"))
        .run();
}

#[test]
fn show_end_routes_by_attendance() {
    test(ticket())
        .given_actions([paid("tx-1", 1000)])
        .when_action(TicketAction::ShowEnded)
        .then_state(|ticket| assert_eq!(ticket.status, TicketStatus::MissedShow))
        .run();

    test(ticket())
        .given_actions([paid("tx-1", 1000), joined()])
        .when_action(TicketAction::ShowEnded)
        .then_state(|ticket| {
            assert_eq!(ticket.status, TicketStatus::InEscrow);
            assert!(ticket.timestamps.ended_at.is_some());
        })
        .run();
}

#[test]
fn repeated_show_end_is_a_no_op() {
    test(ticket())
        .given_actions([paid("tx-1", 1000), joined(), TicketAction::ShowEnded])
        .when_action(TicketAction::ShowEnded)
        .then_state(|ticket| assert_eq!(ticket.status, TicketStatus::InEscrow))
        .then_effects(assert_no_effects)
        .run();
}

#[test]
fn dispute_is_only_possible_from_escrow() {
    test(ticket())
        .given_actions([paid("tx-1", 1000), TicketAction::ShowEnded])
        .when_action(TicketAction::DisputeInitiated {
            reason: "stream froze".into(),
        })
        .then_rejected(|rejection| assert_eq!(rejection.code(), "GUARD_REJECTED"))
        .run();

    test(ticket())
        .given_actions([paid("tx-1", 1000), joined(), TicketAction::ShowEnded])
        .when_action(TicketAction::DisputeInitiated {
            reason: "stream froze".into(),
        })
        .then_state(|ticket| {
            assert_eq!(ticket.status, TicketStatus::InDispute);
            assert_eq!(ticket.dispute.as_ref().unwrap().reason, "stream froze");
        })
        .then_effects(|effects| assert_eq!(dispatched(effects, "TICKET_DISPUTED"), 1))
        .run();
}

#[test]
fn feedback_from_a_dispute_finalizes_and_resolves_it() {
    test(ticket())
        .given_actions([
            paid("tx-1", 1000),
            joined(),
            TicketAction::ShowEnded,
            TicketAction::DisputeInitiated {
                reason: "audio".into(),
            },
        ])
        .when_action(TicketAction::FeedbackReceived {
            rating: 4,
            comment: Some("fixed in the end".into()),
        })
        .then_state(|ticket| {
            assert_eq!(ticket.status, TicketStatus::Finalized);
            assert!(ticket.dispute.as_ref().unwrap().resolved_at.is_some());
            assert_eq!(ticket.feedback.as_ref().unwrap().rating, 4);
        })
        .then_effects(|effects| {
            assert!(matches!(
                dispatches(effects)[..],
                [Dispatch::Show {
                    action: ShowAction::DisputeResolved { .. },
                    ..
                }]
            ));
        })
        .run();
}

#[test]
fn redeemed_ticket_cannot_be_cancelled_by_the_customer() {
    test(ticket())
        .given_actions([paid("tx-1", 1000), joined()])
        .when_action(customer_cancel())
        .then_rejected(|rejection| assert_eq!(rejection.code(), "GUARD_REJECTED"))
        .then_state(|ticket| assert!(!ticket.can_transition("REQUEST_CANCELLATION")))
        .run();
}

#[test]
fn paid_ticket_cancellation_schedules_the_refund() {
    test(ticket())
        .given_actions([paid("tx-1", 1000)])
        .when_action(customer_cancel())
        .then_state(|ticket| {
            assert_eq!(ticket.status, TicketStatus::Waiting4Refund);
            assert_eq!(ticket.state_tag(), "cancelled.waiting4Refund");
        })
        .then_effects(|effects| {
            assert_schedules(effects, ISSUE_REFUND);
            assert_eq!(dispatched(effects, "TICKET_CANCELLED"), 1);
        })
        .run();
}

#[test]
fn show_cancellation_refunds_redeemed_tickets_too() {
    test(ticket())
        .given_actions([paid("tx-1", 1000), joined()])
        .when_action(TicketAction::ShowCancelled {
            reason: CancellationReason::HostCancelled,
            actor: Actor::Host,
        })
        .then_state(|ticket| {
            assert_eq!(ticket.status, TicketStatus::Waiting4Refund);
            let cancellation = ticket.cancellation.as_ref().unwrap();
            assert_eq!(cancellation.cancelled_in, TicketStatus::Redeemed);
            assert_eq!(cancellation.cancelled_by, Actor::Host);
        })
        .run();
}

#[test]
fn show_cancellation_of_an_already_cancelled_ticket_is_a_no_op() {
    test(ticket())
        .given_actions([customer_cancel()])
        .when_action(TicketAction::ShowCancelled {
            reason: CancellationReason::HostCancelled,
            actor: Actor::Host,
        })
        .then_state(|ticket| {
            let cancellation = ticket.cancellation.as_ref().unwrap();
            assert_eq!(cancellation.reason, CancellationReason::CustomerRequested);
        })
        .then_effects(assert_no_effects)
        .run();
}

#[test]
fn refund_issuance_is_recorded_once() {
    let payout = PayoutId::new("po-1");
    test(ticket())
        .given_actions([
            paid("tx-1", 1000),
            customer_cancel(),
            TicketAction::RefundIssued {
                payout_id: payout.clone(),
            },
        ])
        .when_action(TicketAction::RefundIssued {
            payout_id: payout.clone(),
        })
        .then_state(move |ticket| assert_eq!(ticket.payment.payout_id, Some(payout)))
        .then_effects(assert_no_effects)
        .run();
}

#[test]
fn full_refund_is_terminal() {
    test(ticket())
        .given_actions([paid("tx-1", 1000), customer_cancel()])
        .when_action(TicketAction::RefundReceived {
            transaction_id: TransactionId::new("rf-1"),
            amount: fixtures::PRICE,
        })
        .then_state(|ticket| {
            assert_eq!(ticket.status, TicketStatus::Cancelled);
            // Only fresh money can reopen it, to be sent straight back
            for event in TicketAction::NAMES {
                assert_eq!(
                    ticket.can_transition(event),
                    *event == "PAYMENT_RECEIVED",
                    "{event} must not leave cancelled"
                );
            }
        })
        .then_effects(|effects| {
            assert!(matches!(
                dispatches(effects)[..],
                [Dispatch::Show {
                    action: ShowAction::TicketRefunded { .. },
                    ..
                }]
            ));
        })
        .run();
}

#[test]
fn timeout_of_a_partially_paid_reservation_waits_for_refund() {
    test(ticket())
        .given_actions([paid("tx-1", 400)])
        .when_action(TicketAction::ReservationTimeout)
        .then_state(|ticket| {
            assert_eq!(ticket.status, TicketStatus::Waiting4Refund);
            assert_eq!(ticket.payment.refund_due(), Money::from_cents(400));
            let cancellation = ticket.cancellation.as_ref().unwrap();
            assert_eq!(cancellation.reason, CancellationReason::PaymentTimeout);
            assert_eq!(cancellation.cancelled_by, Actor::Timer);
        })
        .then_effects(|effects| {
            assert_eq!(dispatched(effects, "TICKET_RESERVATION_TIMEOUT"), 1);
            assert_schedules(effects, ISSUE_REFUND);
        })
        .run();
}

#[test]
fn describe_omits_the_pin_hash() {
    let mut ticket = ticket();
    ticket.pin_hash = Some("argon2id$secret".into());
    let json = serde_json::to_value(ticket.describe()).unwrap();
    assert_eq!(json["status"], "reserved.waiting4Payment");
    assert!(json.get("pin_hash").is_none());
}

//! Reconciliation between the payment gateway and the ticket machine.
//!
//! Money is written to the ledger before the ticket hears about it. If the
//! ledger write fails the ticket is left alone and the error goes back to
//! the caller (webhook or job) so the notification is redelivered. Duplicate
//! ledger rows are expected on redelivery and still forward the event; the
//! ticket machine ignores transaction ids it has already counted.

use crate::error::{EngineError, Outcome};
use crate::metrics::EngineMetrics;
use crate::orchestrator::Orchestrator;
use boxoffice_core::{
    Direction, ISSUE_REFUND, InvoiceStatus, InvoiceWebhook, JobKey, JobRequest, Money,
    POLL_PAYOUT, PayoutId, PayoutStatus, RecordOutcome, RefundRequest, Ticket, TicketAction,
    TicketId, TicketStatus, Transaction, TransactionId,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How a webhook was acknowledged. Every variant is an HTTP 200.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Ack {
    /// The notification reached the ticket
    Processed {
        /// Ticket the invoice belongs to
        ticket_id: TicketId,
        /// Ticket state tag afterwards
        state: &'static str,
    },
    /// Nothing to do yet (invoice still pending)
    Pending {
        /// Ticket the invoice belongs to
        ticket_id: TicketId,
    },
    /// The invoice is not ours
    UnknownInvoice,
    /// The shared token did not match; dropped without reading the body
    Ignored,
}

/// Webhook verification and payout bookkeeping
#[derive(Clone)]
pub struct Reconciler {
    orchestrator: Orchestrator,
    webhook_token: Arc<str>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler accepting webhooks that present `webhook_token`
    #[must_use]
    pub fn new(orchestrator: Orchestrator, webhook_token: &str) -> Self {
        Self {
            orchestrator,
            webhook_token: Arc::from(webhook_token),
        }
    }

    /// Whether `token` is the configured webhook token (constant time)
    #[must_use]
    pub fn verify(&self, token: &str) -> bool {
        constant_time_eq::constant_time_eq(token.as_bytes(), self.webhook_token.as_bytes())
    }

    // ========================================================================
    // Inbound invoice webhook
    // ========================================================================

    /// Apply an invoice webhook.
    ///
    /// - token mismatch: [`Ack::Ignored`], nothing read or written
    /// - `complete`: one ledger row per payment line, then `PAYMENT_RECEIVED`
    /// - `expired`: `RESERVATION_TIMEOUT` for a ticket still waiting for payment
    ///
    /// # Errors
    ///
    /// [`EngineError::LedgerWriteFailure`] when a payment could not be
    /// recorded (the ticket was not touched), or another infrastructure error.
    #[tracing::instrument(
        skip(self, token, webhook),
        fields(invoice_id = %webhook.invoice_id, status = webhook.status.as_str())
    )]
    pub async fn handle_invoice_webhook(
        &self,
        token: &str,
        webhook: InvoiceWebhook,
    ) -> Result<Ack, EngineError> {
        if !self.verify(token) {
            tracing::warn!("Unverified invoice webhook dropped");
            EngineMetrics::record_webhook("unverified");
            return Ok(Ack::Ignored);
        }
        EngineMetrics::record_webhook(webhook.status.as_str());

        let invoice_owner = self
            .orchestrator
            .store()
            .ticket_for_invoice(&webhook.invoice_id)
            .await?;
        let Some(ticket_id) = invoice_owner else {
            tracing::warn!("Webhook for an unknown invoice");
            return Ok(Ack::UnknownInvoice);
        };
        let ticket = self.orchestrator.ticket(ticket_id).await?.snapshot;

        let state = match webhook.status {
            InvoiceStatus::Pending => return Ok(Ack::Pending { ticket_id }),
            InvoiceStatus::Complete => self.settle_payments(&ticket, &webhook).await?,
            InvoiceStatus::Expired => self.expire(&ticket).await?,
        };
        Ok(Ack::Processed { ticket_id, state })
    }

    async fn settle_payments(
        &self,
        ticket: &Ticket,
        webhook: &InvoiceWebhook,
    ) -> Result<&'static str, EngineError> {
        let mut state = ticket.status.tag();
        for line in &webhook.payments {
            let row = Transaction {
                reference: line.id.clone(),
                ticket_id: ticket.id,
                show_id: ticket.show_id,
                direction: Direction::Payment,
                amount: line.amount,
                currency: line.currency.clone(),
                confirmations: line.confirmations,
                recorded_at: self.orchestrator.env().now(),
            };
            self.record(row).await?;

            let payment = TicketAction::PaymentReceived {
                transaction_id: line.id.clone(),
                amount: line.amount,
            };
            match self.orchestrator.send_recorded(ticket.id, payment).await? {
                Outcome::Applied(ticket) | Outcome::Unchanged(ticket) => {
                    state = ticket.status.tag();
                },
                Outcome::Rejected(rejection) => {
                    tracing::warn!(
                        ticket_id = %ticket.id,
                        transaction_id = %line.id,
                        %rejection,
                        "Payment recorded for a ticket that no longer accepts it"
                    );
                },
            }
        }
        Ok(state)
    }

    async fn expire(&self, ticket: &Ticket) -> Result<&'static str, EngineError> {
        if ticket.status != TicketStatus::Waiting4Payment {
            tracing::debug!(
                ticket_id = %ticket.id,
                state = ticket.status.tag(),
                "Invoice expired after the ticket moved on"
            );
            return Ok(ticket.status.tag());
        }
        let outcome = self
            .orchestrator
            .send_ticket(ticket.id, TicketAction::ReservationTimeout)
            .await?;
        Ok(outcome.snapshot().map_or(ticket.status.tag(), |after| after.status.tag()))
    }

    // ========================================================================
    // Refund payouts
    // ========================================================================

    /// Start a refund payout for a ticket in `cancelled.waiting4Refund`.
    ///
    /// A payout already in flight is polled instead of duplicated; a failed
    /// or exhausted one is replaced.
    ///
    /// # Errors
    ///
    /// Gateway, scheduler or store failures.
    #[tracing::instrument(skip(self, ticket), fields(ticket_id = %ticket.id))]
    pub async fn issue_refund(&self, ticket: &Ticket) -> Result<Outcome<Ticket>, EngineError> {
        let due = ticket.payment.refund_due();
        if ticket.status != TicketStatus::Waiting4Refund || due.is_zero() {
            return Ok(Outcome::Unchanged(ticket.clone()));
        }

        if let Some(payout_id) = &ticket.payment.payout_id {
            match self.orchestrator.gateway().payout_status(payout_id.clone()).await? {
                PayoutStatus::Pending => {
                    self.schedule_poll(ticket.id).await?;
                    return Ok(Outcome::Unchanged(ticket.clone()));
                },
                PayoutStatus::Completed { reference, .. }
                    if !ticket.payment.refund_transactions.contains(&reference) =>
                {
                    return self.poll_payout(ticket).await;
                },
                PayoutStatus::Completed { .. } => {},
                PayoutStatus::Failed { reason } => {
                    tracing::warn!(
                        %payout_id,
                        %reason,
                        "Previous payout failed, issuing a new one"
                    );
                },
            }
        }

        let request = RefundRequest {
            ticket_id: ticket.id,
            invoice_id: ticket.payment.invoice_id.clone(),
            amount: due,
        };
        let payout_id = self.orchestrator.gateway().issue_refund(request).await?;
        tracing::info!(%payout_id, amount = %due, "Refund payout issued");

        let outcome = self
            .orchestrator
            .send_ticket(ticket.id, TicketAction::RefundIssued { payout_id })
            .await?;
        if !outcome.is_rejected() {
            self.schedule_poll(ticket.id).await?;
        }
        Ok(outcome)
    }

    /// Check the ticket's payout and settle it when complete.
    ///
    /// # Errors
    ///
    /// [`EngineError::LedgerWriteFailure`] when the refund could not be
    /// recorded (the ticket was not touched), or another infrastructure error.
    #[tracing::instrument(skip(self, ticket), fields(ticket_id = %ticket.id))]
    pub async fn poll_payout(&self, ticket: &Ticket) -> Result<Outcome<Ticket>, EngineError> {
        let Some(payout_id) = ticket.payment.payout_id.clone() else {
            tracing::debug!("No payout in flight");
            return Ok(Outcome::Unchanged(ticket.clone()));
        };

        match self.orchestrator.gateway().payout_status(payout_id.clone()).await? {
            PayoutStatus::Pending => {
                tracing::debug!(%payout_id, "Payout still pending");
                self.schedule_poll(ticket.id).await?;
                Ok(Outcome::Unchanged(ticket.clone()))
            },
            PayoutStatus::Completed {
                reference,
                amount,
                currency,
            } => self.settle_refund(ticket, &payout_id, reference, amount, currency).await,
            PayoutStatus::Failed { reason } => {
                tracing::warn!(%payout_id, %reason, "Refund payout failed");
                self.schedule(ticket.id, ISSUE_REFUND, self.orchestrator.env().timers.payout_window)
                    .await?;
                Ok(Outcome::Unchanged(ticket.clone()))
            },
        }
    }

    async fn settle_refund(
        &self,
        ticket: &Ticket,
        payout_id: &PayoutId,
        reference: TransactionId,
        amount: Money,
        currency: String,
    ) -> Result<Outcome<Ticket>, EngineError> {
        let row = Transaction {
            reference: reference.clone(),
            ticket_id: ticket.id,
            show_id: ticket.show_id,
            direction: Direction::Refund,
            amount,
            currency,
            confirmations: 1,
            recorded_at: self.orchestrator.env().now(),
        };
        self.record(row).await?;

        let outcome = self
            .orchestrator
            .send_recorded(
                ticket.id,
                TicketAction::RefundReceived {
                    transaction_id: reference,
                    amount,
                },
            )
            .await?;
        let still_waiting = outcome.snapshot().filter(|t| t.status == TicketStatus::Waiting4Refund);
        if let Some(after) = still_waiting {
            let still_due = after.payment.refund_due();
            tracing::info!(%payout_id, %still_due, "Partial refund settled");
            self.schedule(ticket.id, ISSUE_REFUND, Duration::ZERO).await?;
        }
        Ok(outcome)
    }

    async fn record(&self, row: Transaction) -> Result<(), EngineError> {
        let direction = row.direction.as_str();
        let reference = row.reference.clone();
        match self.orchestrator.ledger().record(row).await {
            Ok(RecordOutcome::Recorded) => {
                tracing::info!(%reference, direction, "Ledger row written");
                EngineMetrics::record_ledger_write(direction);
                Ok(())
            },
            Ok(RecordOutcome::Duplicate) => {
                tracing::debug!(%reference, direction, "Ledger row already present");
                Ok(())
            },
            Err(error) => {
                tracing::error!(%reference, direction, %error, "Ledger write failed");
                Err(EngineError::LedgerWriteFailure(error))
            },
        }
    }

    async fn schedule_poll(&self, ticket_id: TicketId) -> Result<(), EngineError> {
        self.schedule(ticket_id, POLL_PAYOUT, self.orchestrator.env().timers.payout_window)
            .await
    }

    async fn schedule(
        &self,
        ticket_id: TicketId,
        event: &str,
        delay: Duration,
    ) -> Result<(), EngineError> {
        let request = JobRequest::after(JobKey::ticket(ticket_id, event), delay)
            .expecting(TicketStatus::Waiting4Refund.tag());
        self.orchestrator.scheduler().schedule(request).await?;
        Ok(())
    }
}

//! Payment gateway contract: outbound invoice/refund calls and the inbound
//! invoice webhook payload.

use crate::types::{InvoiceId, Money, PayoutId, TicketId, TransactionId};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invoice created for a ticket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Gateway invoice id
    pub invoice_id: InvoiceId,
    /// Where the customer pays, if the gateway hosts a checkout
    pub checkout_url: Option<String>,
}

/// Refund payout request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefundRequest {
    /// Ticket being refunded
    pub ticket_id: TicketId,
    /// Invoice the original payment settled
    pub invoice_id: Option<InvoiceId>,
    /// Amount still owed to the customer
    pub amount: Money,
}

/// State of a refund payout
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayoutStatus {
    /// Not settled yet
    Pending,
    /// Settled
    Completed {
        /// External reference of the payout transaction
        reference: TransactionId,
        /// Amount paid out
        amount: Money,
        /// Currency or asset code
        currency: String,
    },
    /// The gateway gave up
    Failed {
        /// Gateway explanation
        reason: String,
    },
}

/// Gateway call failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Network or server failure; worth retrying
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),

    /// The gateway refused the request
    #[error("Payment gateway rejected request: {0}")]
    Rejected(String),

    /// The gateway answered with something we cannot read
    #[error("Invalid payment gateway response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Whether the same call may succeed later
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Payment gateway client
pub trait PaymentGateway: Send + Sync {
    /// Create an invoice for `amount` correlated with `ticket_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway cannot create the invoice.
    fn create_invoice(
        &self,
        ticket_id: TicketId,
        amount: Money,
    ) -> BoxFuture<'_, Result<Invoice, GatewayError>>;

    /// Start a refund payout.
    ///
    /// # Errors
    ///
    /// Returns an error if the payout cannot be started.
    fn issue_refund(&self, request: RefundRequest) -> BoxFuture<'_, Result<PayoutId, GatewayError>>;

    /// Current status of a payout.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway cannot be queried.
    fn payout_status(
        &self,
        payout_id: PayoutId,
    ) -> BoxFuture<'_, Result<PayoutStatus, GatewayError>>;
}

// ============================================================================
// Inbound webhook
// ============================================================================

/// Invoice status reported by the gateway
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    /// Awaiting payment or confirmations
    Pending,
    /// Paid and settled
    Complete,
    /// Payment window elapsed
    Expired,
}

impl InvoiceStatus {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Expired => "expired",
        }
    }
}

/// One payment settled against an invoice
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLine {
    /// External hash/reference of the payment
    pub id: TransactionId,
    /// Amount in minor units
    pub amount: Money,
    /// Currency or asset code
    pub currency: String,
    /// Confirmations seen by the gateway
    #[serde(default)]
    pub confirmations: u32,
}

/// Invoice webhook body `{invoiceId, status, payments[]}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceWebhook {
    /// Invoice the notification is about
    pub invoice_id: InvoiceId,
    /// New invoice status
    pub status: InvoiceStatus,
    /// Settled payment lines
    #[serde(default)]
    pub payments: Vec<PaymentLine>,
}

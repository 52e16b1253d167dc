//! HTTP client for the payment gateway.
//!
//! Talks to a Greenfield-style REST API: invoices and payouts live under
//! `/api/v1/stores/{store_id}` and every call carries
//! `Authorization: token {api_key}`. Amounts travel as decimal strings.

use crate::config::GatewayConfig;
use boxoffice_core::{
    GatewayError, Invoice, InvoiceId, Money, PaymentGateway, PayoutId, PayoutStatus, RefundRequest,
    TicketId, TransactionId,
};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Request timeout for every gateway call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvoiceResponse {
    id: String,
    #[serde(default)]
    checkout_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PayoutCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayoutResponse {
    state: String,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    failure_reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PayoutRequest<'a> {
    amount: String,
    currency: &'a str,
    metadata: serde_json::Value,
}

/// Parse a decimal amount like `"10.05"` into minor units.
///
/// Up to two fraction digits are accepted.
#[must_use]
pub fn parse_amount(amount: &str) -> Option<Money> {
    let (whole, fraction) = amount.trim().split_once('.').unwrap_or((amount.trim(), ""));
    if whole.is_empty() || fraction.len() > 2 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: u64 = whole.parse().ok()?;
    let fraction: u64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<u64>().ok()? * 10,
        _ => fraction.parse().ok()?,
    };
    whole.checked_mul(100)?.checked_add(fraction).map(Money::from_cents)
}

fn transport_error(e: &reqwest::Error) -> GatewayError {
    if e.is_decode() {
        GatewayError::InvalidResponse(e.to_string())
    } else {
        GatewayError::Unavailable(e.to_string())
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, GatewayError> {
    let status = response.status();
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(GatewayError::Unavailable(format!("gateway answered {status}")));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::Rejected(format!("{status}: {body}")));
    }
    response.json().await.map_err(|e| transport_error(&e))
}

/// Payment gateway reached over HTTP
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    store_id: String,
    currency: String,
}

impl std::fmt::Debug for HttpPaymentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPaymentGateway")
            .field("base_url", &self.base_url)
            .field("store_id", &self.store_id)
            .finish_non_exhaustive()
    }
}

impl HttpPaymentGateway {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            store_id: config.store_id.clone(),
            currency: config.currency.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/stores/{}/{path}", self.base_url, self.store_id)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header(reqwest::header::AUTHORIZATION, format!("token {}", self.api_key))
    }
}

impl PaymentGateway for HttpPaymentGateway {
    fn create_invoice(
        &self,
        ticket_id: TicketId,
        amount: Money,
    ) -> BoxFuture<'_, Result<Invoice, GatewayError>> {
        Box::pin(async move {
            let body = json!({
                "amount": amount.to_string(),
                "currency": self.currency,
                "metadata": { "orderId": ticket_id.to_string() },
            });
            let response = self
                .authorized(self.client.post(self.url("invoices")))
                .json(&body)
                .send()
                .await
                .map_err(|e| transport_error(&e))?;
            let invoice: InvoiceResponse = read_json(response).await?;

            tracing::debug!(%ticket_id, invoice_id = %invoice.id, "Invoice created");
            Ok(Invoice {
                invoice_id: InvoiceId::new(invoice.id),
                checkout_url: invoice.checkout_link,
            })
        })
    }

    fn issue_refund(
        &self,
        request: RefundRequest,
    ) -> BoxFuture<'_, Result<PayoutId, GatewayError>> {
        Box::pin(async move {
            let body = PayoutRequest {
                amount: request.amount.to_string(),
                currency: &self.currency,
                metadata: json!({
                    "ticketId": request.ticket_id.to_string(),
                    "invoiceId": request.invoice_id.as_ref().map(InvoiceId::as_str),
                }),
            };
            let response = self
                .authorized(self.client.post(self.url("payouts")))
                .json(&body)
                .send()
                .await
                .map_err(|e| transport_error(&e))?;
            let payout: PayoutCreated = read_json(response).await?;

            tracing::info!(
                ticket_id = %request.ticket_id,
                payout_id = %payout.id,
                "Refund payout requested"
            );
            Ok(PayoutId::new(payout.id))
        })
    }

    fn payout_status(
        &self,
        payout_id: PayoutId,
    ) -> BoxFuture<'_, Result<PayoutStatus, GatewayError>> {
        Box::pin(async move {
            let response = self
                .authorized(self.client.get(self.url(&format!("payouts/{}", payout_id.as_str()))))
                .send()
                .await
                .map_err(|e| transport_error(&e))?;
            let payout: PayoutResponse = read_json(response).await?;

            match payout.state.as_str() {
                "Completed" => {
                    let amount = payout
                        .amount
                        .as_deref()
                        .and_then(parse_amount)
                        .ok_or_else(|| {
                            let reason = format!("payout {payout_id} has no amount");
                            GatewayError::InvalidResponse(reason)
                        })?;
                    let reference = payout
                        .transaction_id
                        .unwrap_or_else(|| payout_id.as_str().to_string());
                    Ok(PayoutStatus::Completed {
                        reference: TransactionId::new(reference),
                        amount,
                        currency: payout.currency.unwrap_or_else(|| self.currency.clone()),
                    })
                },
                "Cancelled" | "Failed" => Ok(PayoutStatus::Failed {
                    reason: payout.failure_reason.unwrap_or(payout.state),
                }),
                _ => Ok(PayoutStatus::Pending),
            }
        })
    }
}

//! Payment gateway webhooks.
//!
//! `POST /webhooks/invoices/:token` answers 200 with an [`Ack`] whenever the
//! notification was handled or deliberately dropped, and 503 when it should
//! be redelivered (for example the ledger write failed).

use crate::WebResult;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use boxoffice_core::InvoiceWebhook;
use boxoffice_runtime::Ack;

/// `POST /webhooks/invoices/:token`
///
/// # Errors
///
/// 503 when the payment could not be recorded; the gateway retries.
pub async fn invoice_webhook(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(webhook): Json<InvoiceWebhook>,
) -> WebResult<Json<Ack>> {
    let ack = state.reconciler.handle_invoice_webhook(&token, webhook).await?;
    tracing::debug!(?ack, "Invoice webhook acknowledged");
    Ok(Json(ack))
}

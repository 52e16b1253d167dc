//! Show endpoints:
//!
//! - `POST /shows` - create a show with an open box office
//! - `GET /shows/:id` - describe a show
//! - `POST /shows/:id/events` - send a show event
//! - `GET /shows/:id/can/:event` - probe whether an event would be accepted
//! - `POST /shows/:id/tickets` - reserve a ticket

use super::{CanTransitionResponse, TransitionResponse, transition};
use crate::WebResult;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use boxoffice_core::{
    InvoiceId, NewShow, NewTicket, Show, ShowAction, ShowId, ShowView, TicketView,
};
use boxoffice_runtime::Outcome;
use serde::Serialize;

/// Response after reserving a ticket
#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    /// The new ticket
    pub ticket: TicketView,
    /// Invoice the customer has to pay
    pub invoice_id: Option<InvoiceId>,
    /// Hosted checkout page, when the gateway provides one
    pub checkout_url: Option<String>,
}

/// `POST /shows`
///
/// # Errors
///
/// 422 for invalid show input, 503 when the store is unavailable.
pub async fn create_show(
    State(state): State<AppState>,
    Json(request): Json<NewShow>,
) -> WebResult<(StatusCode, Json<ShowView>)> {
    let outcome = state.orchestrator.create_show(request).await?;
    let show = outcome.into_result().map_err(|rejection| AppError::rejection(&rejection))?;

    tracing::info!(show_id = %show.id, capacity = show.capacity, "Show created");
    Ok((StatusCode::CREATED, Json(show.describe())))
}

/// `GET /shows/:id`
///
/// # Errors
///
/// 404 for an unknown show.
pub async fn get_show(
    State(state): State<AppState>,
    Path(show_id): Path<ShowId>,
) -> WebResult<Json<ShowView>> {
    Ok(Json(state.orchestrator.describe_show(show_id).await?))
}

/// Events a host or operator may send. Seat bookkeeping only ever comes
/// from the ticket machine.
const fn host_event(action: &ShowAction) -> bool {
    match action {
        ShowAction::ShowStarted
        | ShowAction::ShowStopped
        | ShowAction::ShowEnded
        | ShowAction::ShowFinalized
        | ShowAction::CancellationInitiated { .. }
        | ShowAction::CloseBoxOffice => true,
        ShowAction::TicketReserved { .. }
        | ShowAction::TicketReservationTimeout { .. }
        | ShowAction::TicketCancelled { .. }
        | ShowAction::ClaimReleased { .. }
        | ShowAction::TicketSold { .. }
        | ShowAction::TicketRefunded { .. }
        | ShowAction::TicketRedeemed { .. }
        | ShowAction::TicketDisputed { .. }
        | ShowAction::DisputeResolved { .. } => false,
    }
}

/// `POST /shows/:id/events`
///
/// Only host events are accepted here; ticket traffic reaches the show
/// through the ticket endpoints.
///
/// # Errors
///
/// 404 for an unknown show, 409 when a guard declines the event, 422 for
/// an event that is not a host event.
pub async fn send_event(
    State(state): State<AppState>,
    Path(show_id): Path<ShowId>,
    Json(action): Json<ShowAction>,
) -> WebResult<Json<TransitionResponse<ShowView>>> {
    if !host_event(&action) {
        tracing::warn!(%show_id, event = action.name(), "Refused internal show event");
        return Err(AppError::validation(format!(
            "{} cannot be sent to a show directly",
            action.name()
        )));
    }
    let outcome = state.orchestrator.send_show(show_id, action).await?;
    Ok(Json(transition(outcome, Show::describe)?))
}

/// `GET /shows/:id/can/:event`
///
/// # Errors
///
/// 404 for an unknown show.
pub async fn can_transition(
    State(state): State<AppState>,
    Path((show_id, event)): Path<(ShowId, String)>,
) -> WebResult<Json<CanTransitionResponse>> {
    let allowed = state.orchestrator.can_show_transition(show_id, &event).await?;
    Ok(Json(CanTransitionResponse { event, allowed }))
}

/// `POST /shows/:id/tickets`
///
/// # Errors
///
/// 404 for an unknown show, 409 when sold out or the box office is not open,
/// 503 when the gateway or store is unavailable.
pub async fn reserve_ticket(
    State(state): State<AppState>,
    Path(show_id): Path<ShowId>,
    Json(request): Json<NewTicket>,
) -> WebResult<(StatusCode, Json<ReservationResponse>)> {
    match state.orchestrator.reserve_ticket(show_id, request).await? {
        Outcome::Applied(reservation) | Outcome::Unchanged(reservation) => Ok((
            StatusCode::CREATED,
            Json(ReservationResponse {
                invoice_id: reservation.ticket.payment.invoice_id.clone(),
                ticket: reservation.ticket.describe(),
                checkout_url: reservation.checkout_url,
            }),
        )),
        Outcome::Rejected(rejection) => Err(AppError::rejection(&rejection)),
    }
}

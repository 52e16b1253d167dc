//! Ticket endpoints:
//!
//! - `GET /tickets/:id` - describe a ticket
//! - `POST /tickets/:id/events` - send a ticket event
//! - `GET /tickets/:id/can/:event` - probe whether an event would be accepted

use super::{CanTransitionResponse, TransitionResponse, transition};
use crate::WebResult;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use boxoffice_core::{Ticket, TicketAction, TicketId, TicketView};

/// `GET /tickets/:id`
///
/// # Errors
///
/// 404 for an unknown ticket.
pub async fn get_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<TicketId>,
) -> WebResult<Json<TicketView>> {
    Ok(Json(state.orchestrator.describe_ticket(ticket_id).await?))
}

/// Events a customer or operator may send. Money, timers and show-wide
/// notices are raised by the engine itself.
const fn customer_event(action: &TicketAction) -> bool {
    match action {
        TicketAction::JoinedShow { .. }
        | TicketAction::LeftShow { .. }
        | TicketAction::DisputeInitiated { .. }
        | TicketAction::DisputeResolved
        | TicketAction::FeedbackReceived { .. }
        | TicketAction::RequestCancellation { .. } => true,
        TicketAction::PaymentReceived { .. }
        | TicketAction::RefundIssued { .. }
        | TicketAction::RefundReceived { .. }
        | TicketAction::ShowEnded
        | TicketAction::ShowCancelled { .. }
        | TicketAction::ReservationTimeout => false,
    }
}

/// `POST /tickets/:id/events`
///
/// # Errors
///
/// 404 for an unknown ticket, 409 when a guard declines the event,
/// 422 for an invalid payload such as an out-of-range rating or for an
/// event only the engine may raise.
pub async fn send_event(
    State(state): State<AppState>,
    Path(ticket_id): Path<TicketId>,
    Json(action): Json<TicketAction>,
) -> WebResult<Json<TransitionResponse<TicketView>>> {
    if !customer_event(&action) {
        tracing::warn!(%ticket_id, event = action.name(), "Refused internal ticket event");
        return Err(AppError::validation(format!(
            "{} cannot be sent to a ticket directly",
            action.name()
        )));
    }
    let outcome = state.orchestrator.send_ticket(ticket_id, action).await?;
    Ok(Json(transition(outcome, Ticket::describe)?))
}

/// `GET /tickets/:id/can/:event`
///
/// # Errors
///
/// 404 for an unknown ticket.
pub async fn can_transition(
    State(state): State<AppState>,
    Path((ticket_id, event)): Path<(TicketId, String)>,
) -> WebResult<Json<CanTransitionResponse>> {
    let allowed = state.orchestrator.can_ticket_transition(ticket_id, &event).await?;
    Ok(Json(CanTransitionResponse { event, allowed }))
}

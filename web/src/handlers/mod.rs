//! HTTP request handlers.
//!
//! This module contains all HTTP handlers organized by machine.

pub mod health;
pub mod shows;
pub mod tickets;
pub mod webhooks;

use crate::error::AppError;
use boxoffice_runtime::Outcome;
use serde::Serialize;

pub use health::{health_check, metrics, readiness};

/// Body returned after an event was sent to a machine
#[derive(Debug, Serialize)]
pub struct TransitionResponse<V> {
    /// `applied` or `unchanged`
    pub outcome: &'static str,
    /// Snapshot after the event
    #[serde(flatten)]
    pub view: V,
}

/// Body returned by the `can` probes
#[derive(Debug, Serialize)]
pub struct CanTransitionResponse {
    /// Event name that was probed
    pub event: String,
    /// Whether the current state accepts it
    pub allowed: bool,
}

/// Turn an accepted outcome into a response body, a rejection into an error.
pub(crate) fn transition<T, V>(
    outcome: Outcome<T>,
    view: impl FnOnce(&T) -> V,
) -> Result<TransitionResponse<V>, AppError> {
    let label = outcome.label();
    match outcome {
        Outcome::Applied(snapshot) | Outcome::Unchanged(snapshot) => Ok(TransitionResponse {
            outcome: label,
            view: view(&snapshot),
        }),
        Outcome::Rejected(rejection) => Err(AppError::rejection(&rejection)),
    }
}

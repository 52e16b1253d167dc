//! Expected, typed outcomes of a declined transition.
//!
//! A [`Rejection`] is not a failure of the engine: it is the machine saying
//! "not now". Callers branch on it; only infrastructure problems surface as
//! errors further out.

use crate::types::ShowId;
use thiserror::Error;

/// Why a machine declined an event
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The event exists but its guard does not hold in the current state
    #[error("{event} rejected by {guard} while {machine} is {state}")]
    GuardRejected {
        /// `show` or `ticket`
        machine: &'static str,
        /// Event name, e.g. `SHOW_STARTED`
        event: &'static str,
        /// State tag at the time of the attempt
        state: &'static str,
        /// Name of the guard that failed
        guard: &'static str,
    },

    /// No seat could be claimed: sold out, or the conditional decrement lost the race
    #[error("show {show_id} has no tickets available")]
    InventoryExhausted {
        /// Show whose inventory is exhausted
        show_id: ShowId,
    },

    /// The event payload itself is unacceptable
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Rejection {
    /// Short machine-readable code used at HTTP and metrics boundaries
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::GuardRejected { .. } => "GUARD_REJECTED",
            Self::InventoryExhausted { .. } => "INVENTORY_EXHAUSTED",
            Self::InvalidInput(_) => "INVALID_INPUT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_rejected_display() {
        let rejection = Rejection::GuardRejected {
            machine: "show",
            event: "SHOW_STARTED",
            state: "boxOfficeOpen",
            guard: "canStartShow",
        };
        assert_eq!(
            rejection.to_string(),
            "SHOW_STARTED rejected by canStartShow while show is boxOfficeOpen"
        );
        assert_eq!(rejection.code(), "GUARD_REJECTED");
    }

    #[test]
    fn test_inventory_exhausted_display() {
        let show_id = ShowId::new();
        let rejection = Rejection::InventoryExhausted { show_id };
        assert_eq!(rejection.to_string(), format!("show {show_id} has no tickets available"));
        assert_eq!(rejection.code(), "INVENTORY_EXHAUSTED");
    }
}

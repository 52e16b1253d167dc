//! Error and outcome types of the orchestration facade.
//!
//! Guard failures are not errors: they come back as [`Outcome::Rejected`].
//! [`EngineError`] is reserved for problems the caller cannot fix by sending
//! a different event.

use boxoffice_core::{
    GatewayError, LedgerError, PersistenceError, Rejection, SchedulerError,
};
use thiserror::Error;

/// Infrastructure failures surfaced by the facade
#[derive(Error, Debug)]
pub enum EngineError {
    /// The id does not resolve to a stored snapshot
    #[error("{machine} {id} not found")]
    NotFound {
        /// `show` or `ticket`
        machine: &'static str,
        /// Requested id
        id: String,
    },

    /// A ledger row could not be written; the transition it justifies did not happen
    #[error("Ledger write failed: {0}")]
    LedgerWriteFailure(#[from] LedgerError),

    /// Every compare-and-set attempt lost to a concurrent writer
    #[error("{machine} {id} kept changing concurrently ({attempts} attempts)")]
    Conflict {
        /// `show` or `ticket`
        machine: &'static str,
        /// Contended id
        id: String,
        /// Save attempts made
        attempts: u32,
    },

    /// Snapshot store failure
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Job scheduler failure
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Payment gateway failure
    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl EngineError {
    /// Whether redelivering the same request may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::NotFound { .. } => false,
            Self::Gateway(error) => error.is_retryable(),
            Self::LedgerWriteFailure(_)
            | Self::Conflict { .. }
            | Self::Persistence(_)
            | Self::Scheduler(_) => true,
        }
    }
}

/// Result of sending one event through the facade
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<T> {
    /// The snapshot changed and was persisted
    Applied(T),
    /// The event was accepted but changed nothing (duplicate or already there)
    Unchanged(T),
    /// A guard declined the event; nothing was written
    Rejected(Rejection),
}

impl<T> Outcome<T> {
    /// True for [`Outcome::Applied`]
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// True for [`Outcome::Rejected`]
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Snapshot after the call, unless rejected
    #[must_use]
    pub const fn snapshot(&self) -> Option<&T> {
        match self {
            Self::Applied(snapshot) | Self::Unchanged(snapshot) => Some(snapshot),
            Self::Rejected(_) => None,
        }
    }

    /// The rejection, if any
    #[must_use]
    pub const fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }

    /// Convert into `Result`, treating a rejection as the error
    ///
    /// # Errors
    ///
    /// Returns the [`Rejection`] of a rejected outcome.
    pub fn into_result(self) -> Result<T, Rejection> {
        match self {
            Self::Applied(snapshot) | Self::Unchanged(snapshot) => Ok(snapshot),
            Self::Rejected(rejection) => Err(rejection),
        }
    }

    /// Map the snapshot
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Applied(snapshot) => Outcome::Applied(f(snapshot)),
            Self::Unchanged(snapshot) => Outcome::Unchanged(f(snapshot)),
            Self::Rejected(rejection) => Outcome::Rejected(rejection),
        }
    }

    /// Short label for logs and metrics
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Applied(_) => "applied",
            Self::Unchanged(_) => "unchanged",
            Self::Rejected(_) => "rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let store_down = PersistenceError::DatabaseError("down".into());
        assert!(EngineError::Persistence(store_down).is_retryable());
        let ledger_down = LedgerError::DatabaseError("down".into());
        assert!(EngineError::LedgerWriteFailure(ledger_down).is_retryable());
        assert!(EngineError::Gateway(GatewayError::Unavailable("timeout".into())).is_retryable());
        assert!(!EngineError::Gateway(GatewayError::Rejected("bad amount".into())).is_retryable());
        assert!(
            !EngineError::NotFound {
                machine: "show",
                id: "x".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn outcome_accessors() {
        let applied: Outcome<u32> = Outcome::Applied(3);
        assert!(applied.is_applied());
        assert_eq!(applied.snapshot(), Some(&3));
        assert_eq!(applied.clone().map(|n| n * 2), Outcome::Applied(6));

        let rejected: Outcome<u32> = Outcome::Rejected(Rejection::InvalidInput("empty".into()));
        assert!(rejected.is_rejected());
        assert_eq!(rejected.snapshot(), None);
        assert_eq!(rejected.label(), "rejected");
        assert!(rejected.into_result().is_err());
    }
}

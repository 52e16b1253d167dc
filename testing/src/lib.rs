//! # Boxoffice Testing
//!
//! Testing utilities and helpers for the boxoffice lifecycle engine.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - In-memory implementations of every collaborator contract
//! - The [`ReducerTest`] given/when/then harness
//! - Fixtures for shows, tickets and ledger rows
//!
//! ## Example
//!
//! ```
//! use boxoffice_testing::{fixtures, test_environment, ReducerTest};
//! use boxoffice_core::{ShowAction, ShowMachine};
//!
//! ReducerTest::new(ShowMachine::new())
//!     .with_env(test_environment())
//!     .given_state(fixtures::open_show(2))
//!     .when_action(ShowAction::ShowStarted)
//!     .then_rejected(|rejection| assert_eq!(rejection.code(), "GUARD_REJECTED"))
//!     .run();
//! ```

use boxoffice_core::environment::{Clock, MachineEnvironment, TimerSettings};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub mod memory;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::RwLock;
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use boxoffice_testing::mocks::FixedClock;
    /// use boxoffice_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test advances it
    #[derive(Debug)]
    pub struct ManualClock {
        time: RwLock<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Clock frozen at `time`
        #[must_use]
        pub const fn starting_at(time: DateTime<Utc>) -> Self {
            Self {
                time: RwLock::new(time),
            }
        }

        /// Move time forward
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, by: Duration) {
            let step = chrono::Duration::from_std(by)
                .unwrap_or_else(|_| chrono::Duration::days(36_500));
            let mut time = self.time.write().unwrap();
            *time += step;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Ready-made snapshots and rows
pub mod fixtures {
    use boxoffice_core::ledger::{Direction, Transaction};
    use boxoffice_core::show::{NewShow, Show};
    use boxoffice_core::ticket::{NewTicket, Ticket};
    use boxoffice_core::types::{InvoiceId, Money, ShowId, TicketId, TransactionId, UserId};

    use super::mocks::test_clock;
    use boxoffice_core::environment::Clock;

    /// Standard ticket price used by the fixtures
    pub const PRICE: Money = Money::from_cents(1000);

    /// A show with an open box office
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn open_show(capacity: u32) -> Show {
        Show::open(ShowId::new(), new_show(capacity), test_clock().now())
            .expect("fixture show should be valid")
    }

    /// Host input for a show priced at [`PRICE`]
    #[must_use]
    pub fn new_show(capacity: u32) -> NewShow {
        NewShow {
            host_id: UserId::new(),
            agent_id: None,
            title: "Midnight set".to_string(),
            capacity,
            price: PRICE,
            duration_minutes: 60,
        }
    }

    /// Customer input for a reservation
    #[must_use]
    pub fn new_ticket(name: &str) -> NewTicket {
        NewTicket {
            customer_name: name.to_string(),
            pin_hash: None,
        }
    }

    /// A fresh reservation on `show`
    ///
    /// # Panics
    ///
    /// Never for the fixed customer name used here.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn reserved_ticket(show: &Show) -> Ticket {
        Ticket::reserve(
            TicketId::new(),
            show.id,
            show.price,
            new_ticket("Grace"),
            Some(InvoiceId::new(format!("inv-{}", TicketId::new()))),
            test_clock().now(),
        )
        .expect("fixture ticket should be valid")
    }

    /// A payment ledger row for an unrelated ticket
    #[must_use]
    pub fn payment_row(reference: &str, cents: u64) -> Transaction {
        Transaction {
            reference: TransactionId::new(reference),
            ticket_id: TicketId::new(),
            show_id: ShowId::new(),
            direction: Direction::Payment,
            amount: Money::from_cents(cents),
            currency: "USD".to_string(),
            confirmations: 1,
            recorded_at: test_clock().now(),
        }
    }
}

/// Machine environment on the fixed test clock with default timer delays
#[must_use]
pub fn test_environment() -> MachineEnvironment {
    MachineEnvironment::new(Arc::new(mocks::test_clock()), TimerSettings::default())
}

// Re-export commonly used items
pub use memory::{
    InMemoryEventLog, InMemoryLedger, InMemoryScheduler, InMemorySnapshotStore, MockPaymentGateway,
};
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use reducer_test::{ReducerTest, assertions};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::starting_at(test_clock().now());
        let start = clock.now();
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now() - start, chrono::Duration::seconds(90));
    }
}

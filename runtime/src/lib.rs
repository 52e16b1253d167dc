//! # Boxoffice Runtime
//!
//! The imperative shell around the pure show and ticket machines.
//!
//! ## Core Components
//!
//! - **[`Orchestrator`]**: rehydrate, reduce, persist with compare-and-set,
//!   then execute effects (event log, timers, cross-machine dispatch)
//! - **[`JobDispatcher`]**: re-validates due jobs and feeds them back through
//!   the orchestrator
//! - **[`Reconciler`]**: invoice webhooks and refund payouts, always writing
//!   the ledger before the ticket moves
//! - **[`RetryPolicy`]**: redelivery backoff and the dead-letter decision
//! - **[`MetricsServer`]** / **[`EngineMetrics`]**: Prometheus metrics
//!
//! ## Example
//!
//! ```
//! use boxoffice_runtime::{Collaborators, Orchestrator, Outcome};
//! use boxoffice_testing::{
//!     fixtures, test_clock, test_environment, InMemoryEventLog, InMemoryLedger,
//!     InMemoryScheduler, InMemorySnapshotStore, MockPaymentGateway,
//! };
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let orchestrator = Orchestrator::new(
//!     Collaborators {
//!         store: Arc::new(InMemorySnapshotStore::new()),
//!         ledger: Arc::new(InMemoryLedger::new()),
//!         scheduler: Arc::new(InMemoryScheduler::new(Arc::new(test_clock()))),
//!         gateway: Arc::new(MockPaymentGateway::new()),
//!         events: Arc::new(InMemoryEventLog::new()),
//!     },
//!     test_environment(),
//! );
//!
//! let Ok(Outcome::Applied(show)) = orchestrator.create_show(fixtures::new_show(2)).await else {
//!     return;
//! };
//! let reservation = orchestrator
//!     .reserve_ticket(show.id, fixtures::new_ticket("Ada"))
//!     .await;
//! assert!(matches!(reservation, Ok(Outcome::Applied(_))));
//! # });
//! ```

pub mod error;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod orchestrator;
pub mod reconciliation;
pub mod retry;

pub use error::{EngineError, Outcome};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use jobs::JobDispatcher;
pub use metrics::{EngineMetrics, MetricsError, MetricsServer};
pub use orchestrator::{
    Collaborators, Orchestrator, OrchestratorConfig, RESERVATION_TIMEOUT, Reservation,
};
pub use reconciliation::{Ack, Reconciler};
pub use retry::{RetryDecision, RetryPolicy};

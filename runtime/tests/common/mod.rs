//! Shared harness for the runtime integration tests

#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::panic)]

use boxoffice_core::persistence::{
    DecrementOutcome, InventoryField, PersistenceError, SaveOutcome, SnapshotStore, Versioned,
};
use boxoffice_core::{
    InvoiceId, InvoiceStatus, InvoiceWebhook, JobError, JobKey, JobOutcome, Money, PaymentLine,
    Show, ShowId, ShowStatus, Ticket, TicketId, TimerSettings, TransactionId,
};
use boxoffice_core::environment::{Clock, MachineEnvironment};
use boxoffice_runtime::retry::RetryPolicy;
use boxoffice_runtime::{
    Ack, Collaborators, EngineError, JobDispatcher, Orchestrator, OrchestratorConfig, Outcome,
    Reconciler,
};
use boxoffice_testing::{
    InMemoryEventLog, InMemoryLedger, InMemoryScheduler, InMemorySnapshotStore, ManualClock,
    MockPaymentGateway, fixtures, test_clock,
};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub const TOKEN: &str = "test-webhook-token";

/// Snapshot store that can fail show saves, lose the next seat to a rival
/// or see the show called off right after a seat is claimed
#[derive(Clone, Debug, Default)]
pub struct FaultyStore {
    pub inner: InMemorySnapshotStore,
    fail_show_saves: Arc<AtomicBool>,
    steal_next_seat: Arc<AtomicBool>,
    cancel_after_next_claim: Arc<AtomicBool>,
}

impl FaultyStore {
    pub fn fail_show_saves(&self, fail: bool) {
        self.fail_show_saves.store(fail, Ordering::SeqCst);
    }

    /// The next conditional decrement is preceded by a rival one
    pub fn steal_next_seat(&self) {
        self.steal_next_seat.store(true, Ordering::SeqCst);
    }

    /// The show is cancelled by someone else right after the next claim
    pub fn cancel_after_next_claim(&self) {
        self.cancel_after_next_claim.store(true, Ordering::SeqCst);
    }
}

impl SnapshotStore for FaultyStore {
    fn load_show(
        &self,
        id: ShowId,
    ) -> BoxFuture<'_, Result<Option<Versioned<Show>>, PersistenceError>> {
        self.inner.load_show(id)
    }

    fn save_show<'a>(
        &'a self,
        show: &'a Show,
        expected: Option<u64>,
    ) -> BoxFuture<'a, Result<SaveOutcome, PersistenceError>> {
        if self.fail_show_saves.load(Ordering::SeqCst) {
            let locked = PersistenceError::DatabaseError("show table locked".into());
            return Box::pin(async { Err(locked) });
        }
        self.inner.save_show(show, expected)
    }

    fn conditional_decrement(
        &self,
        id: ShowId,
        field: InventoryField,
        by: u32,
    ) -> BoxFuture<'_, Result<DecrementOutcome, PersistenceError>> {
        Box::pin(async move {
            if self.steal_next_seat.swap(false, Ordering::SeqCst) {
                self.inner.conditional_decrement(id, field, by).await?;
            }
            let outcome = self.inner.conditional_decrement(id, field, by).await?;
            if let DecrementOutcome::Applied(claimed) = &outcome {
                if self.cancel_after_next_claim.swap(false, Ordering::SeqCst) {
                    let mut show = claimed.snapshot.clone();
                    show.status = ShowStatus::Cancelled;
                    self.inner.save_show(&show, Some(claimed.version)).await?;
                }
            }
            Ok(outcome)
        })
    }

    fn load_ticket(
        &self,
        id: TicketId,
    ) -> BoxFuture<'_, Result<Option<Versioned<Ticket>>, PersistenceError>> {
        self.inner.load_ticket(id)
    }

    fn save_ticket<'a>(
        &'a self,
        ticket: &'a Ticket,
        expected: Option<u64>,
    ) -> BoxFuture<'a, Result<SaveOutcome, PersistenceError>> {
        self.inner.save_ticket(ticket, expected)
    }

    fn ticket_for_invoice<'a>(
        &'a self,
        invoice_id: &'a InvoiceId,
    ) -> BoxFuture<'a, Result<Option<TicketId>, PersistenceError>> {
        self.inner.ticket_for_invoice(invoice_id)
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), PersistenceError>> {
        self.inner.ping()
    }
}

/// Facade over in-memory collaborators on a manual clock
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub reconciler: Reconciler,
    pub dispatcher: JobDispatcher,
    pub store: FaultyStore,
    pub ledger: InMemoryLedger,
    pub scheduler: Arc<InMemoryScheduler>,
    pub gateway: MockPaymentGateway,
    pub events: InMemoryEventLog,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_gateway(MockPaymentGateway::new())
    }

    pub fn with_gateway(gateway: MockPaymentGateway) -> Self {
        Self::build(gateway, 5)
    }

    pub fn build(gateway: MockPaymentGateway, max_conflict_retries: u32) -> Self {
        let clock = Arc::new(ManualClock::starting_at(test_clock().now()));
        let store = FaultyStore::default();
        let ledger = InMemoryLedger::new();
        let events = InMemoryEventLog::new();
        let scheduler = Arc::new(InMemoryScheduler::new(clock.clone()));

        let env = MachineEnvironment::new(clock.clone(), TimerSettings::default());
        let orchestrator = Orchestrator::new(
            Collaborators {
                store: Arc::new(store.clone()),
                ledger: Arc::new(ledger.clone()),
                scheduler: scheduler.clone(),
                gateway: Arc::new(gateway.clone()),
                events: Arc::new(events.clone()),
            },
            env,
        )
        .with_config(OrchestratorConfig {
            max_conflict_retries,
            gateway_retry: RetryPolicy::builder()
                .max_attempts(2)
                .initial_delay(Duration::from_millis(1))
                .build(),
        });
        let reconciler = Reconciler::new(orchestrator.clone(), TOKEN);
        let dispatcher = JobDispatcher::new(orchestrator.clone(), reconciler.clone());

        Self {
            orchestrator,
            reconciler,
            dispatcher,
            store,
            ledger,
            scheduler,
            gateway,
            events,
            clock,
        }
    }

    pub async fn open_show(&self, capacity: u32) -> Show {
        match self.orchestrator.create_show(fixtures::new_show(capacity)).await.unwrap() {
            Outcome::Applied(show) => show,
            other => panic!("show creation failed: {other:?}"),
        }
    }

    pub async fn reserve(&self, show_id: ShowId, name: &str) -> Ticket {
        match self
            .orchestrator
            .reserve_ticket(show_id, fixtures::new_ticket(name))
            .await
            .unwrap()
        {
            Outcome::Applied(reservation) => reservation.ticket,
            other => panic!("reservation failed: {other:?}"),
        }
    }

    pub fn webhook(
        ticket: &Ticket,
        status: InvoiceStatus,
        payments: &[(&str, u64)],
    ) -> InvoiceWebhook {
        InvoiceWebhook {
            invoice_id: ticket.payment.invoice_id.clone().unwrap(),
            status,
            payments: payments
                .iter()
                .map(|(reference, cents)| PaymentLine {
                    id: TransactionId::new(*reference),
                    amount: Money::from_cents(*cents),
                    currency: "USD".to_string(),
                    confirmations: 1,
                })
                .collect(),
        }
    }

    pub async fn pay(
        &self,
        ticket: &Ticket,
        reference: &str,
        cents: u64,
    ) -> Result<Ack, EngineError> {
        let webhook = Self::webhook(ticket, InvoiceStatus::Complete, &[(reference, cents)]);
        self.reconciler.handle_invoice_webhook(TOKEN, webhook).await
    }

    pub fn show(&self, id: ShowId) -> Show {
        self.store.inner.show(id).unwrap()
    }

    pub fn ticket(&self, id: TicketId) -> Ticket {
        self.store.inner.ticket(id).unwrap()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub async fn run_jobs(&self) -> Vec<(JobKey, Result<JobOutcome, JobError>)> {
        self.scheduler.run_due(&self.dispatcher).await
    }
}

//! In-memory collaborators for fast, deterministic tests
//!
//! Every adapter the orchestration facade needs, backed by `HashMap`s:
//! - [`InMemorySnapshotStore`]: versioned snapshots with compare-and-set saves
//! - [`InMemoryLedger`]: append-only rows, unique per (direction, reference)
//! - [`InMemoryEventLog`]: captured show log entries
//! - [`InMemoryScheduler`]: pending jobs delivered on demand with [`InMemoryScheduler::run_due`]
//! - [`MockPaymentGateway`]: numbered invoices and payouts
//!
//! Each adapter can be switched to fail so tests can exercise infrastructure errors.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already panicked

use boxoffice_core::environment::Clock;
use boxoffice_core::event_log::{EventLog, EventLogError, ShowLogEntry};
use boxoffice_core::gateway::{GatewayError, Invoice, PaymentGateway, PayoutStatus, RefundRequest};
use boxoffice_core::job::{
    Job, JobError, JobHandler, JobKey, JobOutcome, JobRequest, JobScheduler, SchedulerError,
};
use boxoffice_core::ledger::{Ledger, LedgerError, RecordOutcome, Transaction};
use boxoffice_core::persistence::{
    DecrementOutcome, InventoryField, PersistenceError, SaveOutcome, SnapshotStore, Versioned,
};
use boxoffice_core::show::{Show, ShowStatus};
use boxoffice_core::ticket::Ticket;
use boxoffice_core::types::{InvoiceId, Money, PayoutId, ShowId, TicketId, TransactionId};
use chrono::Duration as ChronoDuration;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

fn ready<T: Send + 'static>(value: T) -> BoxFuture<'static, T> {
    Box::pin(futures::future::ready(value))
}

// ============================================================================
// Snapshot store
// ============================================================================

/// In-memory snapshot store.
///
/// # Example
///
/// ```
/// use boxoffice_testing::InMemorySnapshotStore;
/// use boxoffice_core::persistence::SnapshotStore;
/// use boxoffice_core::types::ShowId;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemorySnapshotStore::new();
/// assert!(store.load_show(ShowId::new()).await?.is_none());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemorySnapshotStore {
    shows: Arc<RwLock<HashMap<ShowId, Versioned<Show>>>>,
    tickets: Arc<RwLock<HashMap<TicketId, Versioned<Ticket>>>>,
    invoices: Arc<RwLock<HashMap<InvoiceId, TicketId>>>,
    unavailable: Arc<AtomicBool>,
    conflicts_to_inject: Arc<AtomicU64>,
}

impl InMemorySnapshotStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a database error until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `count` saves report a conflict, as if another writer won
    pub fn inject_conflicts(&self, count: u64) {
        self.conflicts_to_inject.store(count, Ordering::SeqCst);
    }

    /// Current show snapshot, bypassing versions
    #[must_use]
    pub fn show(&self, id: ShowId) -> Option<Show> {
        self.shows.read().unwrap().get(&id).map(|v| v.snapshot.clone())
    }

    /// Current ticket snapshot, bypassing versions
    #[must_use]
    pub fn ticket(&self, id: TicketId) -> Option<Ticket> {
        self.tickets.read().unwrap().get(&id).map(|v| v.snapshot.clone())
    }

    /// Number of stored tickets
    #[must_use]
    pub fn ticket_count(&self) -> usize {
        self.tickets.read().unwrap().len()
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(PersistenceError::DatabaseError("store unavailable".into()))
        } else {
            Ok(())
        }
    }

    fn injected_conflict(&self) -> bool {
        self.conflicts_to_inject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn compare_and_set<K, T>(
        map: &RwLock<HashMap<K, Versioned<T>>>,
        key: K,
        snapshot: &T,
        expected: Option<u64>,
    ) -> SaveOutcome
    where
        K: std::hash::Hash + Eq,
        T: Clone,
    {
        let mut map = map.write().unwrap();
        let current = map.get(&key).map(|v| v.version);
        let version = match (current, expected) {
            (None, None) => 1,
            (Some(current), Some(expected)) if current == expected => current + 1,
            _ => return SaveOutcome::Conflict,
        };
        map.insert(
            key,
            Versioned {
                snapshot: snapshot.clone(),
                version,
            },
        );
        SaveOutcome::Saved(version)
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn load_show(
        &self,
        id: ShowId,
    ) -> BoxFuture<'_, Result<Option<Versioned<Show>>, PersistenceError>> {
        let result = self
            .check()
            .map(|()| self.shows.read().unwrap().get(&id).cloned());
        ready(result)
    }

    fn save_show<'a>(
        &'a self,
        show: &'a Show,
        expected: Option<u64>,
    ) -> BoxFuture<'a, Result<SaveOutcome, PersistenceError>> {
        let result = self.check().map(|()| {
            if expected.is_some() && self.injected_conflict() {
                SaveOutcome::Conflict
            } else {
                Self::compare_and_set(&self.shows, show.id, show, expected)
            }
        });
        ready(result)
    }

    fn conditional_decrement(
        &self,
        id: ShowId,
        field: InventoryField,
        by: u32,
    ) -> BoxFuture<'_, Result<DecrementOutcome, PersistenceError>> {
        let result = self.check().and_then(|()| {
            let mut shows = self.shows.write().unwrap();
            let Some(stored) = shows.get_mut(&id) else {
                return Err(PersistenceError::DatabaseError(format!("show {id} not found")));
            };
            let selling = matches!(
                stored.snapshot.status,
                ShowStatus::BoxOfficeOpen | ShowStatus::BoxOfficeClosed
            );
            if !selling {
                return Ok(DecrementOutcome::Exhausted);
            }
            match field {
                InventoryField::TicketsAvailable => {
                    let counters = &mut stored.snapshot.counters;
                    if counters.tickets_available < by {
                        return Ok(DecrementOutcome::Exhausted);
                    }
                    counters.tickets_available -= by;
                    counters.tickets_reserved += by;
                },
            }
            stored.version += 1;
            Ok(DecrementOutcome::Applied(stored.clone()))
        });
        ready(result)
    }

    fn load_ticket(
        &self,
        id: TicketId,
    ) -> BoxFuture<'_, Result<Option<Versioned<Ticket>>, PersistenceError>> {
        let result = self
            .check()
            .map(|()| self.tickets.read().unwrap().get(&id).cloned());
        ready(result)
    }

    fn save_ticket<'a>(
        &'a self,
        ticket: &'a Ticket,
        expected: Option<u64>,
    ) -> BoxFuture<'a, Result<SaveOutcome, PersistenceError>> {
        let result = self.check().map(|()| {
            if expected.is_some() && self.injected_conflict() {
                return SaveOutcome::Conflict;
            }
            let outcome = Self::compare_and_set(&self.tickets, ticket.id, ticket, expected);
            let invoice = &ticket.payment.invoice_id;
            if let (SaveOutcome::Saved(_), Some(invoice_id)) = (outcome, invoice) {
                self.invoices
                    .write()
                    .unwrap()
                    .insert(invoice_id.clone(), ticket.id);
            }
            outcome
        });
        ready(result)
    }

    fn ticket_for_invoice<'a>(
        &'a self,
        invoice_id: &'a InvoiceId,
    ) -> BoxFuture<'a, Result<Option<TicketId>, PersistenceError>> {
        let result = self
            .check()
            .map(|()| self.invoices.read().unwrap().get(invoice_id).copied());
        ready(result)
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), PersistenceError>> {
        ready(self.check())
    }
}

// ============================================================================
// Ledger
// ============================================================================

/// In-memory append-only ledger
#[derive(Clone, Debug, Default)]
pub struct InMemoryLedger {
    rows: Arc<RwLock<Vec<Transaction>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryLedger {
    /// Create a new empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make writes fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// All rows in write order
    #[must_use]
    pub fn rows(&self) -> Vec<Transaction> {
        self.rows.read().unwrap().clone()
    }
}

impl Ledger for InMemoryLedger {
    fn record(
        &self,
        transaction: Transaction,
    ) -> BoxFuture<'_, Result<RecordOutcome, LedgerError>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return ready(Err(LedgerError::DatabaseError("ledger unavailable".into())));
        }
        let mut rows = self.rows.write().unwrap();
        let duplicate = rows
            .iter()
            .any(|row| {
                row.direction == transaction.direction && row.reference == transaction.reference
            });
        if duplicate {
            return ready(Ok(RecordOutcome::Duplicate));
        }
        rows.push(transaction);
        ready(Ok(RecordOutcome::Recorded))
    }

    fn for_ticket(
        &self,
        ticket_id: TicketId,
    ) -> BoxFuture<'_, Result<Vec<Transaction>, LedgerError>> {
        let rows = self
            .rows
            .read()
            .unwrap()
            .iter()
            .filter(|row| row.ticket_id == ticket_id)
            .cloned()
            .collect();
        ready(Ok(rows))
    }
}

// ============================================================================
// Event log
// ============================================================================

/// Captures show log entries
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventLog {
    entries: Arc<RwLock<Vec<ShowLogEntry>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryEventLog {
    /// Create a new empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make appends fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every entry appended so far
    #[must_use]
    pub fn all(&self) -> Vec<ShowLogEntry> {
        self.entries.read().unwrap().clone()
    }
}

impl EventLog for InMemoryEventLog {
    fn append(&self, entry: ShowLogEntry) -> BoxFuture<'_, Result<(), EventLogError>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return ready(Err(EventLogError::DatabaseError("event log unavailable".into())));
        }
        self.entries.write().unwrap().push(entry);
        ready(Ok(()))
    }

    fn entries(
        &self,
        show_id: ShowId,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ShowLogEntry>, EventLogError>> {
        let entries: Vec<_> = self
            .entries
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.show_id == show_id)
            .cloned()
            .collect();
        let skip = entries.len().saturating_sub(limit);
        ready(Ok(entries.into_iter().skip(skip).collect()))
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Job scheduler that delivers only when told to.
///
/// Due times come from the injected clock, so pairing it with a
/// [`crate::ManualClock`] lets a test fast-forward through timers.
#[derive(Clone)]
pub struct InMemoryScheduler {
    clock: Arc<dyn Clock>,
    pending: Arc<RwLock<Vec<Job>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryScheduler {
    /// Scheduler whose due times follow `clock`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            pending: Arc::new(RwLock::new(Vec::new())),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make scheduling fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Pending jobs, soonest first
    #[must_use]
    pub fn pending(&self) -> Vec<Job> {
        let mut jobs = self.pending.read().unwrap().clone();
        jobs.sort_by_key(|job| job.due_at);
        jobs
    }

    /// Pending job with `key`, if any
    #[must_use]
    pub fn find(&self, key: &JobKey) -> Option<Job> {
        self.pending.read().unwrap().iter().find(|j| &j.key == key).cloned()
    }

    /// Whether a job for `event` is pending on any entity
    #[must_use]
    pub fn has_pending(&self, event: &str) -> bool {
        self.pending.read().unwrap().iter().any(|j| j.key.event == event)
    }

    fn take_next_due(&self) -> Option<Job> {
        let now = self.clock.now();
        let mut pending = self.pending.write().unwrap();
        let index = pending
            .iter()
            .enumerate()
            .filter(|(_, job)| job.due_at <= now)
            .min_by_key(|(_, job)| job.due_at)
            .map(|(index, _)| index)?;
        Some(pending.remove(index))
    }

    /// Deliver every job that is due, including jobs that become due while
    /// running. Retryable failures go back in the queue with one more attempt.
    /// Returns the outcome of each delivery in order.
    pub async fn run_due(
        &self,
        handler: &dyn JobHandler,
    ) -> Vec<(JobKey, Result<JobOutcome, JobError>)> {
        let mut delivered = Vec::new();
        // Bounded so a handler that keeps failing cannot spin forever
        for _ in 0..1_000 {
            let Some(job) = self.take_next_due() else {
                break;
            };
            let key = job.key.clone();
            let result = handler.handle(job.clone()).await;
            if matches!(result, Err(JobError::Retryable(_))) {
                let mut retry = job;
                retry.attempts += 1;
                retry.due_at = self.clock.now() + ChronoDuration::seconds(1);
                self.pending.write().unwrap().push(retry);
                delivered.push((key, result));
                break;
            }
            delivered.push((key, result));
        }
        delivered
    }
}

impl std::fmt::Debug for InMemoryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryScheduler")
            .field("pending", &self.pending.read().unwrap().len())
            .finish_non_exhaustive()
    }
}

impl JobScheduler for InMemoryScheduler {
    fn schedule(&self, request: JobRequest) -> BoxFuture<'_, Result<(), SchedulerError>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return ready(Err(SchedulerError::Unavailable("scheduler unavailable".into())));
        }
        let delay = ChronoDuration::from_std(request.delay)
            .unwrap_or_else(|_| ChronoDuration::days(36_500));
        let job = Job {
            id: Uuid::new_v4(),
            due_at: self.clock.now() + delay,
            key: request.key,
            expected_state: request.expected_state,
            payload: request.payload,
            attempts: 0,
        };
        let mut pending = self.pending.write().unwrap();
        pending.retain(|existing| existing.key != job.key);
        pending.push(job);
        ready(Ok(()))
    }

    fn cancel(&self, key: JobKey) -> BoxFuture<'_, Result<bool, SchedulerError>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return ready(Err(SchedulerError::Unavailable("scheduler unavailable".into())));
        }
        let mut pending = self.pending.write().unwrap();
        let before = pending.len();
        pending.retain(|existing| existing.key != key);
        ready(Ok(pending.len() != before))
    }
}

// ============================================================================
// Payment gateway
// ============================================================================

/// Payment gateway double with numbered invoices and payouts.
///
/// Payouts stay pending until [`MockPaymentGateway::settle_payout`] is called,
/// or settle on first poll when built with [`MockPaymentGateway::auto_settling`].
#[derive(Clone, Debug, Default)]
pub struct MockPaymentGateway {
    invoices: Arc<RwLock<Vec<(TicketId, Money, InvoiceId)>>>,
    refunds: Arc<RwLock<Vec<(PayoutId, RefundRequest)>>>,
    payouts: Arc<RwLock<HashMap<PayoutId, PayoutStatus>>>,
    counter: Arc<AtomicU64>,
    auto_settle: bool,
    unavailable: Arc<AtomicBool>,
}

impl MockPaymentGateway {
    /// Gateway whose payouts stay pending
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gateway whose payouts complete on the first status poll
    #[must_use]
    pub fn auto_settling() -> Self {
        Self {
            auto_settle: true,
            ..Self::default()
        }
    }

    /// Make every call fail as unavailable until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Invoices created so far
    #[must_use]
    pub fn invoices(&self) -> Vec<(TicketId, Money, InvoiceId)> {
        self.invoices.read().unwrap().clone()
    }

    /// Refund payouts started so far
    #[must_use]
    pub fn refunds(&self) -> Vec<(PayoutId, RefundRequest)> {
        self.refunds.read().unwrap().clone()
    }

    /// Mark a payout as completed for its full amount
    pub fn settle_payout(&self, payout_id: &PayoutId) {
        let amount = self
            .refunds
            .read()
            .unwrap()
            .iter()
            .find(|(id, _)| id == payout_id)
            .map_or(Money::ZERO, |(_, request)| request.amount);
        self.payouts
            .write()
            .unwrap()
            .insert(payout_id.clone(), Self::completed(payout_id, amount));
    }

    /// Mark a payout as failed
    pub fn fail_payout(&self, payout_id: &PayoutId, reason: &str) {
        self.payouts.write().unwrap().insert(
            payout_id.clone(),
            PayoutStatus::Failed {
                reason: reason.to_string(),
            },
        );
    }

    fn completed(payout_id: &PayoutId, amount: Money) -> PayoutStatus {
        PayoutStatus::Completed {
            reference: TransactionId::new(format!("rf-{payout_id}")),
            amount,
            currency: "USD".to_string(),
        }
    }

    fn check(&self) -> Result<(), GatewayError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(GatewayError::Unavailable("gateway unavailable".into()))
        } else {
            Ok(())
        }
    }

    fn next(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn create_invoice(
        &self,
        ticket_id: TicketId,
        amount: Money,
    ) -> BoxFuture<'_, Result<Invoice, GatewayError>> {
        let result = self.check().map(|()| {
            let invoice_id = InvoiceId::new(self.next("inv"));
            self.invoices
                .write()
                .unwrap()
                .push((ticket_id, amount, invoice_id.clone()));
            Invoice {
                checkout_url: Some(format!("https://pay.test/i/{invoice_id}")),
                invoice_id,
            }
        });
        ready(result)
    }

    fn issue_refund(
        &self,
        request: RefundRequest,
    ) -> BoxFuture<'_, Result<PayoutId, GatewayError>> {
        let result = self.check().map(|()| {
            let payout_id = PayoutId::new(self.next("po"));
            self.refunds.write().unwrap().push((payout_id.clone(), request));
            self.payouts
                .write()
                .unwrap()
                .insert(payout_id.clone(), PayoutStatus::Pending);
            payout_id
        });
        ready(result)
    }

    fn payout_status(
        &self,
        payout_id: PayoutId,
    ) -> BoxFuture<'_, Result<PayoutStatus, GatewayError>> {
        let result = self.check().and_then(|()| {
            if self.auto_settle {
                self.settle_payout(&payout_id);
            }
            self.payouts
                .read()
                .unwrap()
                .get(&payout_id)
                .cloned()
                .ok_or_else(|| GatewayError::Rejected(format!("unknown payout {payout_id}")))
        });
        ready(result)
    }
}

//! Orchestration facade.
//!
//! Every call rehydrates the target snapshot from the store, runs the pure
//! machine over a copy, persists the result with a compare-and-set on the
//! loaded version and only then executes the effects. Nothing is held in
//! memory between calls, so any number of workers can share one store.
//!
//! Effects run in the order the machine returned them:
//! - `Log` appends to the event log (best effort)
//! - `Schedule` / `CancelJob` talk to the job scheduler (best effort)
//! - `Dispatch` is sent to the other aggregate through this same facade; an
//!   infrastructure failure turns it into an immediate job carrying the
//!   serialized event

use crate::error::{EngineError, Outcome};
use crate::health::{HealthCheck, HealthReport};
use crate::jobs::deferred_event;
use crate::metrics::EngineMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use boxoffice_core::{
    Aggregate, DecrementOutcome, Direction, Dispatch, Effect, Effects, EventLog, GatewayError,
    InventoryField, JobKey, JobRequest, JobScheduler, Ledger, Lifecycle, MachineEnvironment,
    NewShow, NewTicket, PaymentGateway, Reducer, Rejection, SaveOutcome, Show, ShowAction, ShowId,
    ShowMachine, ShowView, SnapshotStore, Ticket, TicketAction, TicketId, TicketMachine,
    TicketStatus, TicketView, Versioned,
};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Name of the reservation timer job
pub const RESERVATION_TIMEOUT: &str = "RESERVATION_TIMEOUT";

/// Tuning knobs of the facade
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Reload-reduce-save attempts after a lost compare-and-set
    pub max_conflict_retries: u32,
    /// Backoff for invoice creation
    pub gateway_retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
            gateway_retry: RetryPolicy::builder()
                .max_attempts(3)
                .initial_delay(Duration::from_millis(200))
                .max_delay(Duration::from_secs(2))
                .build(),
        }
    }
}

/// Everything outside the process the facade talks to
#[derive(Clone)]
pub struct Collaborators {
    /// Show and ticket snapshots
    pub store: Arc<dyn SnapshotStore>,
    /// Money ledger
    pub ledger: Arc<dyn Ledger>,
    /// Timer and deferred-message queue
    pub scheduler: Arc<dyn JobScheduler>,
    /// Invoices and refund payouts
    pub gateway: Arc<dyn PaymentGateway>,
    /// Show activity log
    pub events: Arc<dyn EventLog>,
}

/// A reservation that claimed a seat
#[derive(Clone, Debug, PartialEq)]
pub struct Reservation {
    /// The new ticket, in `reserved.waiting4Payment`
    pub ticket: Ticket,
    /// Hosted checkout page of the invoice, if the gateway provides one
    pub checkout_url: Option<String>,
}

/// The orchestration facade: `send`, `canTransition` and `describe` for
/// shows and tickets, plus show creation and ticket reservation.
///
/// Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn SnapshotStore>,
    ledger: Arc<dyn Ledger>,
    scheduler: Arc<dyn JobScheduler>,
    gateway: Arc<dyn PaymentGateway>,
    events: Arc<dyn EventLog>,
    env: MachineEnvironment,
    config: OrchestratorConfig,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("env", &self.env)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Event name of a machine action, for logs and metrics
trait EventName {
    fn event_name(&self) -> &'static str;
}

impl EventName for ShowAction {
    fn event_name(&self) -> &'static str {
        self.name()
    }
}

impl EventName for TicketAction {
    fn event_name(&self) -> &'static str {
        self.name()
    }
}

impl Orchestrator {
    /// Creates a facade over `collaborators` with the default config
    #[must_use]
    pub fn new(collaborators: Collaborators, env: MachineEnvironment) -> Self {
        Self {
            store: collaborators.store,
            ledger: collaborators.ledger,
            scheduler: collaborators.scheduler,
            gateway: collaborators.gateway,
            events: collaborators.events,
            env,
            config: OrchestratorConfig::default(),
        }
    }

    /// Replace the config
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Snapshot store
    #[must_use]
    pub fn store(&self) -> &dyn SnapshotStore {
        self.store.as_ref()
    }

    /// Money ledger
    #[must_use]
    pub fn ledger(&self) -> &dyn Ledger {
        self.ledger.as_ref()
    }

    /// Job scheduler
    #[must_use]
    pub fn scheduler(&self) -> &dyn JobScheduler {
        self.scheduler.as_ref()
    }

    /// Payment gateway
    #[must_use]
    pub fn gateway(&self) -> &dyn PaymentGateway {
        self.gateway.as_ref()
    }

    /// Show activity log
    #[must_use]
    pub fn events(&self) -> &dyn EventLog {
        self.events.as_ref()
    }

    /// Machine environment (clock and timer delays)
    #[must_use]
    pub const fn env(&self) -> &MachineEnvironment {
        &self.env
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Open the box office of a new show.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    #[tracing::instrument(skip(self, new), fields(title = %new.title))]
    pub async fn create_show(&self, new: NewShow) -> Result<Outcome<Show>, EngineError> {
        let show = match Show::open(ShowId::new(), new, self.env.now()) {
            Ok(show) => show,
            Err(rejection) => return Ok(Outcome::Rejected(rejection)),
        };
        match self.store.save_show(&show, None).await? {
            SaveOutcome::Saved(_) => {
                tracing::info!(show_id = %show.id, capacity = show.capacity, "Show created");
                Ok(Outcome::Applied(show))
            },
            SaveOutcome::Conflict => Err(EngineError::Conflict {
                machine: Show::MACHINE,
                id: show.id.to_string(),
                attempts: 1,
            }),
        }
    }

    /// Reserve a seat on `show_id` for a new ticket.
    ///
    /// The guard is dry-run against the loaded show, an invoice is created,
    /// and the seat is claimed with the store's conditional decrement so two
    /// racing reservations can never both take the last seat. The show then
    /// records the seat, the ticket is stored and its reservation timer is
    /// scheduled.
    ///
    /// # Errors
    ///
    /// Returns an error on store, gateway or scheduler failures.
    #[tracing::instrument(skip(self, new), fields(show_id = %show_id))]
    pub async fn reserve_ticket(
        &self,
        show_id: ShowId,
        new: NewTicket,
    ) -> Result<Outcome<Reservation>, EngineError> {
        let started = Instant::now();
        let show = self.load::<Show>(show_id).await?.snapshot;
        let ticket_id = TicketId::new();

        let reserved = Ticket::reserve(ticket_id, show_id, show.price, new, None, self.env.now());
        let mut ticket = match reserved {
            Ok(ticket) => ticket,
            Err(rejection) => return Ok(Outcome::Rejected(rejection)),
        };

        let mut probe = show.clone();
        let dry_run = ShowAction::TicketReserved {
            ticket_id,
            seat_claimed: false,
        };
        if let Err(rejection) = ShowMachine::new().reduce(&mut probe, dry_run, &self.env) {
            tracing::debug!(state = show.state_tag(), %rejection, "Reservation declined");
            EngineMetrics::record_rejection(Show::MACHINE, "TICKET_RESERVED");
            return Ok(Outcome::Rejected(rejection));
        }

        let invoice = retry_with_predicate(
            &self.config.gateway_retry,
            || self.gateway.create_invoice(ticket_id, show.price),
            GatewayError::is_retryable,
        )
        .await?;
        ticket.payment.invoice_id = Some(invoice.invoice_id);

        if let DecrementOutcome::Exhausted = self
            .store
            .conditional_decrement(show_id, InventoryField::TicketsAvailable, 1)
            .await?
        {
            tracing::debug!(%ticket_id, "Lost the race for the last seat");
            EngineMetrics::record_rejection(Show::MACHINE, "TICKET_RESERVED");
            return Ok(Outcome::Rejected(Rejection::InventoryExhausted { show_id }));
        }

        let claimed = ShowAction::TicketReserved {
            ticket_id,
            seat_claimed: true,
        };
        match self.send_show(show_id, claimed).await {
            Ok(Outcome::Rejected(rejection)) => {
                tracing::warn!(%ticket_id, %rejection, "Show refused the claimed seat");
                self.release_claimed_seat(show_id, ticket_id).await;
                return Ok(Outcome::Rejected(rejection));
            },
            Ok(_) => {},
            Err(error) => {
                tracing::error!(%ticket_id, %error, "Seat claimed but not recorded on the show");
                self.release_claimed_seat(show_id, ticket_id).await;
                return Err(error);
            },
        }

        let saved = self.store.save_ticket(&ticket, None).await;
        if !matches!(saved, Ok(SaveOutcome::Saved(_))) {
            self.release_claimed_seat(show_id, ticket_id).await;
            return Err(match saved {
                Err(error) => error.into(),
                _ => EngineError::Conflict {
                    machine: Ticket::MACHINE,
                    id: ticket_id.to_string(),
                    attempts: 1,
                },
            });
        }

        let timer = JobRequest::after(
            JobKey::ticket(ticket_id, RESERVATION_TIMEOUT),
            self.env.timers.reservation_timeout,
        )
        .expecting(TicketStatus::Waiting4Payment.tag());
        if let Err(error) = self.scheduler.schedule(timer).await {
            tracing::warn!(%ticket_id, %error, "Failed to schedule reservation timeout");
        }

        tracing::info!(%ticket_id, "Ticket reserved");
        EngineMetrics::record_transition(Ticket::MACHINE, "TICKET_RESERVED", started.elapsed());
        Ok(Outcome::Applied(Reservation {
            ticket,
            checkout_url: invoice.checkout_url,
        }))
    }

    /// Give back a seat the store handed out for a ticket that was never
    /// stored. Goes through the dispatch path so a failing store defers it.
    async fn release_claimed_seat(&self, show_id: ShowId, ticket_id: TicketId) {
        tracing::warn!(%ticket_id, "Releasing seat of an unsaved ticket");
        self.deliver(Dispatch::Show {
            show_id,
            action: ShowAction::ClaimReleased { ticket_id },
        })
        .await;
    }

    // ========================================================================
    // Send
    // ========================================================================

    /// Send an event to a show.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown id, or an
    /// infrastructure error. Guard failures are [`Outcome::Rejected`].
    #[tracing::instrument(skip(self, action), fields(show_id = %show_id, event = action.name()))]
    pub async fn send_show(
        &self,
        show_id: ShowId,
        action: ShowAction,
    ) -> Result<Outcome<Show>, EngineError> {
        self.apply(ShowMachine::new(), show_id, action).await
    }

    /// Send an event to a ticket.
    ///
    /// `JOINED_SHOW` and `LEFT_SHOW` are stamped with the current status of
    /// the ticket's show before the machine sees them. `PAYMENT_RECEIVED`
    /// and `REFUND_RECEIVED` are only accepted when the ledger already holds
    /// the matching row.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown id, or an
    /// infrastructure error. Guard failures are [`Outcome::Rejected`].
    #[tracing::instrument(
        skip(self, action),
        fields(ticket_id = %ticket_id, event = action.name())
    )]
    pub async fn send_ticket(
        &self,
        ticket_id: TicketId,
        action: TicketAction,
    ) -> Result<Outcome<Ticket>, EngineError> {
        if let Some(rejection) = self.unrecorded_money(ticket_id, &action).await? {
            tracing::warn!(
                %ticket_id,
                event = action.name(),
                %rejection,
                "Money event without a ledger row"
            );
            EngineMetrics::record_rejection(Ticket::MACHINE, action.name());
            return Ok(Outcome::Rejected(rejection));
        }
        self.send_recorded(ticket_id, action).await
    }

    /// [`Self::send_ticket`] for callers that just wrote the ledger row
    /// backing a money event.
    pub(crate) async fn send_recorded(
        &self,
        ticket_id: TicketId,
        mut action: TicketAction,
    ) -> Result<Outcome<Ticket>, EngineError> {
        if let TicketAction::JoinedShow { show_status } | TicketAction::LeftShow { show_status } =
            &mut action
        {
            let show_id = self.load::<Ticket>(ticket_id).await?.snapshot.show_id;
            *show_status = Some(self.load::<Show>(show_id).await?.snapshot.status);
        }
        self.apply(TicketMachine::new(), ticket_id, action).await
    }

    /// A rejection for a payment or refund the ledger has no row for
    async fn unrecorded_money(
        &self,
        ticket_id: TicketId,
        action: &TicketAction,
    ) -> Result<Option<Rejection>, EngineError> {
        let (reference, amount, direction) = match action {
            TicketAction::PaymentReceived {
                transaction_id,
                amount,
            } => (transaction_id, *amount, Direction::Payment),
            TicketAction::RefundReceived {
                transaction_id,
                amount,
            } => (transaction_id, *amount, Direction::Refund),
            _ => return Ok(None),
        };
        let recorded = self.ledger.for_ticket(ticket_id).await?.iter().any(|row| {
            row.reference == *reference && row.direction == direction && row.amount == amount
        });
        Ok((!recorded).then(|| {
            Rejection::InvalidInput(format!(
                "no {} of {amount} with reference {reference} in the ledger",
                direction.as_str()
            ))
        }))
    }

    async fn apply<R>(
        &self,
        machine: R,
        id: <R::State as Aggregate>::Id,
        action: R::Action,
    ) -> Result<Outcome<R::State>, EngineError>
    where
        R: Reducer<Environment = MachineEnvironment> + Send + Sync,
        R::State: Aggregate + Lifecycle,
        R::Action: EventName + Clone + Send + Sync,
    {
        let machine_name = <R::State as Aggregate>::MACHINE;
        let event = action.event_name();
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let loaded = self.load::<R::State>(id).await?;
            let mut next = loaded.snapshot.clone();

            let effects = match machine.reduce(&mut next, action.clone(), &self.env) {
                Ok(effects) => effects,
                Err(rejection) => {
                    tracing::debug!(
                        machine = machine_name,
                        %id,
                        event,
                        state = loaded.snapshot.state_tag(),
                        %rejection,
                        "Event rejected"
                    );
                    EngineMetrics::record_rejection(machine_name, event);
                    return Ok(Outcome::Rejected(rejection));
                },
            };

            if next == loaded.snapshot {
                tracing::debug!(machine = machine_name, %id, event, "Event changed nothing");
                self.run_effects(effects).await;
                return Ok(Outcome::Unchanged(next));
            }

            match next.save(self.store.as_ref(), Some(loaded.version)).await? {
                SaveOutcome::Saved(version) => {
                    tracing::info!(
                        machine = machine_name,
                        %id,
                        event,
                        from = loaded.snapshot.state_tag(),
                        to = next.state_tag(),
                        version,
                        "Transition applied"
                    );
                    EngineMetrics::record_transition(machine_name, event, started.elapsed());
                    self.run_effects(effects).await;
                    return Ok(Outcome::Applied(next));
                },
                SaveOutcome::Conflict => {
                    EngineMetrics::record_conflict(machine_name);
                    if attempts > self.config.max_conflict_retries {
                        tracing::error!(
                            machine = machine_name,
                            %id,
                            event,
                            attempts,
                            "Gave up after repeated conflicts"
                        );
                        return Err(EngineError::Conflict {
                            machine: machine_name,
                            id: id.to_string(),
                            attempts,
                        });
                    }
                    tracing::debug!(
                        machine = machine_name,
                        %id,
                        event,
                        attempts,
                        "Save conflict, reloading"
                    );
                },
            }
        }
    }

    // ========================================================================
    // Effects
    // ========================================================================

    fn run_effects(&self, effects: Effects) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            for effect in effects {
                match effect {
                    Effect::None => {},
                    Effect::Log(entry) => {
                        let show_id = entry.show_id;
                        let kind = entry.kind.as_str();
                        if let Err(error) = self.events.append(entry).await {
                            tracing::warn!(%show_id, kind, %error, "Failed to append show event");
                        }
                    },
                    Effect::Schedule(request) => {
                        let key = request.key.clone();
                        if let Err(error) = self.scheduler.schedule(request).await {
                            tracing::warn!(job = %key, %error, "Failed to schedule job");
                        }
                    },
                    Effect::CancelJob(key) => match self.scheduler.cancel(key.clone()).await {
                        Ok(existed) => tracing::trace!(job = %key, existed, "Job cancelled"),
                        Err(error) => tracing::warn!(job = %key, %error, "Failed to cancel job"),
                    },
                    Effect::Dispatch(dispatch) => self.deliver(dispatch).await,
                }
            }
        })
    }

    async fn deliver(&self, dispatch: Dispatch) {
        let event = dispatch.event_name();
        let result = match dispatch.clone() {
            Dispatch::Show { show_id, action } => {
                self.send_show(show_id, action).await.map(|o| o.label())
            },
            Dispatch::Ticket { ticket_id, action } => {
                self.send_ticket(ticket_id, action).await.map(|o| o.label())
            },
        };
        match result {
            Ok("rejected") => tracing::warn!(event, "Dispatch rejected by its target"),
            Ok(outcome) => tracing::debug!(event, outcome, "Dispatch delivered"),
            Err(error) if error.is_retryable() => {
                tracing::warn!(event, %error, "Dispatch failed, deferring to the job queue");
                self.defer(dispatch).await;
            },
            Err(error) => tracing::warn!(event, %error, "Dispatch dropped"),
        }
    }

    async fn defer(&self, dispatch: Dispatch) {
        let event = dispatch.event_name();
        let (key, payload) = match &dispatch {
            Dispatch::Show { show_id, action } => (
                JobKey::show(*show_id, &deferred_event(event)),
                serde_json::to_value(action),
            ),
            Dispatch::Ticket { ticket_id, action } => (
                JobKey::ticket(*ticket_id, &deferred_event(event)),
                serde_json::to_value(action),
            ),
        };
        let payload = match payload {
            Ok(payload) => payload,
            Err(error) => {
                tracing::error!(event, %error, "Could not serialize deferred dispatch");
                return;
            },
        };
        if let Err(error) = self
            .scheduler
            .schedule(JobRequest::immediate(key.clone()).with_payload(payload))
            .await
        {
            tracing::error!(job = %key, %error, "Failed to defer dispatch; message lost");
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    async fn load<A: Aggregate>(&self, id: A::Id) -> Result<Versioned<A>, EngineError> {
        A::load(self.store.as_ref(), id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                machine: A::MACHINE,
                id: id.to_string(),
            })
    }

    /// Current show snapshot.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] or a store failure.
    pub async fn show(&self, show_id: ShowId) -> Result<Versioned<Show>, EngineError> {
        self.load(show_id).await
    }

    /// Current ticket snapshot.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] or a store failure.
    pub async fn ticket(&self, ticket_id: TicketId) -> Result<Versioned<Ticket>, EngineError> {
        self.load(ticket_id).await
    }

    /// `describe` projection of a show.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] or a store failure.
    pub async fn describe_show(&self, show_id: ShowId) -> Result<ShowView, EngineError> {
        Ok(self.show(show_id).await?.snapshot.describe())
    }

    /// `describe` projection of a ticket.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] or a store failure.
    pub async fn describe_ticket(&self, ticket_id: TicketId) -> Result<TicketView, EngineError> {
        Ok(self.ticket(ticket_id).await?.snapshot.describe())
    }

    /// `canTransition` for a stored show.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] or a store failure.
    pub async fn can_show_transition(
        &self,
        show_id: ShowId,
        event: &str,
    ) -> Result<bool, EngineError> {
        Ok(self.show(show_id).await?.snapshot.can_transition(event))
    }

    /// `canTransition` for a stored ticket.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] or a store failure.
    pub async fn can_ticket_transition(
        &self,
        ticket_id: TicketId,
        event: &str,
    ) -> Result<bool, EngineError> {
        Ok(self.ticket(ticket_id).await?.snapshot.can_transition(event))
    }

    /// Readiness of the snapshot store.
    pub async fn health(&self) -> HealthReport {
        let store = match self.store.ping().await {
            Ok(()) => HealthCheck::healthy("snapshot_store"),
            Err(error) => HealthCheck::unhealthy("snapshot_store", error.to_string()),
        };
        HealthReport::new(vec![store])
    }
}

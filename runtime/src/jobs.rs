//! Job delivery into the machines.
//!
//! A job only says "this event may be due". [`JobDispatcher`] reloads the
//! entity, drops the job if the entity left the state the job was scheduled
//! for, and otherwise sends the event through the facade so the machine's own
//! guards have the last word. Late and duplicate deliveries therefore end up
//! as [`JobOutcome::Discarded`].

use crate::error::{EngineError, Outcome};
use crate::metrics::EngineMetrics;
use crate::orchestrator::Orchestrator;
use crate::reconciliation::Reconciler;
use boxoffice_core::{
    EntityKind, ISSUE_REFUND, Job, JobError, JobHandler, JobOutcome, Lifecycle, POLL_PAYOUT,
    ShowAction, ShowId, TicketAction, TicketId,
};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;

const DEFERRED_SEPARATOR: char = '/';

/// Unique job event name for a deferred dispatch of `event`.
///
/// Several messages with the same event name can be deferred to one entity
/// (one `TICKET_SOLD` per ticket), so each gets its own key.
#[must_use]
pub fn deferred_event(event: &str) -> String {
    format!("{event}{DEFERRED_SEPARATOR}{}", uuid::Uuid::new_v4())
}

/// Event name a job key stands for, without any deferral suffix
#[must_use]
pub fn base_event(key_event: &str) -> &str {
    key_event
        .split_once(DEFERRED_SEPARATOR)
        .map_or(key_event, |(event, _)| event)
}

/// [`JobHandler`] that routes due jobs to the facade and the reconciler
#[derive(Clone, Debug)]
pub struct JobDispatcher {
    orchestrator: Orchestrator,
    reconciler: Reconciler,
}

impl JobDispatcher {
    /// Creates a dispatcher
    #[must_use]
    pub const fn new(orchestrator: Orchestrator, reconciler: Reconciler) -> Self {
        Self {
            orchestrator,
            reconciler,
        }
    }

    async fn dispatch(&self, job: Job) -> Result<JobOutcome, JobError> {
        let event = base_event(&job.key.event);
        match job.key.entity {
            EntityKind::Show => {
                let show_id = ShowId::from_uuid(job.key.entity_id);
                let show = match self.orchestrator.show(show_id).await {
                    Ok(show) => show.snapshot,
                    Err(error) => return settle_error(error),
                };
                if let Some(discarded) = stale(&job, show.state_tag()) {
                    return Ok(discarded);
                }
                let action: ShowAction = decode(&job, event, ShowAction::from_unit_name)?;
                settle(self.orchestrator.send_show(show_id, action).await)
            },
            EntityKind::Ticket => {
                let ticket_id = TicketId::from_uuid(job.key.entity_id);
                let ticket = match self.orchestrator.ticket(ticket_id).await {
                    Ok(ticket) => ticket.snapshot,
                    Err(error) => return settle_error(error),
                };
                if let Some(discarded) = stale(&job, ticket.state_tag()) {
                    return Ok(discarded);
                }
                match event {
                    ISSUE_REFUND => settle(self.reconciler.issue_refund(&ticket).await),
                    POLL_PAYOUT => settle(self.reconciler.poll_payout(&ticket).await),
                    _ => {
                        let action: TicketAction =
                            decode(&job, event, TicketAction::from_unit_name)?;
                        settle(self.orchestrator.send_ticket(ticket_id, action).await)
                    },
                }
            },
        }
    }
}

impl JobHandler for JobDispatcher {
    fn handle(&self, job: Job) -> BoxFuture<'_, Result<JobOutcome, JobError>> {
        Box::pin(async move {
            let key = job.key.clone();
            let attempts = job.attempts;
            let result = self.dispatch(job).await;
            let label = match &result {
                Ok(JobOutcome::Applied) => {
                    tracing::info!(job = %key, attempts, "Job applied");
                    "applied"
                },
                Ok(JobOutcome::Discarded(reason)) => {
                    tracing::debug!(job = %key, %reason, "Job discarded");
                    "discarded"
                },
                Err(JobError::Retryable(error)) => {
                    tracing::warn!(job = %key, attempts, %error, "Job failed, will retry");
                    "retryable"
                },
                Err(JobError::Fatal(error)) => {
                    tracing::error!(job = %key, %error, "Job failed permanently");
                    "fatal"
                },
            };
            EngineMetrics::record_job(base_event(&key.event), label);
            result
        })
    }
}

/// Discard the job when the entity left the state it was scheduled for
fn stale(job: &Job, current: &str) -> Option<JobOutcome> {
    job.expected_state
        .as_deref()
        .filter(|expected| *expected != current)
        .map(|expected| JobOutcome::Discarded(format!("expected {expected}, entity is {current}")))
}

/// The payload if the job carries one, else the field-less event named by the key
fn decode<A: DeserializeOwned>(
    job: &Job,
    event: &str,
    from_unit_name: fn(&str) -> Option<A>,
) -> Result<A, JobError> {
    match &job.payload {
        Some(payload) => serde_json::from_value(payload.clone())
            .map_err(|e| JobError::Fatal(format!("undecodable payload for {event}: {e}"))),
        None => from_unit_name(event)
            .ok_or_else(|| JobError::Fatal(format!("unknown job event {event}"))),
    }
}

fn settle<T>(result: Result<Outcome<T>, EngineError>) -> Result<JobOutcome, JobError> {
    match result {
        Ok(Outcome::Applied(_)) => Ok(JobOutcome::Applied),
        Ok(Outcome::Unchanged(_)) => Ok(JobOutcome::Discarded("nothing to do".to_string())),
        Ok(Outcome::Rejected(rejection)) => Ok(JobOutcome::Discarded(rejection.to_string())),
        Err(error) => settle_error(error),
    }
}

fn settle_error(error: EngineError) -> Result<JobOutcome, JobError> {
    match error {
        EngineError::NotFound { .. } => Ok(JobOutcome::Discarded(error.to_string())),
        error if error.is_retryable() => Err(JobError::Retryable(error.to_string())),
        error => Err(JobError::Fatal(error.to_string())),
    }
}

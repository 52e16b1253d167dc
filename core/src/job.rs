//! Contracts of the job layer that drives time-based transitions.
//!
//! A job is a hint: "around this time, `event` might be due for this entity".
//! It never carries authority. Handlers reload the snapshot and let the
//! machine's guards decide, which makes late and duplicate deliveries harmless.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{ShowId, TicketId};

/// Ticket job: ask the gateway for a refund payout
pub const ISSUE_REFUND: &str = "ISSUE_REFUND";
/// Ticket job: poll a refund payout for completion
pub const POLL_PAYOUT: &str = "POLL_PAYOUT";

/// Aggregate kind a job targets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A show
    Show,
    /// A ticket
    Ticket,
}

impl EntityKind {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Show => "show",
            Self::Ticket => "ticket",
        }
    }

    /// Parse from the storage representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "show" => Some(Self::Show),
            "ticket" => Some(Self::Ticket),
            _ => None,
        }
    }
}

/// Identity of a pending job: at most one per (entity, event)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    /// Target aggregate kind
    pub entity: EntityKind,
    /// Target aggregate id
    pub entity_id: Uuid,
    /// Event (or job-only command) name
    pub event: String,
}

impl JobKey {
    /// Key for a show job
    #[must_use]
    pub fn show(show_id: ShowId, event: &str) -> Self {
        Self {
            entity: EntityKind::Show,
            entity_id: *show_id.as_uuid(),
            event: event.to_string(),
        }
    }

    /// Key for a ticket job
    #[must_use]
    pub fn ticket(ticket_id: TicketId, event: &str) -> Self {
        Self {
            entity: EntityKind::Ticket,
            entity_id: *ticket_id.as_uuid(),
            event: event.to_string(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.entity.as_str(), self.entity_id, self.event)
    }
}

/// Request to deliver `key` after `delay`
#[derive(Clone, Debug, PartialEq)]
pub struct JobRequest {
    /// What to deliver
    pub key: JobKey,
    /// How long to wait; zero means as soon as possible
    pub delay: Duration,
    /// State tag the entity is expected to still be in
    pub expected_state: Option<String>,
    /// Serialized action for messages that carry data
    pub payload: Option<serde_json::Value>,
}

impl JobRequest {
    /// Timer with no payload
    #[must_use]
    pub const fn after(key: JobKey, delay: Duration) -> Self {
        Self {
            key,
            delay,
            expected_state: None,
            payload: None,
        }
    }

    /// Immediate delivery
    #[must_use]
    pub const fn immediate(key: JobKey) -> Self {
        Self::after(key, Duration::ZERO)
    }

    /// Only act if the entity is still in `state`
    #[must_use]
    pub fn expecting(mut self, state: &str) -> Self {
        self.expected_state = Some(state.to_string());
        self
    }

    /// Carry a payload hint
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// A job handed to a handler
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    /// Delivery id
    pub id: Uuid,
    /// What to deliver
    pub key: JobKey,
    /// State tag hint
    pub expected_state: Option<String>,
    /// Payload hint
    pub payload: Option<serde_json::Value>,
    /// When the job became due
    pub due_at: DateTime<Utc>,
    /// Previous failed deliveries
    pub attempts: u32,
}

/// How a handler disposed of a job
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job moved an aggregate or the gateway
    Applied,
    /// Nothing to do: the entity moved on or the job is stale
    Discarded(String),
}

/// Job handling failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Infrastructure problem; deliver again later
    #[error("retryable: {0}")]
    Retryable(String),

    /// The job can never succeed (unknown event, undecodable payload)
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Scheduler errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Backing queue unavailable
    #[error("Scheduler unavailable: {0}")]
    Unavailable(String),

    /// Payload could not be encoded
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Durable, at-least-once job scheduler
pub trait JobScheduler: Send + Sync {
    /// Schedule `request`, replacing any pending job with the same key.
    ///
    /// # Errors
    ///
    /// Returns an error when the job could not be stored.
    fn schedule(&self, request: JobRequest) -> BoxFuture<'_, Result<(), SchedulerError>>;

    /// Cancel the pending job with `key`; returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue could not be reached.
    fn cancel(&self, key: JobKey) -> BoxFuture<'_, Result<bool, SchedulerError>>;
}

/// Callback a scheduler delivers due jobs to
pub trait JobHandler: Send + Sync {
    /// Handle one delivery.
    ///
    /// # Errors
    ///
    /// [`JobError::Retryable`] asks for redelivery; [`JobError::Fatal`]
    /// dead-letters the job.
    fn handle(&self, job: Job) -> BoxFuture<'_, Result<JobOutcome, JobError>>;
}

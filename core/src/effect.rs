//! Side effect descriptions returned by the machines.
//!
//! Effects are values, not execution. The orchestration facade runs them in
//! order, and only after the snapshot that produced them has been persisted.

use crate::event_log::ShowLogEntry;
use crate::job::{JobKey, JobRequest};
use crate::show::ShowAction;
use crate::ticket::TicketAction;
use crate::types::{ShowId, TicketId};
use smallvec::SmallVec;

/// Effects of one transition; almost always fewer than four
pub type Effects = SmallVec<[Effect; 4]>;

/// Effect type - describes a side effect to be executed
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// No-op effect
    None,

    /// Append a row to the show activity log
    Log(ShowLogEntry),

    /// Schedule a timer or deferred message
    Schedule(JobRequest),

    /// Cancel a pending job made moot by this transition
    CancelJob(JobKey),

    /// Send an event to another aggregate through the facade
    Dispatch(Dispatch),
}

/// Message from one machine to another aggregate
#[derive(Clone, Debug, PartialEq)]
pub enum Dispatch {
    /// Deliver to a show
    Show {
        /// Recipient
        show_id: ShowId,
        /// Event
        action: ShowAction,
    },
    /// Deliver to a ticket
    Ticket {
        /// Recipient
        ticket_id: TicketId,
        /// Event
        action: TicketAction,
    },
}

impl Dispatch {
    /// Event name carried by the message
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Show { action, .. } => action.name(),
            Self::Ticket { action, .. } => action.name(),
        }
    }
}

impl Effect {
    /// Dispatch to a show
    #[must_use]
    pub const fn to_show(show_id: ShowId, action: ShowAction) -> Self {
        Self::Dispatch(Dispatch::Show { show_id, action })
    }

    /// Dispatch to a ticket
    #[must_use]
    pub const fn to_ticket(ticket_id: TicketId, action: TicketAction) -> Self {
        Self::Dispatch(Dispatch::Ticket { ticket_id, action })
    }

    /// True when this is a schedule request for `event`
    #[must_use]
    pub fn schedules(&self, event: &str) -> bool {
        matches!(self, Self::Schedule(request) if request.key.event == event)
    }

    /// True when this cancels a job for `event`
    #[must_use]
    pub fn cancels(&self, event: &str) -> bool {
        matches!(self, Self::CancelJob(key) if key.event == event)
    }
}

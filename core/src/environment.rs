//! Injected dependencies the machines read while reducing.
//!
//! Machines never reach for wall-clock time or configuration on their own;
//! both arrive through [`MachineEnvironment`] so every transition is
//! deterministic under test.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```ignore
/// // Test - fixed time for deterministic tests
/// struct FixedClock { time: DateTime<Utc> }
/// impl Clock for FixedClock {
///     fn now(&self) -> DateTime<Utc> {
///         self.time
///     }
/// }
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Delays of the four timer job categories
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerSettings {
    /// How long an unpaid reservation holds its seat
    pub reservation_timeout: Duration,
    /// How long a stopped show waits before it is forced into `ended`
    pub grace_period: Duration,
    /// How long an ended show stays open to disputes before finalizing
    pub escrow_period: Duration,
    /// How long to wait before polling a refund payout
    pub payout_window: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            reservation_timeout: Duration::from_secs(15 * 60),
            grace_period: Duration::from_secs(2 * 60),
            escrow_period: Duration::from_secs(48 * 60 * 60),
            payout_window: Duration::from_secs(5 * 60),
        }
    }
}

/// Environment shared by the show and ticket machines
#[derive(Clone)]
pub struct MachineEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
    /// Timer delays used when scheduling jobs
    pub timers: TimerSettings,
}

impl MachineEnvironment {
    /// Creates an environment from a clock and timer settings
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, timers: TimerSettings) -> Self {
        Self { clock, timers }
    }

    /// Current time according to the injected clock
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl Default for MachineEnvironment {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), TimerSettings::default())
    }
}

impl std::fmt::Debug for MachineEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineEnvironment")
            .field("timers", &self.timers)
            .finish_non_exhaustive()
    }
}

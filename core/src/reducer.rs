//! The Reducer trait and the transition-table trait both machines implement.

use crate::effect::Effects;
use crate::error::Rejection;

/// The Reducer trait - core abstraction for lifecycle logic
///
/// Reducers are pure: `(State, Action, Environment) → (State, Effects)`.
/// A reducer validates first and mutates second, so an `Err` leaves `state`
/// exactly as it was handed in.
///
/// # Type Parameters
///
/// - `State`: The snapshot this reducer operates on
/// - `Action`: The events this reducer accepts
/// - `Environment`: The injected dependencies this reducer needs
pub trait Reducer {
    /// The state type this reducer operates on
    type State;

    /// The action type this reducer processes
    type Action;

    /// The environment type with injected dependencies
    type Environment;

    /// Reduce an action into state changes and effects
    ///
    /// This is a pure function that:
    /// 1. Evaluates the transition table and guards
    /// 2. Updates state in place
    /// 3. Returns effect descriptions to be executed
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] when the event is not acceptable in the current
    /// state. The state is left untouched in that case.
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Result<Effects, Rejection>;
}

/// State-level view of a machine's transition table
pub trait Lifecycle {
    /// Tag of the current state, e.g. `ended.inEscrow`
    fn state_tag(&self) -> &'static str;

    /// Whether `event` has a transition out of the current state whose
    /// payload-independent guard holds. Unknown names are never accepted.
    fn can_transition(&self, event: &str) -> bool;
}

//! # Ferry Core
//!
//! Domain types, error taxonomy and environment traits for the ferry booking
//! engine.
//!
//! This crate holds everything the engine's services share but that carries no
//! behaviour of its own:
//!
//! - **Types**: identifiers, [`Money`](types::Money), [`Rate`](types::Rate),
//!   segment keys and channels
//! - **Aggregates**: [`Booking`](booking::Booking), [`Ticket`](ticket::Ticket),
//!   ledger rows, commission rules, payment records
//! - **Environment**: injected dependencies (clock, payment gateway, receipt
//!   extraction, attachment storage, ledger store)
//! - **Reducer**: the pure state-transition trait the booking and payment state
//!   machines implement
//!
//! ## Architecture Principles
//!
//! - Functional core, imperative shell: reducers decide, services execute
//! - Explicit effects (no hidden I/O inside a transition)
//! - Dependency injection via environment traits
//! - Integer money, never floating point

pub mod booking;
pub mod commission;
pub mod environment;
pub mod error;
pub mod ledger;
pub mod payment;
pub mod ticket;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{EngineError, EngineResult};
pub use smallvec::{SmallVec, smallvec};

/// Reducer module - the core trait for state machines
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
///
/// They contain the transition rules of an aggregate and are deterministic and
/// testable. A reducer never performs I/O: it returns effect descriptions and
/// the owning service executes them.
pub mod reducer {
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for state transitions
    ///
    /// # Type Parameters
    ///
    /// - `State`: The aggregate this reducer operates on
    /// - `Action`: Commands and outcomes fed into the reducer
    /// - `Environment`: The injected dependencies this reducer needs
    /// - `Effect`: Descriptions of work the caller must carry out
    /// - `Error`: Why an action was refused
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for BookingReducer {
    ///     type State = Booking;
    ///     type Action = BookingAction;
    ///     type Environment = BookingEnvironment;
    ///     type Effect = BookingEffect;
    ///     type Error = TransitionError;
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut Booking,
    ///         action: BookingAction,
    ///         env: &BookingEnvironment,
    ///     ) -> Result<SmallVec<[BookingEffect; 4]>, TransitionError> {
    ///         match action {
    ///             BookingAction::Cancel { reason } => { /* ... */ }
    ///             _ => Ok(SmallVec::new()),
    ///         }
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// The effect descriptions this reducer emits
        type Effect;

        /// The rejection type for refused actions
        type Error;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action against the current state
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        ///
        /// # Errors
        ///
        /// Returns `Self::Error` when the action is not valid for the current
        /// state. Implementations must leave `state` untouched in that case.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Result<SmallVec<[Self::Effect; 4]>, Self::Error>;
    }
}

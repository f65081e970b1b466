//! # JSONP Core
//!
//! Core traits and types for composable JSONP requests.
//!
//! A JSONP request loads an executable transport element (a script) whose
//! execution calls a globally reachable function with the response payload.
//! This crate holds the pure parts of that machinery; the runtime crate drives
//! them against a concrete environment.
//!
//! ## Core Concepts
//!
//! - **Target**: Final request URL built from a descriptor ([`target`])
//! - **Outcome**: Terminal result of a request ([`outcome`])
//! - **Transport element**: The injected script and its completion signals ([`transport`])
//! - **Reducer**: Pure function `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: Side effect descriptions (not execution)
//! - **Environment**: Injected host dependencies via traits
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell
//! - Exactly-once terminal outcome per request
//! - Explicit Effects (no hidden I/O)
//! - Dependency Injection via Environment
//!
//! ## Example
//!
//! ```
//! use jsonp_core::target::{build_target, RequestData};
//!
//! let data = RequestData::pairs([("a", 1), ("b", 2)]);
//! let target = build_target("http://x", &data, Some("cb"), None);
//!
//! assert_eq!(target.resolve("foo"), "http://x?a=1&b=2&cb=foo");
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use serde_json::Value;
pub use smallvec::{SmallVec, smallvec};

/// Error types shared by host implementations
pub mod error;

/// Terminal outcomes, cached outcomes and resolutions
pub mod outcome;

/// Request target construction
pub mod target;

/// Transport elements and their completion signals
pub mod transport;

/// Reducer module - The core trait for lifecycle logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`
///
/// They contain all state machine logic and are deterministic and testable.
pub mod reducer {
    use super::SmallVec;
    use super::effect::Effect;

    /// The Reducer trait - core abstraction for state machine logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for LifecycleReducer {
    ///     type State = LifecycleState;
    ///     type Action = LifecycleAction;
    ///     type Environment = ();
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut LifecycleState,
    ///         action: LifecycleAction,
    ///         _env: &(),
    ///     ) -> SmallVec<[Effect<LifecycleAction>; 4]> {
    ///         match action {
    ///             LifecycleAction::Abort => smallvec![Effect::Cleanup, Effect::Cancelled],
    ///             _ => smallvec![Effect::None],
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

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action against the current state
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed, in order
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed by the runtime.
/// They are values (not execution) and are executed strictly in the order
/// the reducer returned them.
pub mod effect {
    use crate::outcome::{CachedOutcome, Outcome};
    use std::time::Duration;

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are descriptions of what should happen,
    /// returned from reducers and executed by the request controller.
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    #[derive(Debug, Clone, PartialEq)]
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Delayed action (for timeouts)
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },

        /// Create and insert the transport element for a live fetch
        Inject,

        /// Tear down every resource the request owns (handlers, elements, timer)
        Cleanup,

        /// Memoize a terminal outcome under the request's cache key
        StoreResult {
            /// Cache key (final target without nonce)
            key: String,
            /// Outcome to remember
            entry: CachedOutcome,
        },

        /// Fire the outcome hooks (success/error followed by complete)
        Notify(Outcome),

        /// Report a silent cancellation (no hooks)
        Cancelled,

        /// Report a submission refused before it started (no hooks)
        Vetoed,
    }

    impl<Action> Effect<Action> {
        /// Whether this effect tears resources down
        #[must_use]
        pub const fn is_cleanup(&self) -> bool {
            matches!(self, Effect::Cleanup)
        }
    }
}

/// Environment module - Dependency injection traits
///
/// Everything the lifecycle needs from its surroundings is abstracted here:
/// a clock for cache-busting nonces, a document able to host transport
/// elements, and a global namespace where callbacks live.
pub mod environment {
    use crate::error::HostError;
    use crate::transport::{ElementId, TransportElement};
    use chrono::{DateTime, Utc};
    use serde_json::Value;
    use std::sync::Arc;

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// struct SystemClock;
    /// impl Clock for SystemClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         Utc::now()
    ///     }
    /// }
    ///
    /// // Test - fixed time for deterministic nonces
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

    /// Global callback namespace (the `window` of a browser)
    ///
    /// Executed transport resources call a named function with exactly one
    /// payload argument. Hosts route that call through `invoke`.
    pub trait GlobalScope: Send + Sync {
        /// Call the function registered under `name` with `payload`
        ///
        /// Returns `false` when no function is registered under that name.
        fn invoke(&self, name: &str, payload: Value) -> bool;
    }

    /// Environment quirks a host reports about itself
    ///
    /// Used once, when the runtime selects its transport strategy.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HostCapabilities {
        /// Whether the host fires an error signal for failed script loads
        pub error_signal: bool,
        /// Whether handlers only run after the event-association trick
        pub requires_event_trigger: bool,
    }

    impl HostCapabilities {
        /// A host with reliable load and error signals
        #[must_use]
        pub const fn standard() -> Self {
            Self {
                error_signal: true,
                requires_event_trigger: false,
            }
        }

        /// Declare that the host never fires error signals
        #[must_use]
        pub const fn without_error_signal(mut self) -> Self {
            self.error_signal = false;
            self
        }

        /// Declare that the host needs the event-association trick
        #[must_use]
        pub const fn with_event_trigger(mut self) -> Self {
            self.requires_event_trigger = true;
            self
        }
    }

    impl Default for HostCapabilities {
        fn default() -> Self {
            Self::standard()
        }
    }

    /// Document able to host transport elements
    ///
    /// Hosts execute inserted elements at their leisure and report completion
    /// by calling [`TransportElement::fire`]. A host may fire synchronously
    /// from inside `insert`.
    pub trait ScriptHost: Send + Sync {
        /// Location of the current document, used as the default target
        fn location(&self) -> String;

        /// Quirks of this host
        fn capabilities(&self) -> HostCapabilities {
            HostCapabilities::standard()
        }

        /// Insert an element; `scope` is the namespace its script calls into
        fn insert(&self, element: TransportElement, scope: Arc<dyn GlobalScope>);

        /// Remove a previously inserted element (unknown ids are ignored)
        fn remove(&self, id: &ElementId);

        /// Run the handler bound through an element's event association
        ///
        /// # Errors
        ///
        /// Returns [`HostError`] when the host cannot trigger the element.
        fn trigger(&self, id: &ElementId) -> Result<(), HostError> {
            let _ = id;
            Err(HostError::Unsupported("event trigger"))
        }
    }
}

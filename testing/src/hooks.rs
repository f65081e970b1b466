//! Recording request hooks
//!
//! [`HookRecorder`] hands out hook closures that log every call, so a test
//! can check which hooks fired, with what, and in which order.

#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use jsonp_core::Value;
use jsonp_core::outcome::{CompletionStatus, FailureKind};
use std::sync::{Arc, Mutex, PoisonError};

/// One hook call
#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    /// `before_start` ran
    BeforeStart,
    /// `on_success` ran with this payload
    Success(Value, CompletionStatus),
    /// `on_error` ran
    Error(FailureKind),
    /// `on_complete` ran
    Complete(CompletionStatus),
}

/// Shared log of hook calls
///
/// The hook constructors are generic over the handle type the runtime passes
/// to hooks; name it with a turbofish.
///
/// # Example
///
/// ```
/// use jsonp_testing::{HookEvent, HookRecorder};
/// use jsonp_core::outcome::CompletionStatus;
///
/// let recorder = HookRecorder::new();
/// let complete = recorder.on_complete::<()>();
/// complete(&(), CompletionStatus::Error);
///
/// assert_eq!(recorder.events(), vec![HookEvent::Complete(CompletionStatus::Error)]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct HookRecorder {
    events: Arc<Mutex<Vec<HookEvent>>>,
}

impl HookRecorder {
    /// Empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event
    pub fn record(&self, event: HookEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Everything recorded, in call order
    #[must_use]
    pub fn events(&self) -> Vec<HookEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events().is_empty()
    }

    /// How many recorded events satisfy `predicate`
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&HookEvent) -> bool) -> usize {
        self.events().iter().filter(|event| predicate(event)).count()
    }

    /// `before_start` hook that records and returns `proceed`
    pub fn before_start<H: ?Sized + 'static>(
        &self,
        proceed: bool,
    ) -> impl Fn(&H) -> bool + Send + Sync + 'static + use<H> {
        let recorder = self.clone();
        move |_| {
            recorder.record(HookEvent::BeforeStart);
            proceed
        }
    }

    /// Recording `on_success` hook
    pub fn on_success<H: ?Sized + 'static>(
        &self,
    ) -> impl Fn(&Value, CompletionStatus, &H) + Send + Sync + 'static + use<H> {
        let recorder = self.clone();
        move |payload, status, _| recorder.record(HookEvent::Success(payload.clone(), status))
    }

    /// Recording `on_error` hook
    pub fn on_error<H: ?Sized + 'static>(
        &self,
    ) -> impl Fn(&H, FailureKind) + Send + Sync + 'static + use<H> {
        let recorder = self.clone();
        move |_, kind| recorder.record(HookEvent::Error(kind))
    }

    /// Recording `on_complete` hook
    pub fn on_complete<H: ?Sized + 'static>(
        &self,
    ) -> impl Fn(&H, CompletionStatus) + Send + Sync + 'static + use<H> {
        let recorder = self.clone();
        move |_, status| recorder.record(HookEvent::Complete(status))
    }

    /// Assert the outcome hooks fired exactly once, then completion once
    ///
    /// Ignores `before_start`. Returns the outcome event.
    ///
    /// # Panics
    ///
    /// Panics unless the outcome events are exactly one success or error
    /// followed by one matching completion.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_settled_once(&self) -> HookEvent {
        let events: Vec<HookEvent> = self
            .events()
            .into_iter()
            .filter(|event| *event != HookEvent::BeforeStart)
            .collect();

        match events.as_slice() {
            [outcome @ HookEvent::Success(_, CompletionStatus::Success), HookEvent::Complete(CompletionStatus::Success)] => {
                outcome.clone()
            },
            [outcome @ HookEvent::Error(kind), HookEvent::Complete(status)]
                if *status == CompletionStatus::from_failure(*kind) =>
            {
                outcome.clone()
            },
            other => panic!("Expected one outcome then one completion, got {other:?}"),
        }
    }
}

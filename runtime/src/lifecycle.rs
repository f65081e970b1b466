//! Request lifecycle: the per-request state machine and its executor.
//!
//! [`LifecycleReducer`] decides, purely, what a request does next. The
//! `Controller` owns the request's state and resources and executes the
//! reducer's effects in order. The state lock is only held while reducing,
//! never while effects run, so hooks, host calls and signals fired
//! synchronously from inside the host can all re-enter the controller.
//!
//! Every terminal action bumps the `done` counter and only the bump from zero
//! is honored. That single rule gives the exactly-once contract: duplicate
//! completions, late errors, timeouts racing a success and aborts after the
//! fact are all no-ops.

use crate::cache::ResultCache;
use crate::descriptor::RequestDescriptor;
use crate::injector::{ElementSpec, Injection, TransportInjector};
use crate::metrics::RequestMetrics;
use jsonp_core::effect::Effect;
use jsonp_core::outcome::{CachedOutcome, FailureKind, Outcome, Resolution};
use jsonp_core::reducer::Reducer;
use jsonp_core::transport::ElementId;
use jsonp_core::{SmallVec, Value, smallvec};
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Where a request is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Created, `before_start` may still be running
    #[default]
    Idle,
    /// Transport element is live
    Pending,
    /// Payload delivered
    Succeeded,
    /// Failed or timed out
    Failed(FailureKind),
    /// Cancelled by the caller
    Aborted,
    /// Refused by `before_start`
    Vetoed,
}

impl Phase {
    /// Whether the request has settled
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Idle | Self::Pending)
    }
}

/// State of one request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LifecycleState {
    /// Current phase
    pub phase: Phase,
    /// Terminal actions seen so far; only the first one counts
    pub done: u32,
    /// Result cache key when persistent caching is on
    pub cache_key: Option<String>,
}

impl LifecycleState {
    /// Fresh state; `cache_key` enables storing outcomes
    #[must_use]
    pub const fn new(cache_key: Option<String>) -> Self {
        Self {
            phase: Phase::Idle,
            done: 0,
            cache_key,
        }
    }

    /// Whether a terminal action has been honored
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.done > 0
    }

    /// Count a terminal action; `true` only for the first one
    fn settle(&mut self) -> bool {
        let first = self.done == 0;
        self.done = self.done.saturating_add(1);
        first
    }
}

/// Inputs to the lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleAction {
    /// Begin the request, replaying `cached` instead of fetching when present
    Start {
        /// Cache entry found for this request
        cached: Option<CachedOutcome>,
        /// Effective deadline
        timeout: Option<Duration>,
    },
    /// The callback delivered a payload
    Delivered(Value),
    /// The transport failed or the deadline elapsed
    Failed(FailureKind),
    /// The caller cancelled
    Abort,
    /// `before_start` refused the request
    Veto,
}

/// Pure lifecycle transitions
#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleReducer;

impl LifecycleReducer {
    fn terminate(
        state: &mut LifecycleState,
        outcome: Outcome,
        replayed: bool,
    ) -> SmallVec<[Effect<LifecycleAction>; 4]> {
        if !state.settle() {
            return smallvec![Effect::None];
        }

        state.phase = match &outcome {
            Outcome::Success(_) => Phase::Succeeded,
            Outcome::Failure(kind) => Phase::Failed(*kind),
        };

        let mut effects: SmallVec<[Effect<LifecycleAction>; 4]> = smallvec![Effect::Cleanup];
        if let Some(key) = state.cache_key.as_ref().filter(|_| !replayed) {
            if let Some(entry) = CachedOutcome::from_outcome(&outcome) {
                effects.push(Effect::StoreResult {
                    key: key.clone(),
                    entry,
                });
            }
        }
        effects.push(Effect::Notify(outcome));
        effects
    }
}

impl Reducer for LifecycleReducer {
    type State = LifecycleState;
    type Action = LifecycleAction;
    type Environment = ();

    fn reduce(
        &self,
        state: &mut LifecycleState,
        action: LifecycleAction,
        _env: &(),
    ) -> SmallVec<[Effect<LifecycleAction>; 4]> {
        match action {
            LifecycleAction::Start { cached, timeout } => {
                if state.phase != Phase::Idle || state.is_settled() {
                    return smallvec![Effect::None];
                }
                state.phase = Phase::Pending;

                match cached {
                    Some(entry) => Self::terminate(state, entry.into_outcome(), true),
                    None => {
                        let mut effects: SmallVec<[Effect<LifecycleAction>; 4]> =
                            smallvec![Effect::Inject];
                        if let Some(duration) = timeout {
                            effects.push(Effect::Delay {
                                duration,
                                action: Box::new(LifecycleAction::Failed(FailureKind::Timeout)),
                            });
                        }
                        effects
                    },
                }
            },
            LifecycleAction::Delivered(payload) => {
                Self::terminate(state, Outcome::Success(payload), false)
            },
            LifecycleAction::Failed(kind) => {
                Self::terminate(state, Outcome::Failure(kind), false)
            },
            LifecycleAction::Abort => {
                if !state.settle() {
                    return smallvec![Effect::None];
                }
                state.phase = Phase::Aborted;
                smallvec![Effect::Cleanup, Effect::Cancelled]
            },
            LifecycleAction::Veto => {
                if !state.settle() {
                    return smallvec![Effect::None];
                }
                state.phase = Phase::Vetoed;
                smallvec![Effect::Cleanup, Effect::Vetoed]
            },
        }
    }
}

/// How a submission goes on the wire
#[derive(Debug, Clone)]
pub(crate) struct RequestPlan {
    pub id: u64,
    pub url: String,
    pub callback: String,
    pub element_id: ElementId,
    pub cache_key: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Default)]
struct Resources {
    injection: Option<Injection>,
    timer: Option<JoinHandle<()>>,
    released: bool,
}

/// Requests that have not been cleaned up yet
///
/// Holds them strongly: a request keeps running after the caller drops its
/// handle, until cleanup untracks it.
#[derive(Default)]
pub(crate) struct LiveRequests {
    entries: Mutex<HashMap<u64, Arc<Controller>>>,
}

impl LiveRequests {
    pub fn track(&self, controller: Arc<Controller>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(controller.plan.id, controller);
    }

    fn untrack(&self, id: u64) {
        let removed = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        drop(removed);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn drain(&self) -> Vec<Arc<Controller>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, controller)| controller)
            .collect()
    }
}

/// Executes lifecycle effects for one request
pub(crate) struct Controller {
    descriptor: RequestDescriptor,
    plan: RequestPlan,
    reducer: LifecycleReducer,
    state: Mutex<LifecycleState>,
    resources: Mutex<Resources>,
    resolution: watch::Sender<Option<Resolution>>,
    injector: Arc<TransportInjector>,
    cache: Arc<ResultCache>,
    live: Arc<LiveRequests>,
    runtime: Option<Handle>,
}

impl Controller {
    pub fn new(
        descriptor: RequestDescriptor,
        plan: RequestPlan,
        injector: Arc<TransportInjector>,
        cache: Arc<ResultCache>,
        live: Arc<LiveRequests>,
        runtime: Option<Handle>,
    ) -> Arc<Self> {
        let (resolution, _) = watch::channel(None);
        Arc::new(Self {
            descriptor,
            state: Mutex::new(LifecycleState::new(plan.cache_key.clone())),
            plan,
            reducer: LifecycleReducer,
            resources: Mutex::new(Resources::default()),
            resolution,
            injector,
            cache,
            live,
            runtime,
        })
    }

    /// Reduce `action`, then execute the resulting effects in order
    pub fn dispatch(self: &Arc<Self>, action: LifecycleAction) {
        tracing::trace!(request = self.plan.id, ?action, "Dispatching lifecycle action");
        let effects = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            self.reducer.reduce(&mut state, action, &())
        };

        for effect in effects {
            self.execute(effect);
        }
    }

    fn execute(self: &Arc<Self>, effect: Effect<LifecycleAction>) {
        match effect {
            Effect::None => {},
            Effect::Delay { duration, action } => self.schedule(duration, *action),
            Effect::Inject => self.inject(),
            Effect::Cleanup => self.cleanup(),
            Effect::StoreResult { key, entry } => self.cache.store(key, entry),
            Effect::Notify(outcome) => self.notify(outcome),
            Effect::Cancelled => {
                tracing::debug!(request = self.plan.id, "Request aborted");
                RequestMetrics::record_completed("aborted");
                self.resolution.send_replace(Some(Resolution::Aborted));
            },
            Effect::Vetoed => {
                tracing::debug!(request = self.plan.id, "Request vetoed by before_start");
                RequestMetrics::record_vetoed();
                self.resolution.send_replace(Some(Resolution::Vetoed));
            },
        }
    }

    fn phase(&self) -> Phase {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .phase
    }

    fn inject(self: &Arc<Self>) {
        let controller = Arc::downgrade(self);
        let spec = ElementSpec {
            id: self.plan.element_id.clone(),
            src: self.plan.url.clone(),
            callback: self.plan.callback.clone(),
            charset: self.descriptor.charset.clone(),
        };

        let injection = self.injector.prepare(spec, move |payload| {
            if let Some(controller) = controller.upgrade() {
                controller.dispatch(match payload {
                    Some(payload) => LifecycleAction::Delivered(payload),
                    None => LifecycleAction::Failed(FailureKind::Error),
                });
            }
        });
        let elements = injection.elements().to_vec();

        let rejected = {
            let mut resources = self.resources.lock().unwrap_or_else(PoisonError::into_inner);
            if resources.released {
                Some(injection)
            } else {
                resources.injection = Some(injection);
                None
            }
        };
        if let Some(mut injection) = rejected {
            injection.teardown();
            return;
        }

        RequestMetrics::record_injected();
        self.injector.insert(&elements);
    }

    /// Arm the deadline timer
    ///
    /// Runs on the caller's tokio runtime, else on the one the client was
    /// built in. With neither, a plain thread sleeps out the deadline; it
    /// cannot be cancelled, but a late dispatch hits the settled guard.
    fn schedule(self: &Arc<Self>, duration: Duration, action: LifecycleAction) {
        let controller = Arc::downgrade(self);
        let runtime = Handle::try_current().ok().or_else(|| self.runtime.clone());

        let Some(runtime) = runtime else {
            tracing::debug!(
                request = self.plan.id,
                ?duration,
                "No tokio runtime available, timing out on a thread"
            );
            let spawned = std::thread::Builder::new()
                .name("jsonp-timeout".to_string())
                .spawn(move || {
                    std::thread::sleep(duration);
                    if let Some(controller) = controller.upgrade() {
                        tracing::debug!(request = controller.plan.id, "Request deadline elapsed");
                        controller.dispatch(action);
                    }
                });
            if let Err(error) = spawned {
                tracing::error!(request = self.plan.id, %error, "Could not start timeout thread");
            }
            return;
        };

        let timer = runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(controller) = controller.upgrade() {
                tracing::debug!(request = controller.plan.id, "Request deadline elapsed");
                controller.dispatch(action);
            }
        });

        let mut resources = self.resources.lock().unwrap_or_else(PoisonError::into_inner);
        if resources.released {
            timer.abort();
        } else {
            resources.timer = Some(timer);
        }
    }

    fn cleanup(&self) {
        let (injection, timer) = {
            let mut resources = self.resources.lock().unwrap_or_else(PoisonError::into_inner);
            resources.released = true;
            (resources.injection.take(), resources.timer.take())
        };

        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(mut injection) = injection {
            injection.teardown();
            RequestMetrics::record_released();
        }
        self.live.untrack(self.plan.id);
    }

    fn notify(self: &Arc<Self>, outcome: Outcome) {
        let handle = RequestHandle {
            controller: Arc::clone(self),
        };
        let status = outcome.status();
        RequestMetrics::record_completed(status.as_str());
        tracing::debug!(request = self.plan.id, %status, "Request settled");

        let resolution = match outcome {
            Outcome::Success(payload) => {
                let payload = match &self.descriptor.result_filter {
                    Some(filter) => filter(payload),
                    None => payload,
                };
                if let Some(hook) = &self.descriptor.on_success {
                    hook(&payload, status, &handle);
                }
                Resolution::Succeeded(payload)
            },
            Outcome::Failure(kind) => {
                if let Some(hook) = &self.descriptor.on_error {
                    hook(&handle, kind);
                }
                Resolution::Failed(kind)
            },
        };

        if let Some(hook) = &self.descriptor.on_complete {
            hook(&handle, status);
        }
        self.resolution.send_replace(Some(resolution));
    }
}

/// Caller's view of a submitted request
///
/// Dereferences to the submitted [`RequestDescriptor`]; hooks receive the
/// same handle.
#[derive(Clone)]
pub struct RequestHandle {
    controller: Arc<Controller>,
}

impl RequestHandle {
    pub(crate) const fn new(controller: Arc<Controller>) -> Self {
        Self { controller }
    }

    pub(crate) fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    /// Cancel the request
    ///
    /// While pending this tears everything down without firing hooks. After
    /// the request settled it does nothing. Calling it again is harmless.
    pub fn abort(&self) {
        self.controller.dispatch(LifecycleAction::Abort);
    }

    /// URL the transport element loads
    #[must_use]
    pub fn url(&self) -> &str {
        &self.controller.plan.url
    }

    /// Callback name the remote script is asked to call
    #[must_use]
    pub fn callback_name(&self) -> &str {
        &self.controller.plan.callback
    }

    /// Id of the transport element (if one is ever created)
    #[must_use]
    pub fn element_id(&self) -> &ElementId {
        &self.controller.plan.element_id
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.controller.phase()
    }

    /// Resolution, once settled
    #[must_use]
    pub fn resolution(&self) -> Option<Resolution> {
        self.controller.resolution.borrow().clone()
    }

    /// Wait until the request settles
    pub async fn wait(&self) -> Resolution {
        let mut receiver = self.controller.resolution.subscribe();
        let resolution = receiver
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|seen| (*seen).clone());
        resolution.unwrap_or(Resolution::Aborted)
    }
}

impl Deref for RequestHandle {
    type Target = RequestDescriptor;

    fn deref(&self) -> &RequestDescriptor {
        &self.controller.descriptor
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.controller.plan.id)
            .field("url", &self.controller.plan.url)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonp_testing::ReducerTest;
    use jsonp_testing::assertions::{
        assert_effects_count, assert_has_cleanup_effect, assert_no_effects,
    };
    use serde_json::json;

    fn pending(cache_key: Option<&str>) -> LifecycleState {
        LifecycleState {
            phase: Phase::Pending,
            done: 0,
            cache_key: cache_key.map(str::to_string),
        }
    }

    #[test]
    fn start_injects_then_arms_timer() {
        ReducerTest::new(LifecycleReducer)
            .with_env(())
            .given_state(LifecycleState::default())
            .when_action(LifecycleAction::Start {
                cached: None,
                timeout: Some(Duration::from_millis(10)),
            })
            .then_state(|state| assert_eq!(state.phase, Phase::Pending))
            .then_effects(|effects| {
                assert_eq!(effects[0], Effect::Inject);
                assert_eq!(
                    effects[1],
                    Effect::Delay {
                        duration: Duration::from_millis(10),
                        action: Box::new(LifecycleAction::Failed(FailureKind::Timeout)),
                    }
                );
            })
            .run();
    }

    #[test]
    fn start_without_timeout_only_injects() {
        ReducerTest::new(LifecycleReducer)
            .with_env(())
            .given_state(LifecycleState::default())
            .when_action(LifecycleAction::Start {
                cached: None,
                timeout: None,
            })
            .then_effects(|effects| assert_eq!(effects, [Effect::Inject]))
            .run();
    }

    #[test]
    fn cache_hit_replays_without_injecting_or_storing() {
        ReducerTest::new(LifecycleReducer)
            .with_env(())
            .given_state(LifecycleState::new(Some("http://x?cb=_jsonp".into())))
            .when_action(LifecycleAction::Start {
                cached: Some(CachedOutcome::Success(json!([1]))),
                timeout: Some(Duration::from_secs(1)),
            })
            .then_state(|state| {
                assert_eq!(state.phase, Phase::Succeeded);
                assert_eq!(state.cache_key.as_deref(), Some("http://x?cb=_jsonp"));
            })
            .then_effects(|effects| {
                assert_eq!(
                    effects,
                    [Effect::Cleanup, Effect::Notify(Outcome::Success(json!([1])))]
                );
            })
            .run();
    }

    #[test]
    fn delivery_stores_when_persistent() {
        ReducerTest::new(LifecycleReducer)
            .with_env(())
            .given_state(pending(Some("key")))
            .when_action(LifecycleAction::Delivered(json!({"a": 1})))
            .then_state(|state| {
                assert_eq!(state.phase, Phase::Succeeded);
                assert_eq!(state.done, 1);
            })
            .then_effects(|effects| {
                assert_has_cleanup_effect(effects);
                assert_eq!(
                    effects,
                    [
                        Effect::Cleanup,
                        Effect::StoreResult {
                            key: "key".into(),
                            entry: CachedOutcome::Success(json!({"a": 1})),
                        },
                        Effect::Notify(Outcome::Success(json!({"a": 1}))),
                    ]
                );
            })
            .run();
    }

    #[test]
    fn timeout_is_never_stored() {
        ReducerTest::new(LifecycleReducer)
            .with_env(())
            .given_state(pending(Some("key")))
            .when_action(LifecycleAction::Failed(FailureKind::Timeout))
            .then_state(|state| assert_eq!(state.phase, Phase::Failed(FailureKind::Timeout)))
            .then_effects(|effects| {
                assert_eq!(
                    effects,
                    [
                        Effect::Cleanup,
                        Effect::Notify(Outcome::Failure(FailureKind::Timeout)),
                    ]
                );
            })
            .run();
    }

    #[test]
    fn error_is_stored_when_persistent() {
        ReducerTest::new(LifecycleReducer)
            .with_env(())
            .given_state(pending(Some("key")))
            .when_action(LifecycleAction::Failed(FailureKind::Error))
            .then_effects(|effects| assert_effects_count(effects, 3))
            .run();
    }

    #[test]
    fn only_first_terminal_action_counts() {
        let settled = LifecycleState {
            phase: Phase::Succeeded,
            done: 1,
            cache_key: None,
        };

        for action in [
            LifecycleAction::Delivered(json!(2)),
            LifecycleAction::Failed(FailureKind::Error),
            LifecycleAction::Failed(FailureKind::Timeout),
            LifecycleAction::Abort,
            LifecycleAction::Veto,
        ] {
            ReducerTest::new(LifecycleReducer)
                .with_env(())
                .given_state(settled.clone())
                .when_action(action)
                .then_state(|state| {
                    assert_eq!(state.phase, Phase::Succeeded);
                    assert_eq!(state.done, 2);
                })
                .then_effects(|effects| assert_no_effects(effects))
                .run();
        }
    }

    #[test]
    fn abort_while_pending_cleans_up_silently() {
        ReducerTest::new(LifecycleReducer)
            .with_env(())
            .given_state(pending(None))
            .when_action(LifecycleAction::Abort)
            .then_state(|state| assert_eq!(state.phase, Phase::Aborted))
            .then_effects(|effects| assert_eq!(effects, [Effect::Cleanup, Effect::Cancelled]))
            .run();
    }

    #[test]
    fn start_after_abort_does_nothing() {
        let aborted = LifecycleState {
            phase: Phase::Aborted,
            done: 1,
            cache_key: None,
        };
        ReducerTest::new(LifecycleReducer)
            .with_env(())
            .given_state(aborted)
            .when_action(LifecycleAction::Start {
                cached: None,
                timeout: None,
            })
            .then_effects(|effects| assert_no_effects(effects))
            .run();
    }

    #[test]
    fn veto_reports_without_hooks() {
        ReducerTest::new(LifecycleReducer)
            .with_env(())
            .given_state(LifecycleState::default())
            .when_action(LifecycleAction::Veto)
            .then_state(|state| {
                assert_eq!(state.phase, Phase::Vetoed);
                assert!(state.phase.is_terminal());
            })
            .then_effects(|effects| assert_eq!(effects, [Effect::Cleanup, Effect::Vetoed]))
            .run();
    }
}

//! In-memory script host for lifecycle tests
//!
//! [`MockDocument`] records every element inserted into it and lets the test
//! decide what each script does: call back with a payload, fail, emit legacy
//! ready states, or nothing at all. Nothing happens on its own unless an
//! auto-responder is installed with [`MockDocument::respond_on_insert`], which
//! fires synchronously from inside `insert`.

#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use jsonp_core::Value;
use jsonp_core::environment::{GlobalScope, HostCapabilities, ScriptHost};
use jsonp_core::error::HostError;
use jsonp_core::transport::{
    ElementId, ElementSource, Signal, SyntheticStatement, TransportElement,
};
use std::sync::{Arc, Mutex, PoisonError};

/// Default location reported by [`MockDocument::new`]
pub const DEFAULT_LOCATION: &str = "http://localhost/page";

#[derive(Default)]
struct DocumentState {
    attached: Vec<(TransportElement, Arc<dyn GlobalScope>)>,
    inserted: Vec<TransportElement>,
    removed: Vec<ElementId>,
    triggered: Vec<ElementId>,
    auto_response: Option<(String, Value)>,
}

/// Scriptable [`ScriptHost`]
///
/// # Example
///
/// ```
/// use jsonp_testing::MockDocument;
/// use jsonp_core::environment::ScriptHost;
///
/// let document = MockDocument::new().with_location("http://example.test/");
/// assert_eq!(document.location(), "http://example.test/");
/// assert_eq!(document.inserted_count(), 0);
/// ```
pub struct MockDocument {
    location: String,
    capabilities: HostCapabilities,
    state: Mutex<DocumentState>,
}

impl MockDocument {
    /// Empty document at [`DEFAULT_LOCATION`] with standard capabilities
    #[must_use]
    pub fn new() -> Self {
        Self {
            location: DEFAULT_LOCATION.to_string(),
            capabilities: HostCapabilities::standard(),
            state: Mutex::new(DocumentState::default()),
        }
    }

    /// Report a different location
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Report different capabilities
    #[must_use]
    pub const fn with_capabilities(mut self, capabilities: HostCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Execute every future script immediately on insertion
    ///
    /// The script calls the function named by its `parameter` query value with
    /// `payload`, then `Load` fires, all before `insert` returns.
    pub fn respond_on_insert(&self, parameter: impl Into<String>, payload: Value) {
        self.lock().auto_response = Some((parameter.into(), payload));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DocumentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn find(&self, id: &ElementId) -> Option<(TransportElement, Arc<dyn GlobalScope>)> {
        self.lock()
            .attached
            .iter()
            .find(|(element, _)| element.id() == id)
            .map(|(element, scope)| (element.clone(), Arc::clone(scope)))
    }

    /// Every element ever inserted, in order
    #[must_use]
    pub fn inserted(&self) -> Vec<TransportElement> {
        self.lock().inserted.clone()
    }

    /// Number of elements ever inserted
    #[must_use]
    pub fn inserted_count(&self) -> usize {
        self.lock().inserted.len()
    }

    /// Most recently inserted element
    #[must_use]
    pub fn last_inserted(&self) -> Option<TransportElement> {
        self.lock().inserted.last().cloned()
    }

    /// Ids of elements currently attached, in insertion order
    #[must_use]
    pub fn attached(&self) -> Vec<ElementId> {
        self.lock()
            .attached
            .iter()
            .map(|(element, _)| element.id().clone())
            .collect()
    }

    /// Whether `id` is currently attached
    #[must_use]
    pub fn is_attached(&self, id: &ElementId) -> bool {
        self.find(id).is_some()
    }

    /// Ids removed so far, in order
    #[must_use]
    pub fn removed(&self) -> Vec<ElementId> {
        self.lock().removed.clone()
    }

    /// Ids passed to `trigger` so far
    #[must_use]
    pub fn triggers(&self) -> Vec<ElementId> {
        self.lock().triggered.clone()
    }

    /// Run script `id`: call `name` with `payload`, then fire `Load`
    ///
    /// Returns `false` if the element is not attached; removed scripts never run.
    pub fn respond_as(&self, id: &ElementId, name: &str, payload: Value) -> bool {
        let Some((element, scope)) = self.find(id) else {
            return false;
        };
        scope.invoke(name, payload);
        element.fire(Signal::Load);
        true
    }

    /// Run script `id`, calling the function named by its `parameter` query value
    pub fn respond(&self, id: &ElementId, parameter: &str, payload: Value) -> bool {
        let name = self
            .find(id)
            .and_then(|(element, _)| element.src().and_then(|src| query_param(src, parameter)));
        match name {
            Some(name) => self.respond_as(id, &name, payload),
            None => false,
        }
    }

    /// Call `name` in the scope of element `id` without signaling anything
    pub fn invoke(&self, id: &ElementId, name: &str, payload: Value) -> bool {
        self.find(id)
            .is_some_and(|(_, scope)| scope.invoke(name, payload))
    }

    /// Fire `signal` on element `id`; `false` if not attached or unhandled
    pub fn fire(&self, id: &ElementId, signal: Signal) -> bool {
        self.find(id).is_some_and(|(element, _)| element.fire(signal))
    }

    /// Fire `signal` on an element even after it was removed
    ///
    /// Models a host delivering a late signal to a stale element.
    pub fn fire_stale(&self, id: &ElementId, signal: Signal) -> bool {
        let element = self
            .lock()
            .inserted
            .iter()
            .find(|element| element.id() == id)
            .cloned();
        element.is_some_and(|element| element.fire(signal))
    }

    /// Execute every attached synthetic statement, in insertion order
    ///
    /// Returns how many statements ran.
    pub fn run_statements(&self) -> usize {
        let statements: Vec<SyntheticStatement> = self
            .lock()
            .attached
            .iter()
            .filter_map(|(element, _)| match element.source() {
                ElementSource::Statement(statement) => Some(statement.clone()),
                ElementSource::Script(_) => None,
            })
            .collect();

        for statement in &statements {
            match statement {
                SyntheticStatement::FireError { target } => {
                    self.fire(target, Signal::Error);
                },
            }
        }
        statements.len()
    }
}

impl Default for MockDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDocument")
            .field("location", &self.location)
            .field("capabilities", &self.capabilities)
            .field("attached", &self.attached())
            .finish_non_exhaustive()
    }
}

impl ScriptHost for MockDocument {
    fn location(&self) -> String {
        self.location.clone()
    }

    fn capabilities(&self) -> HostCapabilities {
        self.capabilities
    }

    fn insert(&self, element: TransportElement, scope: Arc<dyn GlobalScope>) {
        let auto_response = {
            let mut state = self.lock();
            state.inserted.push(element.clone());
            state.attached.push((element.clone(), Arc::clone(&scope)));
            state.auto_response.clone()
        };

        if let (Some((parameter, payload)), Some(src)) = (auto_response, element.src()) {
            if let Some(name) = query_param(src, &parameter) {
                scope.invoke(&name, payload);
            }
            element.fire(Signal::Load);
        }
    }

    fn remove(&self, id: &ElementId) {
        let mut state = self.lock();
        let before = state.attached.len();
        state.attached.retain(|(element, _)| element.id() != id);
        if state.attached.len() != before {
            state.removed.push(id.clone());
        }
    }

    fn trigger(&self, id: &ElementId) -> Result<(), HostError> {
        let mut state = self.lock();
        state.triggered.push(id.clone());
        if state.attached.iter().any(|(element, _)| element.id() == id) {
            Ok(())
        } else {
            Err(HostError::UnknownElement(id.to_string()))
        }
    }
}

/// Decoded value of query parameter `name` in `url`
///
/// # Example
///
/// ```
/// use jsonp_testing::mocks::query_param;
///
/// assert_eq!(query_param("http://x?a=1&cb=f%20g", "cb").as_deref(), Some("f g"));
/// assert_eq!(query_param("http://x?a=1", "cb"), None);
/// ```
#[must_use]
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| urlencoding::decode(key).is_ok_and(|key| key == name))
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .map(std::borrow::Cow::into_owned)
}

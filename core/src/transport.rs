//! Transport elements and their completion signals.
//!
//! A [`TransportElement`] is the script-like resource a host loads and
//! executes. Its single handler slot is shared by every clone, so the host can
//! keep its own copy while the runtime detaches the handler during cleanup;
//! once detached, late signals from the host go nowhere.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Identifier of an element inside its host document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(String);

impl ElementId {
    /// Create an element id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Legacy ready states reported through `ReadyStateChange`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyState {
    /// Element created, nothing loaded
    Uninitialized,
    /// Resource is downloading
    Loading,
    /// Resource downloaded
    Loaded,
    /// Resource partially executed
    Interactive,
    /// Resource executed
    Complete,
}

impl ReadyState {
    /// Parse a host-reported state name (case-insensitive)
    #[must_use]
    pub fn parse(state: &str) -> Option<Self> {
        match state.to_ascii_lowercase().as_str() {
            "uninitialized" => Some(Self::Uninitialized),
            "loading" => Some(Self::Loading),
            "loaded" => Some(Self::Loaded),
            "interactive" => Some(Self::Interactive),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }

    /// Whether this state means the resource is done executing
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Loaded | Self::Complete)
    }

    /// Lowercase state name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Interactive => "interactive",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion signals a host fires on an element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// The resource loaded (and executed)
    Load,
    /// The resource failed to load
    Error,
    /// Legacy state transition
    ReadyStateChange(ReadyState),
}

impl Signal {
    /// Whether the signal reports a finished element
    ///
    /// Intermediate ready states are not completion signals.
    #[must_use]
    pub const fn is_completion(self) -> bool {
        match self {
            Self::Load | Self::Error => true,
            Self::ReadyStateChange(state) => state.is_final(),
        }
    }
}

/// Statement executed by the host in place of a script source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntheticStatement {
    /// Fire `Signal::Error` on the target element
    ///
    /// Inserted after a non-async script on hosts that never signal errors;
    /// it runs after the script, so it only matters when the script did not
    /// complete the request first.
    FireError {
        /// Element to fire on
        target: ElementId,
    },
}

/// Legacy event association (`htmlFor` + `event`) placed on an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBinding {
    /// Element the event is bound to
    pub html_for: ElementId,
    /// Event name
    pub event: String,
}

/// What an element executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementSource {
    /// A remote script loaded from this URL
    Script(String),
    /// A statement executed in place
    Statement(SyntheticStatement),
}

/// Handler receiving an element's signals
pub type SignalHandler = Arc<dyn Fn(Signal) + Send + Sync>;

#[derive(Clone, Default)]
struct HandlerSlot(Arc<Mutex<Option<SignalHandler>>>);

impl HandlerSlot {
    fn set(&self, handler: Option<SignalHandler>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    fn get(&self) -> Option<SignalHandler> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// An injectable script-like element
#[derive(Clone)]
pub struct TransportElement {
    id: ElementId,
    source: ElementSource,
    charset: Option<String>,
    is_async: bool,
    event_binding: Option<EventBinding>,
    handler: HandlerSlot,
}

impl TransportElement {
    /// A script element loading `src`
    #[must_use]
    pub fn script(id: ElementId, src: impl Into<String>) -> Self {
        Self::with_source(id, ElementSource::Script(src.into()))
    }

    /// An element executing a synthetic statement
    #[must_use]
    pub fn statement(id: ElementId, statement: SyntheticStatement) -> Self {
        Self::with_source(id, ElementSource::Statement(statement))
    }

    fn with_source(id: ElementId, source: ElementSource) -> Self {
        Self {
            id,
            source,
            charset: None,
            is_async: false,
            event_binding: None,
            handler: HandlerSlot::default(),
        }
    }

    /// Element id
    #[must_use]
    pub const fn id(&self) -> &ElementId {
        &self.id
    }

    /// What the element executes
    #[must_use]
    pub const fn source(&self) -> &ElementSource {
        &self.source
    }

    /// Script URL, if this is a script element
    #[must_use]
    pub fn src(&self) -> Option<&str> {
        match &self.source {
            ElementSource::Script(src) => Some(src),
            ElementSource::Statement(_) => None,
        }
    }

    /// Charset the script should be decoded with
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    /// Set the script charset
    pub fn set_charset(&mut self, charset: Option<String>) {
        self.charset = charset;
    }

    /// Whether the host may execute this element out of insertion order
    #[must_use]
    pub const fn is_async(&self) -> bool {
        self.is_async
    }

    /// Mark the element async (or ordered)
    pub fn set_async(&mut self, is_async: bool) {
        self.is_async = is_async;
    }

    /// Event association, if any
    #[must_use]
    pub const fn event_binding(&self) -> Option<&EventBinding> {
        self.event_binding.as_ref()
    }

    /// Set the event association
    pub fn set_event_binding(&mut self, binding: Option<EventBinding>) {
        self.event_binding = binding;
    }

    /// Attach the handler for all signal types, replacing any previous one
    pub fn attach(&self, handler: SignalHandler) {
        self.handler.set(Some(handler));
    }

    /// Detach the handler; subsequent signals are dropped
    pub fn detach(&self) {
        self.handler.set(None);
    }

    /// Whether a handler is attached
    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.handler.get().is_some()
    }

    /// Deliver a signal to the attached handler
    ///
    /// Returns `false` when no handler is attached. The handler runs without
    /// any lock held, so it may detach itself.
    pub fn fire(&self, signal: Signal) -> bool {
        match self.handler.get() {
            Some(handler) => {
                handler(signal);
                true
            },
            None => false,
        }
    }
}

impl fmt::Debug for TransportElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportElement")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("charset", &self.charset)
            .field("is_async", &self.is_async)
            .field("event_binding", &self.event_binding)
            .field("attached", &self.has_handler())
            .finish()
    }
}

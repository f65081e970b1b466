//! Transport injector.
//!
//! Builds the transport element for a live fetch, wires its completion
//! handler to the callback registry, and inserts it into the host. Tearing
//! the element down again is the job of the [`Injection`] it returns.

use crate::registry::{CallbackRegistry, CompletionSlot};
use crate::strategy::TransportStrategy;
use jsonp_core::Value;
use jsonp_core::environment::{GlobalScope, ScriptHost};
use jsonp_core::transport::{ElementId, Signal, SignalHandler, TransportElement};
use std::fmt;
use std::sync::{Arc, Weak};

/// Element settings for one live fetch
#[derive(Debug, Clone)]
pub struct ElementSpec {
    /// Id of the main element
    pub id: ElementId,
    /// Resolved URL the element loads
    pub src: String,
    /// Callback name the remote script will call
    pub callback: String,
    /// Charset of the remote script
    pub charset: Option<String>,
}

/// Creates and inserts transport elements
pub struct TransportInjector {
    host: Arc<dyn ScriptHost>,
    registry: Arc<CallbackRegistry>,
    strategy: Arc<dyn TransportStrategy>,
}

impl fmt::Debug for TransportInjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportInjector")
            .field("strategy", &self.strategy.name())
            .field("registered", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl TransportInjector {
    /// Create an injector for `host` using `strategy`
    #[must_use]
    pub fn new(
        host: Arc<dyn ScriptHost>,
        registry: Arc<CallbackRegistry>,
        strategy: Arc<dyn TransportStrategy>,
    ) -> Self {
        Self {
            host,
            registry,
            strategy,
        }
    }

    /// The selected strategy
    #[must_use]
    pub fn strategy(&self) -> &Arc<dyn TransportStrategy> {
        &self.strategy
    }

    /// Build the elements for a fetch without inserting them
    ///
    /// Registers the callback slot and attaches one handler to the main
    /// element for every signal type. When a completion signal arrives the
    /// handler reads the slot and calls `on_complete` with the payload, or
    /// with `None` if the script never called back.
    pub fn prepare<F>(&self, spec: ElementSpec, on_complete: F) -> Injection
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        let slot = self.registry.register(&spec.callback);

        let mut element = TransportElement::script(spec.id.clone(), spec.src);
        element.set_charset(spec.charset);
        let trailing = self.strategy.prepare(&mut element);

        element.attach(completion_handler(
            Arc::downgrade(&self.host),
            Arc::clone(&self.strategy),
            spec.id,
            slot,
            on_complete,
        ));

        let mut elements = vec![element];
        elements.extend(trailing);

        Injection {
            callback: spec.callback,
            elements,
            host: Arc::clone(&self.host),
            registry: Arc::clone(&self.registry),
            torn_down: false,
        }
    }

    /// Insert prepared elements into the host, in order
    ///
    /// The host may fire signals synchronously from inside this call.
    pub fn insert(&self, elements: &[TransportElement]) {
        let scope: Arc<dyn GlobalScope> = Arc::clone(&self.registry) as Arc<dyn GlobalScope>;
        for element in elements {
            tracing::trace!(
                element = %element.id(),
                strategy = self.strategy.name(),
                "Inserting transport element"
            );
            self.host.insert(element.clone(), Arc::clone(&scope));
        }
    }
}

fn completion_handler<F>(
    host: Weak<dyn ScriptHost>,
    strategy: Arc<dyn TransportStrategy>,
    id: ElementId,
    slot: Arc<CompletionSlot>,
    on_complete: F,
) -> SignalHandler
where
    F: Fn(Option<Value>) + Send + Sync + 'static,
{
    Arc::new(move |signal: Signal| {
        if !signal.is_completion() {
            tracing::trace!(element = %id, ?signal, "Ignoring intermediate signal");
            return;
        }

        if let Some(host) = host.upgrade() {
            strategy.before_read(host.as_ref(), &id);
        }

        let payload = slot.take();
        tracing::debug!(
            element = %id,
            ?signal,
            delivered = payload.is_some(),
            "Transport element completed"
        );
        on_complete(payload);
    })
}

/// Elements of one live fetch, owned by its request until cleanup
pub struct Injection {
    callback: String,
    elements: Vec<TransportElement>,
    host: Arc<dyn ScriptHost>,
    registry: Arc<CallbackRegistry>,
    torn_down: bool,
}

impl Injection {
    /// The elements, main element first
    #[must_use]
    pub fn elements(&self) -> &[TransportElement] {
        &self.elements
    }

    /// Callback name registered for this fetch
    #[must_use]
    pub fn callback(&self) -> &str {
        &self.callback
    }

    /// Detach handlers, remove every element and release the callback
    ///
    /// Safe to call more than once.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        for element in &self.elements {
            element.detach();
            self.host.remove(element.id());
        }
        self.registry.release(&self.callback);
        tracing::trace!(callback = %self.callback, "Transport elements removed");
    }
}

impl fmt::Debug for Injection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injection")
            .field("callback", &self.callback)
            .field("elements", &self.elements)
            .field("torn_down", &self.torn_down)
            .finish_non_exhaustive()
    }
}

impl Drop for Injection {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{AsyncScript, EventBindingScript, TrailingErrorScript};
    use jsonp_core::transport::ReadyState;
    use jsonp_testing::MockDocument;
    use serde_json::json;
    use std::sync::{Mutex, PoisonError};

    type Completions = Arc<Mutex<Vec<Option<Value>>>>;

    fn setup(
        strategy: Arc<dyn TransportStrategy>,
    ) -> (Arc<MockDocument>, Arc<CallbackRegistry>, TransportInjector) {
        let document = Arc::new(MockDocument::new());
        let registry = Arc::new(CallbackRegistry::new());
        let injector = TransportInjector::new(document.clone(), Arc::clone(&registry), strategy);
        (document, registry, injector)
    }

    fn spec(id: &str) -> ElementSpec {
        ElementSpec {
            id: ElementId::new(id),
            src: format!("http://x?cb={id}"),
            callback: id.to_string(),
            charset: Some("utf-8".to_string()),
        }
    }

    fn recording() -> (Completions, impl Fn(Option<Value>) + Send + Sync + 'static) {
        let seen: Completions = Arc::default();
        let sink = Arc::clone(&seen);
        (seen, move |payload| {
            sink.lock().unwrap_or_else(PoisonError::into_inner).push(payload);
        })
    }

    #[test]
    fn completion_reads_the_slot() {
        let (document, _registry, injector) = setup(Arc::new(AsyncScript));
        let (seen, on_complete) = recording();
        let injection = injector.prepare(spec("_jsonp0"), on_complete);
        injector.insert(injection.elements());

        let inserted = document
            .last_inserted()
            .map(|element| (element.is_async(), element.charset().map(str::to_string)));
        assert_eq!(inserted, Some((true, Some("utf-8".to_string()))));

        assert!(document.respond(&ElementId::new("_jsonp0"), "cb", json!({"ok": true})));
        assert_eq!(
            *seen.lock().unwrap_or_else(PoisonError::into_inner),
            vec![Some(json!({"ok": true}))]
        );
    }

    #[test]
    fn intermediate_ready_states_are_ignored() {
        let (document, _registry, injector) = setup(Arc::new(AsyncScript));
        let (seen, on_complete) = recording();
        let injection = injector.prepare(spec("_jsonp1"), on_complete);
        injector.insert(injection.elements());
        let id = ElementId::new("_jsonp1");

        document.fire(&id, Signal::ReadyStateChange(ReadyState::Loading));
        document.fire(&id, Signal::ReadyStateChange(ReadyState::Interactive));
        assert!(seen.lock().unwrap_or_else(PoisonError::into_inner).is_empty());

        document.fire(&id, Signal::ReadyStateChange(ReadyState::Loaded));
        assert_eq!(*seen.lock().unwrap_or_else(PoisonError::into_inner), vec![None]);
    }

    #[test]
    fn trailing_statement_reports_error() {
        let (document, _registry, injector) = setup(Arc::new(TrailingErrorScript));
        let (seen, on_complete) = recording();
        let injection = injector.prepare(spec("_jsonp2"), on_complete);
        injector.insert(injection.elements());

        assert_eq!(document.inserted_count(), 2);
        assert_eq!(document.run_statements(), 1);
        assert_eq!(*seen.lock().unwrap_or_else(PoisonError::into_inner), vec![None]);
    }

    #[test]
    fn event_binding_triggers_before_reading() {
        let (document, _registry, injector) = setup(Arc::new(EventBindingScript));
        let (_seen, on_complete) = recording();
        let injection = injector.prepare(spec("_jsonp3"), on_complete);
        injector.insert(injection.elements());

        document.fire(&ElementId::new("_jsonp3"), Signal::Error);
        assert_eq!(document.triggers(), vec![ElementId::new("_jsonp3")]);
    }

    #[test]
    fn teardown_removes_everything_once() {
        let (document, registry, injector) = setup(Arc::new(TrailingErrorScript));
        let (seen, on_complete) = recording();
        let mut injection = injector.prepare(spec("_jsonp4"), on_complete);
        injector.insert(injection.elements());
        assert!(registry.is_registered("_jsonp4"));

        injection.teardown();
        injection.teardown();

        assert!(document.attached().is_empty());
        assert_eq!(document.removed().len(), 2);
        assert!(!registry.is_registered("_jsonp4"));

        assert!(!document.fire_stale(&ElementId::new("_jsonp4"), Signal::Load));
        assert!(seen.lock().unwrap_or_else(PoisonError::into_inner).is_empty());
    }
}

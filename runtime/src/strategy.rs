//! Transport strategies: host quirk handling.
//!
//! Hosts disagree on how script elements report completion. Each strategy
//! packages one way of coping with that, and the client picks one from the
//! host's [`HostCapabilities`] when it is built. The lifecycle controller
//! never looks at quirks itself.

use jsonp_core::environment::{HostCapabilities, ScriptHost};
use jsonp_core::transport::{
    ElementId, EventBinding, SyntheticStatement, TransportElement,
};
use std::fmt;
use std::sync::Arc;

/// Event name used by the event-association trick
pub const TRIGGER_EVENT: &str = "onclick";

/// How transport elements are configured for a host
pub trait TransportStrategy: Send + Sync + fmt::Debug {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Configure the main element; returns a trailing element to insert after it
    fn prepare(&self, element: &mut TransportElement) -> Option<TransportElement>;

    /// Runs in the completion handler before the slot is read
    fn before_read(&self, host: &dyn ScriptHost, element: &ElementId) {
        let _ = (host, element);
    }
}

/// Standard hosts: async scripts with reliable load and error signals
#[derive(Debug, Clone, Copy, Default)]
pub struct AsyncScript;

impl TransportStrategy for AsyncScript {
    fn name(&self) -> &'static str {
        "async"
    }

    fn prepare(&self, element: &mut TransportElement) -> Option<TransportElement> {
        element.set_async(true);
        None
    }
}

/// Hosts without an error signal
///
/// The script stays ordered and a synthetic statement inserted after it fires
/// the error signal once the script has run. A script that delivered its
/// payload has already settled the request by then.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrailingErrorScript;

impl TransportStrategy for TrailingErrorScript {
    fn name(&self) -> &'static str {
        "trailing-error"
    }

    fn prepare(&self, element: &mut TransportElement) -> Option<TransportElement> {
        element.set_async(false);
        let trailing_id = ElementId::new(format!("{}-trailing", element.id()));
        Some(TransportElement::statement(
            trailing_id,
            SyntheticStatement::FireError {
                target: element.id().clone(),
            },
        ))
    }
}

/// Hosts that only run completion handlers after the event-association trick
#[derive(Debug, Clone, Copy, Default)]
pub struct EventBindingScript;

impl TransportStrategy for EventBindingScript {
    fn name(&self) -> &'static str {
        "event-binding"
    }

    fn prepare(&self, element: &mut TransportElement) -> Option<TransportElement> {
        element.set_async(true);
        element.set_event_binding(Some(EventBinding {
            html_for: element.id().clone(),
            event: TRIGGER_EVENT.to_string(),
        }));
        None
    }

    fn before_read(&self, host: &dyn ScriptHost, element: &ElementId) {
        if let Err(error) = host.trigger(element) {
            tracing::trace!(element = %element, %error, "Event trigger failed, reading slot anyway");
        }
    }
}

/// Pick the strategy matching a host's capabilities
#[must_use]
pub fn for_capabilities(capabilities: HostCapabilities) -> Arc<dyn TransportStrategy> {
    if !capabilities.error_signal {
        Arc::new(TrailingErrorScript)
    } else if capabilities.requires_event_trigger {
        Arc::new(EventBindingScript)
    } else {
        Arc::new(AsyncScript)
    }
}

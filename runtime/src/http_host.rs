//! Script host backed by HTTP.
//!
//! [`HttpScriptHost`] plays the part of a browser document for processes
//! without one: inserting a script element fetches its `src` with `reqwest`,
//! and a body of the form `name(<json>);` is "executed" by invoking `name`
//! in the element's scope with the decoded payload. The element then gets
//! `Load`; transport errors, non-success statuses and bodies that are not a
//! callback invocation get `Error` instead.
//!
//! Async elements are fetched concurrently. Non-async elements and synthetic
//! statements run one after another in insertion order, on a worker task.

use crate::config::is_identifier;
use crate::error::JsonpError;
use jsonp_core::Value;
use jsonp_core::environment::{GlobalScope, HostCapabilities, ScriptHost};
use jsonp_core::transport::{
    ElementId, ElementSource, Signal, SyntheticStatement, TransportElement,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

/// Comment some endpoints put in front of the invocation
const COMMENT_PREFIX: &str = "/**/";

struct Job {
    element: TransportElement,
    scope: Arc<dyn GlobalScope>,
}

struct Inner {
    location: String,
    client: reqwest::Client,
    capabilities: HostCapabilities,
    elements: Mutex<HashMap<ElementId, TransportElement>>,
    tasks: Mutex<HashMap<ElementId, AbortHandle>>,
    ordered: Mutex<Option<mpsc::UnboundedSender<Job>>>,
}

/// A [`ScriptHost`] that loads scripts over HTTP
///
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct HttpScriptHost {
    inner: Arc<Inner>,
}

impl HttpScriptHost {
    /// Host whose document lives at `location`
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self::with_client(location, reqwest::Client::new())
    }

    /// Host using a preconfigured HTTP client
    #[must_use]
    pub fn with_client(location: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            inner: Arc::new(Inner {
                location: location.into(),
                client,
                capabilities: HostCapabilities::standard(),
                elements: Mutex::new(HashMap::new()),
                tasks: Mutex::new(HashMap::new()),
                ordered: Mutex::new(None),
            }),
        }
    }

    /// Report (and emulate) different capabilities
    ///
    /// Without an error signal, failed loads fire nothing.
    #[must_use]
    pub fn with_capabilities(self, capabilities: HostCapabilities) -> Self {
        let inner = Inner {
            location: self.inner.location.clone(),
            client: self.inner.client.clone(),
            capabilities,
            elements: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            ordered: Mutex::new(None),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Number of elements currently attached
    #[must_use]
    pub fn attached(&self) -> usize {
        self.inner
            .elements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn enqueue(&self, runtime: &tokio::runtime::Handle, job: Job) {
        let mut ordered = self
            .inner
            .ordered
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let sender = match ordered.as_ref() {
            Some(sender) if !sender.is_closed() => sender.clone(),
            _ => {
                let (sender, receiver) = mpsc::unbounded_channel();
                runtime.spawn(run_ordered(
                    Arc::downgrade(&self.inner),
                    receiver,
                    runtime.clone(),
                ));
                *ordered = Some(sender.clone());
                sender
            },
        };
        drop(ordered);

        if let Err(mpsc::error::SendError(job)) = sender.send(job) {
            tracing::warn!(element = %job.element.id(), "Ordered worker gone, dropping element");
        }
    }
}

impl ScriptHost for HttpScriptHost {
    fn location(&self) -> String {
        self.inner.location.clone()
    }

    fn capabilities(&self) -> HostCapabilities {
        self.inner.capabilities
    }

    fn insert(&self, element: TransportElement, scope: Arc<dyn GlobalScope>) {
        self.inner
            .elements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(element.id().clone(), element.clone());

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(element = %element.id(), "HTTP script host used outside a tokio runtime");
            self.inner.fail(&element);
            return;
        };

        let job = Job { element, scope };
        if job.element.is_async() && job.element.src().is_some() {
            drop(self.inner.spawn_tracked(&runtime, job));
        } else {
            self.enqueue(&runtime, job);
        }
    }

    fn remove(&self, id: &ElementId) {
        self.inner
            .elements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);

        let task = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl std::fmt::Debug for HttpScriptHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpScriptHost")
            .field("location", &self.inner.location)
            .field("capabilities", &self.inner.capabilities)
            .field("attached", &self.attached())
            .finish_non_exhaustive()
    }
}

/// Runs non-async elements one after another
///
/// Each script load is its own tracked task, so removing the element aborts
/// the load and the queue moves on to the next job.
async fn run_ordered(
    inner: Weak<Inner>,
    mut receiver: mpsc::UnboundedReceiver<Job>,
    runtime: tokio::runtime::Handle,
) {
    while let Some(job) = receiver.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !matches!(job.element.source(), ElementSource::Script(_)) {
            inner.execute(job).await;
            continue;
        }

        let id = job.element.id().clone();
        let task = inner.spawn_tracked(&runtime, job);
        drop(inner);
        if let Err(error) = task.await {
            if error.is_cancelled() {
                tracing::debug!(element = %id, "Script load cancelled");
            } else {
                tracing::warn!(element = %id, %error, "Script load task failed");
            }
        }
    }
    tracing::trace!("Ordered script worker stopped");
}

impl Inner {
    /// Spawn the execution of `job`, abortable through [`ScriptHost::remove`]
    fn spawn_tracked(self: &Arc<Self>, runtime: &tokio::runtime::Handle, job: Job) -> JoinHandle<()> {
        let id = job.element.id().clone();
        let inner = Arc::clone(self);
        let task = runtime.spawn(async move {
            inner.execute(job).await;
        });

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), task.abort_handle());
        // Removed while the task was being registered
        if !self.is_attached(&id) {
            task.abort();
        }
        task
    }

    fn is_attached(&self, id: &ElementId) -> bool {
        self.elements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    fn lookup(&self, id: &ElementId) -> Option<TransportElement> {
        self.elements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn fail(&self, element: &TransportElement) {
        if self.capabilities.error_signal {
            element.fire(Signal::Error);
        }
    }

    async fn execute(&self, job: Job) {
        let Job { element, scope } = job;
        if !self.is_attached(element.id()) {
            return;
        }

        match element.source() {
            ElementSource::Script(src) => {
                let result = self.load(src).await;
                self.tasks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(element.id());

                if !self.is_attached(element.id()) {
                    return;
                }
                match result {
                    Ok((name, payload)) => {
                        if !scope.invoke(&name, payload) {
                            tracing::debug!(element = %element.id(), callback = %name, "Script called an unknown function");
                        }
                        element.fire(Signal::Load);
                    },
                    Err(error) => {
                        tracing::warn!(element = %element.id(), url = %src, %error, "Script load failed");
                        self.fail(&element);
                    },
                }
            },
            ElementSource::Statement(SyntheticStatement::FireError { target }) => {
                if let Some(target) = self.lookup(target) {
                    target.fire(Signal::Error);
                }
            },
        }
    }

    async fn load(&self, src: &str) -> Result<(String, Value), JsonpError> {
        let response = self.client.get(src).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(JsonpError::Http(format!("unexpected status {status}")));
        }
        let body = response.text().await?;
        parse_invocation(&body)
    }
}

/// Split a JSONP body into the called function name and its argument
///
/// Accepts `name(<json>)` with optional surrounding whitespace, an optional
/// trailing `;` and an optional leading `/**/`.
///
/// # Errors
///
/// Returns [`JsonpError::MalformedResponse`] when the body is not a single
/// call of an identifier with one JSON argument.
pub fn parse_invocation(body: &str) -> Result<(String, Value), JsonpError> {
    let body = body.trim();
    let body = body.strip_prefix(COMMENT_PREFIX).unwrap_or(body).trim_start();
    let body = body.strip_suffix(';').unwrap_or(body).trim_end();

    let open = body
        .find('(')
        .ok_or_else(|| JsonpError::MalformedResponse("missing '('".to_string()))?;
    let name = body[..open].trim();
    if !is_identifier(name) {
        return Err(JsonpError::MalformedResponse(format!(
            "{name:?} is not a callable name"
        )));
    }

    let argument = body[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| JsonpError::MalformedResponse("missing ')'".to_string()))?;
    let payload = serde_json::from_str(argument)
        .map_err(|error| JsonpError::MalformedResponse(error.to_string()))?;

    Ok((name.to_string(), payload))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can unwrap
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_invocation() {
        let (name, payload) = parse_invocation(r#"_jsonp4({"a": [1, 2]});"#).unwrap();
        assert_eq!(name, "_jsonp4");
        assert_eq!(payload, json!({"a": [1, 2]}));
    }

    #[test]
    fn parses_commented_invocation_without_semicolon() {
        let (name, payload) = parse_invocation("/**/ cb ( \"text\" )\n").unwrap();
        assert_eq!(name, "cb");
        assert_eq!(payload, json!("text"));
    }

    #[test]
    fn payload_may_contain_parentheses() {
        let (_, payload) = parse_invocation(r#"cb({"s": "(x)"})"#).unwrap();
        assert_eq!(payload, json!({"s": "(x)"}));
    }

    #[test]
    fn rejects_non_invocations() {
        for body in ["", "{\"a\":1}", "alert(1) + 1", "1cb(2)", "cb(not json)"] {
            assert!(
                matches!(parse_invocation(body), Err(JsonpError::MalformedResponse(_))),
                "accepted {body:?}"
            );
        }
    }

    #[test]
    fn reports_configured_capabilities() {
        let host = HttpScriptHost::new("http://localhost/")
            .with_capabilities(HostCapabilities::standard().without_error_signal());
        assert!(!host.capabilities().error_signal);
        assert_eq!(host.location(), "http://localhost/");
    }
}

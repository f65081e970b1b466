//! The JSONP client: submission entry point.
//!
//! A [`JsonpClient`] owns everything requests share: the host, the callback
//! registry with its sequence, the result cache, the selected transport
//! strategy and the set of live requests. Cloning a client is cheap and
//! clones share all of it.

use crate::SystemClock;
use crate::cache::ResultCache;
use crate::config::ClientConfig;
use crate::descriptor::RequestDescriptor;
use crate::error::JsonpError;
use crate::injector::TransportInjector;
use crate::lifecycle::{
    Controller, LifecycleAction, LiveRequests, RequestHandle, RequestPlan,
};
use crate::metrics::RequestMetrics;
use crate::registry::CallbackRegistry;
use crate::strategy::{self, TransportStrategy};
use jsonp_core::Value;
use jsonp_core::environment::{Clock, ScriptHost};
use jsonp_core::outcome::Resolution;
use jsonp_core::target::build_target;
use jsonp_core::transport::ElementId;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;

#[derive(Clone)]
struct Shared {
    host: Arc<dyn ScriptHost>,
    clock: Arc<dyn Clock>,
    config: ClientConfig,
    registry: Arc<CallbackRegistry>,
    cache: Arc<ResultCache>,
    injector: Arc<TransportInjector>,
    live: Arc<LiveRequests>,
    runtime: Option<Handle>,
}

/// Submits JSONP requests against a [`ScriptHost`]
///
/// # Example
///
/// ```ignore
/// let client = JsonpClient::new(Arc::new(HttpScriptHost::new("http://api.example.test/")));
///
/// let payload = client
///     .fetch(RequestDescriptor::new("http://api.example.test/feed").with_callback_parameter("cb"))
///     .await?;
/// ```
#[derive(Clone)]
pub struct JsonpClient {
    shared: Arc<Shared>,
}

impl JsonpClient {
    /// Client with the system clock and default configuration
    #[must_use]
    pub fn new(host: Arc<dyn ScriptHost>) -> Self {
        Self::with_config(host, Arc::new(SystemClock), ClientConfig::default())
    }

    /// Client with an explicit clock and configuration
    ///
    /// The transport strategy is selected from the host's capabilities.
    #[must_use]
    pub fn with_config(
        host: Arc<dyn ScriptHost>,
        clock: Arc<dyn Clock>,
        config: ClientConfig,
    ) -> Self {
        let strategy = strategy::for_capabilities(host.capabilities());
        Self::with_strategy(host, clock, config, strategy)
    }

    /// Client with an explicit transport strategy
    #[must_use]
    pub fn with_strategy(
        host: Arc<dyn ScriptHost>,
        clock: Arc<dyn Clock>,
        config: ClientConfig,
        strategy: Arc<dyn TransportStrategy>,
    ) -> Self {
        tracing::debug!(strategy = strategy.name(), "Creating JSONP client");
        let registry = Arc::new(CallbackRegistry::new());
        let injector = Arc::new(TransportInjector::new(
            Arc::clone(&host),
            Arc::clone(&registry),
            strategy,
        ));

        Self {
            shared: Arc::new(Shared {
                host,
                clock,
                config,
                registry,
                cache: Arc::new(ResultCache::new()),
                injector,
                live: Arc::new(LiveRequests::default()),
                runtime: Handle::try_current().ok(),
            }),
        }
    }

    /// Run deadline timers on `runtime` when submitting outside of one
    ///
    /// Constructors already remember the runtime they were called in.
    /// The returned client shares the registry, cache and live requests
    /// with `self`.
    #[must_use]
    pub fn with_runtime(self, runtime: Handle) -> Self {
        let mut shared = (*self.shared).clone();
        shared.runtime = Some(runtime);
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Client configuration
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// The shared result cache
    #[must_use]
    pub fn cache(&self) -> &ResultCache {
        &self.shared.cache
    }

    /// The callback registry
    #[must_use]
    pub fn registry(&self) -> &CallbackRegistry {
        &self.shared.registry
    }

    /// Name of the selected transport strategy
    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        self.shared.injector.strategy().name()
    }

    /// Requests that have not been cleaned up yet
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.live.len()
    }

    /// Submit a request
    ///
    /// Runs `before_start`, consults the result cache when persistent caching
    /// is on, and otherwise injects the transport element. Outcomes arrive
    /// through the descriptor's hooks and through the returned handle.
    #[tracing::instrument(skip(self, descriptor), name = "jsonp_submit", fields(base = ?descriptor.target))]
    pub fn submit(&self, descriptor: RequestDescriptor) -> RequestHandle {
        RequestMetrics::record_submitted();
        let shared = &self.shared;

        let sequence = shared.registry.next_sequence();
        let logical_name = descriptor
            .callback_name
            .clone()
            .unwrap_or_else(|| shared.config.callback_name.clone());

        let base = descriptor
            .target
            .clone()
            .or_else(|| Some(shared.host.location()).filter(|location| !location.is_empty()))
            .or_else(|| shared.config.location.clone())
            .unwrap_or_default();
        let nonce = (!descriptor.use_shared_cache && !descriptor.use_persistent_cache)
            .then(|| shared.clock.now().timestamp_millis());
        let target = build_target(
            &base,
            &descriptor.data,
            descriptor.callback_parameter.as_deref(),
            nonce,
        );

        // Auto-named callbacks get a per-request name when the URL lets us pick
        let callback = if descriptor.callback_name.is_none() && target.has_placeholder() {
            format!("{logical_name}{sequence}")
        } else {
            logical_name.clone()
        };

        let plan = RequestPlan {
            id: sequence,
            url: target.resolve(&callback),
            callback,
            element_id: ElementId::new(format!("{}{sequence}", shared.config.element_prefix)),
            cache_key: descriptor
                .use_persistent_cache
                .then(|| target.resolve(&logical_name)),
            timeout: descriptor.effective_timeout(shared.config.default_timeout),
        };
        tracing::debug!(request = plan.id, url = %plan.url, "Request planned");

        let controller = Controller::new(
            descriptor,
            plan.clone(),
            Arc::clone(&shared.injector),
            Arc::clone(&shared.cache),
            Arc::clone(&shared.live),
            shared.runtime.clone(),
        );
        shared.live.track(Arc::clone(&controller));
        let handle = RequestHandle::new(controller);

        if let Some(before_start) = handle.before_start.clone() {
            if !before_start(&handle) {
                handle.controller().dispatch(LifecycleAction::Veto);
            }
        }
        if handle.phase().is_terminal() {
            return handle;
        }

        let cached = plan
            .cache_key
            .as_deref()
            .and_then(|key| shared.cache.lookup(key));
        handle.controller().dispatch(LifecycleAction::Start {
            cached,
            timeout: plan.timeout,
        });
        handle
    }

    /// Submit a request and wait for its payload
    ///
    /// Hooks on the descriptor still fire.
    ///
    /// # Errors
    ///
    /// Returns [`JsonpError`] when the request fails, times out, is aborted
    /// or is vetoed.
    pub async fn fetch(&self, descriptor: RequestDescriptor) -> Result<Value, JsonpError> {
        let handle = self.submit(descriptor);
        match handle.wait().await {
            Resolution::Succeeded(payload) => Ok(payload),
            resolution => Err(JsonpError::from_resolution(&resolution)
                .unwrap_or(JsonpError::Transport)),
        }
    }

    /// Abort every live request and clear the result cache
    pub fn shutdown(&self) {
        let live = self.shared.live.drain();
        tracing::info!(aborted = live.len(), "Shutting down JSONP client");
        for controller in live {
            controller.dispatch(LifecycleAction::Abort);
        }
        self.shared.cache.clear();
    }
}

impl fmt::Debug for JsonpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonpClient")
            .field("config", &self.shared.config)
            .field("strategy", &self.strategy_name())
            .field("in_flight", &self.in_flight())
            .field("cached", &self.shared.cache.len())
            .finish_non_exhaustive()
    }
}

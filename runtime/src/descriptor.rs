//! Request descriptors.
//!
//! A [`RequestDescriptor`] is everything a caller says about one request:
//! where to send it, how the callback is named, caching, timeout, and the
//! hooks to call. It is frozen once submitted; the resulting
//! [`RequestHandle`] dereferences to it.
//!
//! # Example
//!
//! ```
//! use jsonp_runtime::RequestDescriptor;
//! use jsonp_core::target::RequestData;
//!
//! let descriptor = RequestDescriptor::new("http://api.example.test/feed")
//!     .with_data(RequestData::pairs([("q", "rust")]))
//!     .with_callback_parameter("callback")
//!     .with_timeout_millis(2000)
//!     .on_success(|payload, _status, _handle| println!("{payload}"));
//!
//! assert_eq!(descriptor.callback_parameter.as_deref(), Some("callback"));
//! ```

use crate::lifecycle::RequestHandle;
use jsonp_core::Value;
use jsonp_core::outcome::{CompletionStatus, FailureKind};
use jsonp_core::target::RequestData;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Runs before anything is sent; returning `false` vetoes the request
pub type BeforeStartHook = Arc<dyn Fn(&RequestHandle) -> bool + Send + Sync>;
/// Receives the (filtered) payload of a successful request
pub type SuccessHook = Arc<dyn Fn(&Value, CompletionStatus, &RequestHandle) + Send + Sync>;
/// Receives the failure of a request
pub type ErrorHook = Arc<dyn Fn(&RequestHandle, FailureKind) + Send + Sync>;
/// Runs after `on_success` or `on_error`
pub type CompleteHook = Arc<dyn Fn(&RequestHandle, CompletionStatus) + Send + Sync>;
/// Transforms a payload before `on_success` sees it
pub type ResultFilter = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// What to fetch and whom to tell
#[derive(Clone, Default)]
pub struct RequestDescriptor {
    /// Base URL; falls back to the host location
    pub target: Option<String>,
    /// Query payload appended to the target
    pub data: RequestData,
    /// Query parameter carrying the callback name
    pub callback_parameter: Option<String>,
    /// Callback name; falls back to the client's configured name
    pub callback_name: Option<String>,
    /// Let intermediaries cache the response (no cache-busting nonce)
    pub use_shared_cache: bool,
    /// Memoize the outcome in the client's result cache
    pub use_persistent_cache: bool,
    /// Charset of the remote script
    pub charset: Option<String>,
    /// Deadline; `Some(Duration::ZERO)` disables the client default
    pub timeout: Option<Duration>,
    context: Option<Arc<dyn Any + Send + Sync>>,
    pub(crate) before_start: Option<BeforeStartHook>,
    pub(crate) on_success: Option<SuccessHook>,
    pub(crate) on_error: Option<ErrorHook>,
    pub(crate) on_complete: Option<CompleteHook>,
    pub(crate) result_filter: Option<ResultFilter>,
}

impl RequestDescriptor {
    /// Descriptor for `target`
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::default()
        }
    }

    /// Set the query payload
    #[must_use]
    pub fn with_data(mut self, data: impl Into<RequestData>) -> Self {
        self.data = data.into();
        self
    }

    /// Set the callback query parameter
    #[must_use]
    pub fn with_callback_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.callback_parameter = Some(parameter.into());
        self
    }

    /// Set an explicit callback name
    ///
    /// Concurrent requests with the same explicit name share one completion
    /// slot, exactly as the remote endpoint sees them.
    #[must_use]
    pub fn with_callback_name(mut self, name: impl Into<String>) -> Self {
        self.callback_name = Some(name.into());
        self
    }

    /// Allow shared caches to serve the response
    #[must_use]
    pub const fn with_shared_cache(mut self, enabled: bool) -> Self {
        self.use_shared_cache = enabled;
        self
    }

    /// Memoize the outcome in the client's result cache
    #[must_use]
    pub const fn with_persistent_cache(mut self, enabled: bool) -> Self {
        self.use_persistent_cache = enabled;
        self
    }

    /// Set the remote script charset
    #[must_use]
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    /// Set the deadline
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the deadline in milliseconds; zero or negative disables it
    #[must_use]
    pub fn with_timeout_millis(mut self, millis: i64) -> Self {
        self.timeout = Some(
            u64::try_from(millis)
                .map(Duration::from_millis)
                .unwrap_or(Duration::ZERO),
        );
        self
    }

    /// Attach a caller value that hooks can read back with [`Self::context`]
    #[must_use]
    pub fn with_context<T: Any + Send + Sync>(mut self, context: T) -> Self {
        self.context = Some(Arc::new(context));
        self
    }

    /// Context of type `T`, if one was attached
    #[must_use]
    pub fn context<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.context.as_deref().and_then(|ctx| ctx.downcast_ref::<T>())
    }

    /// Whether any context was attached
    #[must_use]
    pub const fn has_context(&self) -> bool {
        self.context.is_some()
    }

    /// Run `hook` before sending; returning `false` vetoes the request
    #[must_use]
    pub fn before_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RequestHandle) -> bool + Send + Sync + 'static,
    {
        self.before_start = Some(Arc::new(hook));
        self
    }

    /// Run `hook` with the payload on success
    #[must_use]
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Value, CompletionStatus, &RequestHandle) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    /// Run `hook` on failure
    #[must_use]
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RequestHandle, FailureKind) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Run `hook` after the success or error hook
    #[must_use]
    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RequestHandle, CompletionStatus) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(hook));
        self
    }

    /// Transform payloads before `on_success`
    ///
    /// The result cache keeps the unfiltered payload.
    #[must_use]
    pub fn with_result_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.result_filter = Some(Arc::new(filter));
        self
    }

    /// Effective deadline given the client default
    pub(crate) fn effective_timeout(&self, default: Option<Duration>) -> Option<Duration> {
        self.timeout.or(default).filter(|timeout| !timeout.is_zero())
    }
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("target", &self.target)
            .field("data", &self.data)
            .field("callback_parameter", &self.callback_parameter)
            .field("callback_name", &self.callback_name)
            .field("use_shared_cache", &self.use_shared_cache)
            .field("use_persistent_cache", &self.use_persistent_cache)
            .field("charset", &self.charset)
            .field("timeout", &self.timeout)
            .field("has_context", &self.context.is_some())
            .finish_non_exhaustive()
    }
}

//! # JSONP Runtime
//!
//! Runtime implementation of the JSONP request lifecycle.
//!
//! This crate drives the pure lifecycle reducer from `jsonp-core` against a
//! real [`ScriptHost`](jsonp_core::environment::ScriptHost): it builds
//! targets, injects transport elements, routes callback invocations back to
//! the request that issued them and guarantees exactly one terminal outcome
//! per request.
//!
//! ## Core Components
//!
//! - **Client**: [`JsonpClient`], the submission entry point
//! - **Lifecycle**: per-request controller executing reducer effects ([`lifecycle`])
//! - **Injector**: transport element creation and teardown ([`injector`], [`strategy`])
//! - **Registry**: keyed callback slots, the completion channel ([`registry`])
//! - **Cache**: persistent result memoization ([`cache`])
//! - **HTTP host**: a script host that fetches over HTTP ([`http_host`])
//!
//! ## Example
//!
//! ```ignore
//! use jsonp_runtime::{JsonpClient, RequestDescriptor};
//! use jsonp_runtime::http_host::HttpScriptHost;
//! use std::sync::Arc;
//!
//! let client = JsonpClient::new(Arc::new(HttpScriptHost::new("http://api.example.test/")));
//!
//! let handle = client.submit(
//!     RequestDescriptor::new("http://api.example.test/feed")
//!         .with_callback_parameter("callback")
//!         .with_timeout_millis(5000)
//!         .on_success(|payload, _, _| println!("got {payload}")),
//! );
//!
//! let resolution = handle.wait().await;
//! ```

use jsonp_core::environment::Clock;
use jsonp_core::{DateTime, Utc};

/// Result cache for persistent-cache requests
pub mod cache;

/// Client configuration
pub mod config;

/// Callback registry (completion channel)
pub mod registry;

/// Host quirk strategies
pub mod strategy;

/// Transport element injection
pub mod injector;

/// Request descriptors and hooks
pub mod descriptor;

/// Per-request lifecycle
pub mod lifecycle;

/// Submission entry point
pub mod client;

/// HTTP-backed script host
pub mod http_host;

/// Prometheus metrics for observability
pub mod metrics;

/// Error types for the JSONP runtime
pub mod error {
    use jsonp_core::outcome::{FailureKind, Resolution};
    use thiserror::Error;

    /// Why a fetched request produced no payload
    ///
    /// Request failures are reported to hooks as [`FailureKind`]s; this type
    /// is what [`JsonpClient::fetch`](crate::JsonpClient::fetch) and the HTTP
    /// host surface to Rust callers.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum JsonpError {
        /// The transport failed or completed without calling back
        #[error("Transport failed without delivering a payload")]
        Transport,

        /// The deadline elapsed
        #[error("Request timed out")]
        Timeout,

        /// The request was aborted
        #[error("Request was aborted")]
        Aborted,

        /// `before_start` refused the request
        #[error("Request was vetoed before starting")]
        Vetoed,

        /// The response body was not a callback invocation
        #[error("Malformed JSONP response: {0}")]
        MalformedResponse(String),

        /// The HTTP exchange failed
        #[error("HTTP error: {0}")]
        Http(String),
    }

    impl JsonpError {
        /// Error matching a non-success resolution; `None` for success
        #[must_use]
        pub const fn from_resolution(resolution: &Resolution) -> Option<Self> {
            match resolution {
                Resolution::Succeeded(_) => None,
                Resolution::Failed(FailureKind::Error) => Some(Self::Transport),
                Resolution::Failed(FailureKind::Timeout) => Some(Self::Timeout),
                Resolution::Aborted => Some(Self::Aborted),
                Resolution::Vetoed => Some(Self::Vetoed),
            }
        }
    }

    impl From<reqwest::Error> for JsonpError {
        fn from(error: reqwest::Error) -> Self {
            Self::Http(error.to_string())
        }
    }

    /// Errors loading or validating [`ClientConfig`](crate::config::ClientConfig)
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum ConfigError {
        /// A value could not be parsed
        #[error("Invalid value {value:?} for {key}")]
        Parse {
            /// Variable name
            key: &'static str,
            /// Raw value
            value: String,
        },

        /// The configuration is inconsistent
        #[error("Invalid configuration: {0}")]
        Validation(String),
    }
}

pub use client::JsonpClient;
pub use config::ClientConfig;
pub use descriptor::RequestDescriptor;
pub use error::{ConfigError, JsonpError};
pub use lifecycle::{Phase, RequestHandle};

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the request lifecycle:
//! - Submissions, vetoes and terminal outcomes
//! - In-flight live requests
//! - Result cache hits and misses
//! - Transport element injections
//!
//! # Example
//!
//! ```rust,no_run
//! use jsonp_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics rendered in Prometheus text format
//! println!("{}", server.render().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge};

const REQUESTS_SUBMITTED: &str = "jsonp_requests_submitted_total";
const REQUESTS_VETOED: &str = "jsonp_requests_vetoed_total";
const REQUESTS_COMPLETED: &str = "jsonp_requests_completed_total";
const REQUESTS_IN_FLIGHT: &str = "jsonp_requests_in_flight";
const CACHE_HITS: &str = "jsonp_cache_hits_total";
const CACHE_MISSES: &str = "jsonp_cache_misses_total";
const TRANSPORT_INJECTED: &str = "jsonp_transport_injected_total";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Installs the Prometheus recorder; scraping is served by whatever HTTP
/// layer the application already runs, through [`MetricsServer::render`].
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address the application exposes metrics on (logged only)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the recorder cannot be installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this is
    /// logged and treated as success.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "JSONP metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder hasn't been installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(REQUESTS_SUBMITTED, "Total number of submitted requests");
    describe_counter!(
        REQUESTS_VETOED,
        "Total number of submissions refused by before_start"
    );
    describe_counter!(
        REQUESTS_COMPLETED,
        "Total number of requests that reached a terminal state, by outcome"
    );
    describe_gauge!(
        REQUESTS_IN_FLIGHT,
        "Live requests with a transport element currently attached"
    );
    describe_counter!(CACHE_HITS, "Submissions resolved from the result cache");
    describe_counter!(CACHE_MISSES, "Cache-enabled submissions that missed the cache");
    describe_counter!(TRANSPORT_INJECTED, "Transport elements inserted into the host");
}

/// Request lifecycle metrics recorder.
pub struct RequestMetrics;

impl RequestMetrics {
    /// Record a submission.
    pub fn record_submitted() {
        counter!(REQUESTS_SUBMITTED).increment(1);
    }

    /// Record a veto from `before_start`.
    pub fn record_vetoed() {
        counter!(REQUESTS_VETOED).increment(1);
    }

    /// Record a terminal state (`success`, `error`, `timeout` or `aborted`).
    pub fn record_completed(outcome: &'static str) {
        counter!(REQUESTS_COMPLETED, "outcome" => outcome).increment(1);
    }

    /// Record a transport element entering the host.
    pub fn record_injected() {
        counter!(TRANSPORT_INJECTED).increment(1);
        gauge!(REQUESTS_IN_FLIGHT).increment(1.0);
    }

    /// Record a transport element leaving the host.
    pub fn record_released() {
        gauge!(REQUESTS_IN_FLIGHT).decrement(1.0);
    }
}

/// Result cache metrics recorder.
pub struct CacheMetrics;

impl CacheMetrics {
    /// Record a cache hit.
    pub fn record_hit() {
        counter!(CACHE_HITS).increment(1);
    }

    /// Record a cache miss.
    pub fn record_miss() {
        counter!(CACHE_MISSES).increment(1);
    }
}

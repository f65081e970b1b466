//! # JSONP Testing
//!
//! Testing utilities and helpers for composable JSONP requests.
//!
//! This crate provides:
//! - Mock implementations of Environment traits (clock, script host)
//! - A recorder for request hooks
//! - Property-based testing strategies
//! - Assertion helpers for reducers
//!
//! ## Example
//!
//! ```ignore
//! use jsonp_testing::{MockDocument, test_clock};
//!
//! #[tokio::test]
//! async fn delivers_payload() {
//!     let document = Arc::new(MockDocument::new());
//!     let client = JsonpClient::with_config(document.clone(), Arc::new(test_clock()), ClientConfig::default());
//!
//!     let handle = client.submit(RequestDescriptor::new("http://x").with_callback_parameter("cb"));
//!     document.respond(handle.element_id(), "cb", json!([1, 2]));
//!
//!     assert_eq!(handle.wait().await, Resolution::Succeeded(json!([1, 2])));
//! }
//! ```

use chrono::{DateTime, Utc};
use jsonp_core::environment::Clock;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    pub use crate::mock_document::{MockDocument, query_param};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making nonces reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use jsonp_testing::mocks::FixedClock;
    /// use jsonp_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// Its nonce is `1735689600000`.
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Scriptable in-memory host document
pub mod mock_document;

/// Recording request hooks
pub mod hooks;


/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Query keys and values, including characters that need encoding
    pub fn query_pairs() -> impl Strategy<Value = Vec<(String, String)>> {
        prop::collection::vec(("[a-z][a-z0-9_]{0,7}", "[ -~]{0,12}"), 0..5)
    }

    /// Identifiers usable as callback names
    pub fn callback_name() -> impl Strategy<Value = String> {
        "[a-zA-Z_$][a-zA-Z0-9_$]{0,11}"
    }
}

/// Install a `tracing` subscriber writing to the test output
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use hooks::{HookEvent, HookRecorder};
pub use mock_document::MockDocument;
pub use mocks::{FixedClock, test_clock};
pub use reducer_test::{ReducerTest, assertions};

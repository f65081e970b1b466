//! Client configuration.
//!
//! Provides the defaults every submission falls back to, with environment
//! variable loading and validation.
//!
//! # Example
//!
//! ```
//! use jsonp_runtime::config::ClientConfig;
//! use std::time::Duration;
//!
//! let config = ClientConfig::default()
//!     .with_callback_name("feed")
//!     .with_default_timeout(Duration::from_secs(5));
//!
//! assert!(config.validate().is_ok());
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default callback name, also the default element id prefix
pub const DEFAULT_CALLBACK_NAME: &str = "_jsonp";

/// Environment variable overriding [`ClientConfig::callback_name`]
pub const ENV_CALLBACK_NAME: &str = "JSONP_CALLBACK_NAME";
/// Environment variable overriding [`ClientConfig::element_prefix`]
pub const ENV_ELEMENT_PREFIX: &str = "JSONP_ELEMENT_PREFIX";
/// Environment variable overriding [`ClientConfig::default_timeout`] (milliseconds)
pub const ENV_TIMEOUT_MS: &str = "JSONP_TIMEOUT_MS";
/// Environment variable overriding [`ClientConfig::location`]
pub const ENV_LOCATION: &str = "JSONP_LOCATION";

/// Configuration for [`JsonpClient`](crate::JsonpClient) instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Callback name used when a descriptor does not name one
    pub callback_name: String,
    /// Prefix of transport element ids
    pub element_prefix: String,
    /// Timeout applied when a descriptor does not set one
    #[serde(with = "millis")]
    pub default_timeout: Option<Duration>,
    /// Fallback target when neither the descriptor nor the host provides one
    pub location: Option<String>,
}

impl ClientConfig {
    /// Set the default callback name
    #[must_use]
    pub fn with_callback_name(mut self, name: impl Into<String>) -> Self {
        self.callback_name = name.into();
        self
    }

    /// Set the element id prefix
    #[must_use]
    pub fn with_element_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.element_prefix = prefix.into();
        self
    }

    /// Set the default timeout
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Set the fallback location
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Load from process environment variables on top of the defaults
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be parsed or the result is invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup on top of the defaults
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be parsed or the result is invalid
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup(ENV_CALLBACK_NAME) {
            config.callback_name = name;
        }
        if let Some(prefix) = lookup(ENV_ELEMENT_PREFIX) {
            config.element_prefix = prefix;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            let millis: i64 = raw.trim().parse().map_err(|_| ConfigError::Parse {
                key: ENV_TIMEOUT_MS,
                value: raw.clone(),
            })?;
            config.default_timeout = u64::try_from(millis)
                .ok()
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis);
        }
        if let Some(location) = lookup(ENV_LOCATION) {
            config.location = Some(location);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if a name is empty or not a valid identifier
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_identifier(&self.callback_name) {
            return Err(ConfigError::Validation(format!(
                "callback_name must be an identifier, got {:?}",
                self.callback_name
            )));
        }
        if self.element_prefix.is_empty() {
            return Err(ConfigError::Validation(
                "element_prefix cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            callback_name: DEFAULT_CALLBACK_NAME.to_string(),
            element_prefix: DEFAULT_CALLBACK_NAME.to_string(),
            default_timeout: None,
            location: None,
        }
    }
}

/// Whether `name` can be called as a global function
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::ref_option)] // serde `with` hands us `&Option<T>`
    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.filter(|ms| *ms > 0).map(Duration::from_millis))
    }
}

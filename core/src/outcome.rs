//! Terminal outcomes of a request.
//!
//! A request ends exactly once, either with a payload or with a
//! [`FailureKind`]. Hooks see the outcome through [`CompletionStatus`],
//! awaiting callers through [`Resolution`], and the result cache through
//! [`CachedOutcome`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Why a request failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Transport signaled failure, or completed without delivering a payload
    Error,
    /// The configured deadline elapsed before any terminal signal
    Timeout,
}

impl FailureKind {
    /// Status string handed to hooks
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// The callback was invoked with this payload
    Success(Value),
    /// The request failed
    Failure(FailureKind),
}

impl Outcome {
    /// Status string for this outcome
    #[must_use]
    pub const fn status(&self) -> CompletionStatus {
        match self {
            Self::Success(_) => CompletionStatus::Success,
            Self::Failure(kind) => CompletionStatus::from_failure(*kind),
        }
    }
}

/// Status handed to `on_success` and `on_complete`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    /// Payload delivered
    Success,
    /// Generic failure
    Error,
    /// Deadline elapsed
    Timeout,
}

impl CompletionStatus {
    /// Status corresponding to a failure kind
    #[must_use]
    pub const fn from_failure(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Error => Self::Error,
            FailureKind::Timeout => Self::Timeout,
        }
    }

    /// Lowercase status string (`"success"`, `"error"`, `"timeout"`)
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome stored in the result cache
///
/// Has no timeout variant: a timed-out request cannot be cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CachedOutcome {
    /// A previously delivered payload
    Success(Value),
    /// A previous transport failure
    Error,
}

impl CachedOutcome {
    /// Cacheable form of an outcome; `None` for timeouts
    #[must_use]
    pub fn from_outcome(outcome: &Outcome) -> Option<Self> {
        match outcome {
            Outcome::Success(payload) => Some(Self::Success(payload.clone())),
            Outcome::Failure(FailureKind::Error) => Some(Self::Error),
            Outcome::Failure(FailureKind::Timeout) => None,
        }
    }

    /// Outcome to replay on a cache hit
    #[must_use]
    pub fn into_outcome(self) -> Outcome {
        match self {
            Self::Success(payload) => Outcome::Success(payload),
            Self::Error => Outcome::Failure(FailureKind::Error),
        }
    }
}

/// What an awaiting caller observes once a request has settled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Resolution {
    /// Success, with the payload after the result filter
    Succeeded(Value),
    /// Failure reported through `on_error`
    Failed(FailureKind),
    /// Cancelled through `abort()`; no hooks fired
    Aborted,
    /// `before_start` refused the submission; no hooks fired
    Vetoed,
}

impl Resolution {
    /// Whether hooks fired for this resolution
    #[must_use]
    pub const fn fired_hooks(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed(_))
    }
}

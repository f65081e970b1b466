use thiserror::Error;

/// Errors a [`ScriptHost`](crate::environment::ScriptHost) can report
///
/// Hosts never report request failures through these; a failed load is a
/// `Signal::Error` on the element. These cover host operations themselves.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The host does not implement the requested operation
    #[error("Host does not support {0}")]
    Unsupported(&'static str),

    /// No element with that id is attached to the host
    #[error("Unknown transport element: {0}")]
    UnknownElement(String),
}

//! The AMI client's error taxonomy (spec.md §7).

use std::sync::Arc;

use thiserror::Error;

/// All ways an operation against a [`crate::client::Client`] can fail.
///
/// Cloneable so that a single fatal cause can be delivered to every pending
/// [`crate::client::Client::publish`] caller and every subscriber at once
/// (termination completeness, spec.md §8 property 4).
#[derive(Clone, Debug, Error)]
pub enum AmiError {
    /// A null/invalid argument was supplied (e.g. a message with no ActionID).
    #[error("invalid argument: {0}")]
    Argument(String),

    /// Publish/Subscribe was called before Start completed.
    #[error("client not started")]
    NotStarted,

    /// Start was called on a client that has already started.
    #[error("client already started")]
    AlreadyStarted,

    /// The banner line was missing or did not begin with "Asterisk Call Manager".
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Publish was called with an ActionID already in flight.
    #[error("duplicate ActionID: {0}")]
    DuplicateActionId(String),

    /// A message could not be parsed off the wire.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A read or write fault occurred on the underlying stream.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The client stopped voluntarily while this call was pending.
    #[error("client stopped")]
    Cancelled,
}

impl AmiError {
    pub(crate) fn io(cause: std::io::Error) -> Self {
        AmiError::Io(Arc::new(cause))
    }
}

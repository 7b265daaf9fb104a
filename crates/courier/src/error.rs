//! Unified error type for Courier.

use courier_auth::AuthError;
use courier_protocol::ProtocolError;
use courier_transport::TransportError;

/// Top-level error that wraps the errors of every Courier crate.
///
/// Asynchronous failures inside a connection (reads, writes, panicking
/// messages) are collected as `CourierError`s and handed to the
/// connection's error callback.
#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    /// Reading or writing the byte stream failed, or the peer went away.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A message could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A builder was missing a required component, or a single-valued
    /// component was set twice.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A message, contextual task or recurring task panicked.
    #[error("execution failed: {0}")]
    Execution(String),
}

impl CourierError {
    /// Whether this is the peer closing the stream rather than a failure.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_end_of_stream())
    }
}

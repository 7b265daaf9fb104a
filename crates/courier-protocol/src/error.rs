//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means the problem is in turning messages into
//! envelopes (or back), never in the network itself. The transport layer
//! wraps it when a decode fails inside `read()`.

/// Errors that can occur while encoding, decoding or registering messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a message into JSON).
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Deserialization failed: malformed JSON, a missing `class`, or
    /// `fields` that don't match the resolved type.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The envelope named a type that is neither registered nor the source
    /// of an adapter mapping.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Two registrations claimed the same identifier.
    ///
    /// Raised at registry construction time, before any message flows.
    #[error("identifier already registered: {0}")]
    DuplicateIdentifier(String),

    /// The message is structurally valid JSON but violates the envelope
    /// rules (e.g. the envelope is not an object).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

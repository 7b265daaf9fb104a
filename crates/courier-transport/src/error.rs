use std::io;

use courier_protocol::ProtocolError;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer closed the stream, or the local side already closed it.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] io::Error),

    /// Opening an outbound connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] io::Error),

    /// The listener was shut down.
    #[error("transport shut down")]
    Shutdown,

    /// The encoded payload does not fit a 2-byte length header.
    #[error("frame too large: {0} bytes (max 65535)")]
    FrameTooLarge(usize),

    /// The payload bytes are not valid modified UTF-8.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The payload was read but could not be decoded into a message.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Whether this error means the stream simply ended.
    ///
    /// Only used to pick a log message; every error takes the same path
    /// through the connection's error callback.
    pub fn is_end_of_stream(&self) -> bool {
        match self {
            TransportError::ConnectionClosed(_) => true,
            TransportError::ReceiveFailed(e) | TransportError::SendFailed(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }
}

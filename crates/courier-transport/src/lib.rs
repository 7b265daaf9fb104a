//! Transport layer for Courier.
//!
//! Provides the byte-level half of the connection pipeline:
//!
//! - [`frame`]: 2-byte big-endian length + modified-UTF-8 framing.
//! - [`MessageReader`] / [`MessageWriter`]: one message in, one message
//!   out, over any `AsyncRead` / `AsyncWrite`.
//! - [`MessageIoFactory`]: turns a raw stream pair into a reader/writer
//!   pair; [`JsonMessageIoFactory`] is the default.
//! - [`Transport`] / [`TcpTransport`]: accepting inbound streams.

pub mod frame;
mod error;
mod json;
mod tcp;

pub use error::TransportError;
pub use json::{JsonMessageIoFactory, JsonMessageReader, JsonMessageWriter};
pub use tcp::TcpTransport;

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

use futures_util::future::BoxFuture;
use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite};

/// Type-erased read half handed to a [`MessageIoFactory`].
pub type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
/// Type-erased write half handed to a [`MessageIoFactory`].
pub type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Creates a random identifier.
    pub fn random() -> Self {
        Self(rand::rng().random())
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{:016x}", self.0)
    }
}

/// Reads one message at a time from a byte stream.
///
/// `read` may park until a full frame arrives; only the connection's read
/// worker ever calls it, so it never competes with itself.
pub trait MessageReader<M>: Send + 'static {
    /// Reads the next message.
    ///
    /// # Errors
    /// I/O failures, end of stream, and decode failures (wrapped as
    /// [`TransportError::Protocol`]).
    fn read(&mut self) -> BoxFuture<'_, Result<M, TransportError>>;

    /// Releases the underlying stream. Further reads fail with
    /// [`TransportError::ConnectionClosed`].
    fn close(&mut self) -> Result<(), TransportError>;

    fn is_closed(&self) -> bool;
}

/// Writes one message at a time to a byte stream.
pub trait MessageWriter<M>: Send + 'static {
    /// Encodes and writes one message, flushing it to the stream.
    fn write(&mut self, message: &M) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Releases the underlying stream. Further writes fail with
    /// [`TransportError::ConnectionClosed`].
    fn close(&mut self) -> Result<(), TransportError>;

    fn is_closed(&self) -> bool;
}

/// Produces a reader/writer pair from the two halves of a byte stream.
pub trait MessageIoFactory<M>: Send + Sync + 'static {
    fn create_reader(&self, stream: BoxedRead) -> Box<dyn MessageReader<M>>;

    fn create_writer(&self, stream: BoxedWrite) -> Box<dyn MessageWriter<M>>;
}

/// Accepts new incoming byte streams.
pub trait Transport: Send + Sync + 'static {
    /// The stream type produced by this transport.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Waits for and accepts the next incoming stream.
    ///
    /// Returns [`TransportError::Shutdown`] once [`close`](Self::close)
    /// has been called, including for an accept already in progress.
    fn accept(
        &self,
    ) -> impl Future<Output = Result<(Self::Stream, SocketAddr), TransportError>> + Send;

    /// Stops accepting and releases the listening socket.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(255);
        assert_eq!(id.to_string(), "conn-00000000000000ff");
    }

    #[test]
    fn test_random_ids_differ() {
        // 2^-64 odds of a false failure.
        assert_ne!(ConnectionId::random(), ConnectionId::random());
    }

    #[test]
    fn test_connection_id_hash_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ConnectionId::new(1), "alice");
        map.insert(ConnectionId::new(2), "bob");
        assert_eq!(map[&ConnectionId::new(1)], "alice");
    }
}

//! TCP listener transport.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use crate::{Transport, TransportError};

/// A TCP [`Transport`] that listens for incoming streams.
///
/// The listener lives in a slot that [`close`](Transport::close) empties;
/// an accept in progress holds its own `Arc` and is woken through
/// `shutdown`, so the socket is released as soon as that accept returns.
pub struct TcpTransport {
    listener: Mutex<Option<Arc<TcpListener>>>,
    local_addr: SocketAddr,
    shutdown: Notify,
}

impl TcpTransport {
    /// Binds a new TCP transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        let local_addr = listener.local_addr().map_err(TransportError::AcceptFailed)?;
        tracing::info!(%local_addr, "TCP transport listening");
        Ok(Self {
            listener: Mutex::new(Some(Arc::new(listener))),
            local_addr,
            shutdown: Notify::new(),
        })
    }

    /// The address the listener is bound to (with the real port when
    /// bound to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn current(&self) -> Option<Arc<TcpListener>> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn accept(&self) -> Result<(TcpStream, SocketAddr), TransportError> {
        // Register for the shutdown signal before looking at the slot so a
        // concurrent `close` can't slip in between.
        let notified = self.shutdown.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let listener = self.current().ok_or(TransportError::Shutdown)?;
        tokio::select! {
            res = listener.accept() => {
                let (stream, addr) = res.map_err(TransportError::AcceptFailed)?;
                tracing::debug!(%addr, "accepted TCP stream");
                Ok((stream, addr))
            }
            _ = &mut notified => Err(TransportError::Shutdown),
        }
    }

    fn close(&self) {
        let taken = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if taken.is_some() {
            tracing::info!(local_addr = %self.local_addr, "TCP transport closed");
        }
        self.shutdown.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.current().is_none()
    }
}

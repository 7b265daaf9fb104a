//! The server: an acceptor loop plus a registry of live connections.
//!
//! ```text
//!  TcpTransport ──accept──→ acceptor ──build──→ Connection ──start
//!                                          │
//!                        registry ←─insert─┘   (removed again by the
//!                                               connection's shutdown hook)
//! ```
//!
//! Callbacks are never invoked while the registry lock is held.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

use courier_protocol::Message;
use courier_transport::{ConnectionId, TcpTransport, Transport, TransportError};
use tokio::net::TcpStream;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::builder::{ConnectionBuilder, ConnectionSettings};
use crate::config::ServerConfig;
use crate::connection::{Connection, ContextualTask, lock};
use crate::CourierError;

/// Called with the server on startup or shutdown.
pub type ServerCallback<M> = Arc<dyn Fn(&Server<M>) + Send + Sync>;

/// Called when a connection joins or leaves the registry.
pub type ServerConnectionCallback<M> = Arc<dyn Fn(&Server<M>, &Connection<M>) + Send + Sync>;

/// Run against a connection's context after every executed message, with
/// access to the server.
pub type ServerContextualTask<M> =
    Arc<dyn Fn(&Server<M>, &mut <M as Message>::Context) + Send + Sync>;

const CREATED: u8 = 0;
const STARTED: u8 = 1;
const STOPPED: u8 = 2;

struct ServerInner<M: Message> {
    config: ServerConfig,
    transport: TcpTransport,
    /// Settings every accepted connection is built from, with the server's
    /// contextual tasks and removal hook already added.
    template: ConnectionSettings<M>,
    connections: Mutex<HashMap<ConnectionId, Connection<M>>>,
    startup_callbacks: Vec<ServerCallback<M>>,
    shutdown_callbacks: Vec<ServerCallback<M>>,
    added_callbacks: Vec<ServerConnectionCallback<M>>,
    removed_callbacks: Vec<ServerConnectionCallback<M>>,
    state: AtomicU8,
    acceptor: Mutex<Option<AbortHandle>>,
}

/// Handle to a server. Clones refer to the same server.
pub struct Server<M: Message> {
    inner: Arc<ServerInner<M>>,
}

impl<M: Message> Clone for Server<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Message> Server<M> {
    pub fn builder() -> ServerBuilder<M> {
        ServerBuilder::new()
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.transport.local_addr()
    }

    /// Spawns the acceptor and invokes the startup callbacks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self
            .inner
            .state
            .compare_exchange(CREATED, STARTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("start ignored: server already started or stopped");
            return;
        }

        let handle = tokio::spawn(accept_loop(self.clone())).abort_handle();
        let mut acceptor = lock(&self.inner.acceptor);
        if self.is_stopped() {
            handle.abort();
            return;
        }
        *acceptor = Some(handle);
        drop(acceptor);

        info!(local_addr = %self.local_addr(), "server started");
        for callback in &self.inner.startup_callbacks {
            callback(self);
        }
    }

    /// Stops every live connection, closes the listener, then invokes the
    /// shutdown callbacks. Later calls do nothing.
    pub fn stop(&self) {
        if self.inner.state.swap(STOPPED, Ordering::AcqRel) == STOPPED {
            return;
        }
        if let Some(acceptor) = lock(&self.inner.acceptor).take() {
            acceptor.abort();
        }

        let snapshot = self.connections();
        debug!(connections = snapshot.len(), "stopping connections");
        for connection in &snapshot {
            connection.stop();
        }
        self.inner.transport.close();

        info!("server stopped");
        for callback in &self.inner.shutdown_callbacks {
            callback(self);
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == STARTED
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == STOPPED
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.inner.connections).len()
    }

    /// Snapshot of the live connections.
    pub fn connections(&self) -> Vec<Connection<M>> {
        lock(&self.inner.connections).values().cloned().collect()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Connection<M>> {
        lock(&self.inner.connections).get(&id).cloned()
    }

    /// Queues `message` on every live connection. Returns how many
    /// connections it was queued on.
    pub fn broadcast(&self, message: M) -> usize
    where
        M: Clone,
    {
        self.broadcast_filtered(message, |_| true)
    }

    /// Queues `message` on every live connection matching `predicate`.
    pub fn broadcast_filtered<F>(&self, message: M, predicate: F) -> usize
    where
        M: Clone,
        F: Fn(&Connection<M>) -> bool,
    {
        let targets: Vec<_> = self
            .connections()
            .into_iter()
            .filter(|c| predicate(c))
            .collect();
        for connection in &targets {
            connection.send_message(message.clone());
        }
        debug!(recipients = targets.len(), "broadcast queued");
        targets.len()
    }

    fn on_accept(&self, stream: TcpStream, peer: SocketAddr) {
        let (read, write) = stream.into_split();
        let connection =
            Connection::assemble(&self.inner.template, Box::new(read), Box::new(write));
        info!(id = %connection.id(), %peer, "connection accepted");

        lock(&self.inner.connections).insert(connection.id(), connection.clone());
        for callback in &self.inner.added_callbacks {
            callback(self, &connection);
        }
        // stop() may have taken its snapshot before the insert.
        if self.is_stopped() {
            connection.stop();
        } else {
            connection.start();
        }
    }

    fn on_connection_stopped(&self, connection: &Connection<M>) {
        let removed = lock(&self.inner.connections).remove(&connection.id());
        if removed.is_none() {
            return;
        }
        debug!(id = %connection.id(), remaining = self.connection_count(), "connection removed");
        for callback in &self.inner.removed_callbacks {
            callback(self, connection);
        }
    }
}

impl<M: Message> fmt::Debug for Server<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr())
            .field("connections", &self.connection_count())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Fixed-delay accept loop. Idle once the listener is closed.
async fn accept_loop<M: Message>(server: Server<M>) {
    let cadence = server.inner.config.accept_cadence;
    loop {
        if !server.inner.transport.is_closed() {
            match server.inner.transport.accept().await {
                Ok((stream, peer)) => server.on_accept(stream, peer),
                Err(TransportError::Shutdown) => debug!("listener closed; acceptor idle"),
                Err(e) => error!(error = %e, "accept failed"),
            }
        }
        tokio::time::sleep(cadence).await;
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures and builds a [`Server`].
///
/// The connection builder supplies everything each accepted connection
/// needs except its streams, which come from the listener.
pub struct ServerBuilder<M: Message> {
    config: Option<ServerConfig>,
    transport: Option<TcpTransport>,
    connection_builder: Option<ConnectionBuilder<M>>,
    contextual_tasks: Vec<ServerContextualTask<M>>,
    startup_callbacks: Vec<ServerCallback<M>>,
    shutdown_callbacks: Vec<ServerCallback<M>>,
    added_callbacks: Vec<ServerConnectionCallback<M>>,
    removed_callbacks: Vec<ServerConnectionCallback<M>>,
    violations: Vec<String>,
}

impl<M: Message> ServerBuilder<M> {
    pub fn new() -> Self {
        Self {
            config: None,
            transport: None,
            connection_builder: None,
            contextual_tasks: Vec::new(),
            startup_callbacks: Vec::new(),
            shutdown_callbacks: Vec::new(),
            added_callbacks: Vec::new(),
            removed_callbacks: Vec::new(),
            violations: Vec::new(),
        }
    }

    fn violation(&mut self, what: &str) {
        self.violations.push(format!("{what} set more than once"));
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        if self.config.is_some() {
            self.violation("server config");
        } else {
            self.config = Some(config);
        }
        self
    }

    /// Uses an already bound listener instead of binding
    /// [`ServerConfig::bind_addr`]. Consumed by the next build.
    pub fn with_transport(mut self, transport: TcpTransport) -> Self {
        if self.transport.is_some() {
            self.violation("transport");
        } else {
            self.transport = Some(transport);
        }
        self
    }

    /// Required. Template for every accepted connection; its streams, if
    /// any, are ignored.
    pub fn with_connection_builder(mut self, builder: ConnectionBuilder<M>) -> Self {
        if self.connection_builder.is_some() {
            self.violation("connection builder");
        } else {
            self.connection_builder = Some(builder);
        }
        self
    }

    pub fn with_contextual_task<F>(mut self, task: F) -> Self
    where
        F: Fn(&Server<M>, &mut M::Context) + Send + Sync + 'static,
    {
        self.contextual_tasks.push(Arc::new(task));
        self
    }

    pub fn with_startup_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Server<M>) + Send + Sync + 'static,
    {
        self.startup_callbacks.push(Arc::new(callback));
        self
    }

    pub fn with_shutdown_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Server<M>) + Send + Sync + 'static,
    {
        self.shutdown_callbacks.push(Arc::new(callback));
        self
    }

    pub fn with_connection_added_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Server<M>, &Connection<M>) + Send + Sync + 'static,
    {
        self.added_callbacks.push(Arc::new(callback));
        self
    }

    pub fn with_connection_removed_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Server<M>, &Connection<M>) + Send + Sync + 'static,
    {
        self.removed_callbacks.push(Arc::new(callback));
        self
    }

    /// Binds the listener (unless one was supplied) and builds the server.
    /// The server is not started.
    ///
    /// # Errors
    /// [`CourierError::Configuration`] if the connection builder is missing
    /// or invalid, or a single-valued component was set twice;
    /// [`CourierError::Transport`] if binding fails.
    pub async fn build(&mut self) -> Result<Server<M>, CourierError> {
        if let Some(violation) = self.violations.first() {
            return Err(CourierError::Configuration(violation.clone()));
        }
        let mut template = self
            .connection_builder
            .as_ref()
            .ok_or_else(|| CourierError::Configuration("no connection builder set".into()))?
            .settings()?;
        let config = self.config.clone().unwrap_or_default().validated();
        let transport = match self.transport.take() {
            Some(transport) => transport,
            None => TcpTransport::bind(&config.bind_addr).await?,
        };
        template.config = config.connection.clone();

        let server_tasks = self.contextual_tasks.clone();
        let inner = Arc::new_cyclic(|weak: &Weak<ServerInner<M>>| {
            for task in server_tasks {
                let weak = weak.clone();
                let wrapped: ContextualTask<M::Context> = Arc::new(move |context: &mut M::Context| {
                    if let Some(inner) = weak.upgrade() {
                        task(&Server { inner }, context);
                    }
                });
                template.contextual_tasks.push(wrapped);
            }

            let weak = weak.clone();
            template
                .shutdown_callbacks
                .push(Arc::new(move |connection: &Connection<M>| {
                    if let Some(inner) = weak.upgrade() {
                        Server { inner }.on_connection_stopped(connection);
                    }
                }));

            ServerInner {
                config,
                transport,
                template,
                connections: Mutex::new(HashMap::new()),
                startup_callbacks: self.startup_callbacks.clone(),
                shutdown_callbacks: self.shutdown_callbacks.clone(),
                added_callbacks: self.added_callbacks.clone(),
                removed_callbacks: self.removed_callbacks.clone(),
                state: AtomicU8::new(CREATED),
                acceptor: Mutex::new(None),
            }
        });
        Ok(Server { inner })
    }
}

impl<M: Message> Default for ServerBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

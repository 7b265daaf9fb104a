//! Builder for [`Connection`]s.
//!
//! ```rust,ignore
//! let mut builder = ConnectionBuilder::<Chat>::new()
//!     .with_message_registry(registry)
//!     .with_default_context()
//!     .with_emergency_stop();
//!
//! let connection = builder.connect("127.0.0.1:7777").await?;
//! connection.start();
//! ```
//!
//! Single-valued components (io factory, streams, context factory, error
//! callback, config) may be set once; setting one twice is reported by
//! [`build`](ConnectionBuilder::build). Multi-valued components
//! (contextual tasks, shutdown callbacks, recurring-task factories)
//! accumulate. A builder can build any number of connections: each gets
//! its own copy of the collections, a fresh context and fresh recurring
//! tasks. Only the streams are consumed by a build.

use std::fmt;
use std::sync::Arc;

use courier_protocol::{Message, MessageRegistry};
use courier_tick::{RecurringTask, RecurringTaskFactory};
use courier_transport::{
    BoxedRead, BoxedWrite, JsonMessageIoFactory, MessageIoFactory, TransportError,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::connection::{
    Connection, ConnectionCallback, ContextFactory, ContextualTask, ErrorCallback,
};
use crate::config::ConnectionConfig;
use crate::CourierError;

/// Everything needed to assemble a connection except its streams.
pub(crate) struct ConnectionSettings<M: Message> {
    pub(crate) io_factory: Arc<dyn MessageIoFactory<M>>,
    pub(crate) context_factory: ContextFactory<M::Context>,
    pub(crate) error_callback: ErrorCallback<M>,
    pub(crate) contextual_tasks: Vec<ContextualTask<M::Context>>,
    pub(crate) shutdown_callbacks: Vec<ConnectionCallback<M>>,
    pub(crate) recurring_task_factories: Vec<RecurringTaskFactory<M::Context>>,
    pub(crate) config: ConnectionConfig,
}

impl<M: Message> Clone for ConnectionSettings<M> {
    fn clone(&self) -> Self {
        Self {
            io_factory: Arc::clone(&self.io_factory),
            context_factory: Arc::clone(&self.context_factory),
            error_callback: Arc::clone(&self.error_callback),
            contextual_tasks: self.contextual_tasks.clone(),
            shutdown_callbacks: self.shutdown_callbacks.clone(),
            recurring_task_factories: self.recurring_task_factories.clone(),
            config: self.config.clone(),
        }
    }
}

/// Configures and builds [`Connection`]s.
pub struct ConnectionBuilder<M: Message> {
    io_factory: Option<Arc<dyn MessageIoFactory<M>>>,
    streams: Option<(BoxedRead, BoxedWrite)>,
    context_factory: Option<ContextFactory<M::Context>>,
    error_callback: Option<ErrorCallback<M>>,
    config: Option<ConnectionConfig>,
    contextual_tasks: Vec<ContextualTask<M::Context>>,
    shutdown_callbacks: Vec<ConnectionCallback<M>>,
    recurring_task_factories: Vec<RecurringTaskFactory<M::Context>>,
    /// Single-valued components set more than once.
    violations: Vec<String>,
}

fn set_once<T>(slot: &mut Option<T>, value: T, what: &str, violations: &mut Vec<String>) {
    if slot.is_some() {
        violations.push(format!("{what} set more than once"));
    } else {
        *slot = Some(value);
    }
}

impl<M: Message> ConnectionBuilder<M> {
    pub fn new() -> Self {
        Self {
            io_factory: None,
            streams: None,
            context_factory: None,
            error_callback: None,
            config: None,
            contextual_tasks: Vec::new(),
            shutdown_callbacks: Vec::new(),
            recurring_task_factories: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// Sets how streams are turned into message readers and writers.
    pub fn with_io_factory(mut self, factory: impl MessageIoFactory<M>) -> Self {
        let factory: Arc<dyn MessageIoFactory<M>> = Arc::new(factory);
        set_once(&mut self.io_factory, factory, "io factory", &mut self.violations);
        self
    }

    /// Uses the JSON envelope protocol with the given registry.
    pub fn with_message_registry(self, registry: MessageRegistry<M>) -> Self {
        self.with_io_factory(JsonMessageIoFactory::new(Arc::new(registry)))
    }

    /// Sets the streams for the next connection built.
    pub fn with_streams<R, W>(mut self, read: R, write: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let streams: (BoxedRead, BoxedWrite) = (Box::new(read), Box::new(write));
        set_once(&mut self.streams, streams, "streams", &mut self.violations);
        self
    }

    pub fn with_context_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> M::Context + Send + Sync + 'static,
    {
        let factory: ContextFactory<M::Context> = Arc::new(factory);
        set_once(&mut self.context_factory, factory, "context factory", &mut self.violations);
        self
    }

    /// Creates each context with `Default::default()`.
    pub fn with_default_context(self) -> Self
    where
        M::Context: Default,
    {
        self.with_context_factory(M::Context::default)
    }

    /// Sets the callback invoked once per error. Defaults to a no-op.
    pub fn with_error_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Connection<M>, &CourierError) + Send + Sync + 'static,
    {
        let callback: ErrorCallback<M> = Arc::new(callback);
        set_once(&mut self.error_callback, callback, "error callback", &mut self.violations);
        self
    }

    /// Error callback that stops the connection on any error.
    pub fn with_emergency_stop(self) -> Self {
        self.with_error_callback(|connection, _| connection.stop())
    }

    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        set_once(&mut self.config, config, "config", &mut self.violations);
        self
    }

    /// Adds a task run against the context after every executed message.
    pub fn with_contextual_task<F>(mut self, task: F) -> Self
    where
        F: Fn(&mut M::Context) + Send + Sync + 'static,
    {
        self.contextual_tasks.push(Arc::new(task));
        self
    }

    /// Adds a callback invoked once when a built connection stops.
    pub fn with_shutdown_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Connection<M>) + Send + Sync + 'static,
    {
        self.shutdown_callbacks.push(Arc::new(callback));
        self
    }

    /// Adds a factory whose task is scheduled on every built connection.
    pub fn with_recurring_task_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> RecurringTask<M::Context> + Send + Sync + 'static,
    {
        self.recurring_task_factories.push(Arc::new(factory));
        self
    }

    /// Validates the reusable part of the configuration.
    pub(crate) fn settings(&self) -> Result<ConnectionSettings<M>, CourierError> {
        if let Some(violation) = self.violations.first() {
            return Err(CourierError::Configuration(violation.clone()));
        }
        let io_factory = self
            .io_factory
            .clone()
            .ok_or_else(|| CourierError::Configuration("no io factory set".into()))?;
        let context_factory = self
            .context_factory
            .clone()
            .ok_or_else(|| CourierError::Configuration("no context factory set".into()))?;
        let error_callback: ErrorCallback<M> = match &self.error_callback {
            Some(callback) => Arc::clone(callback),
            None => Arc::new(|_: &Connection<M>, _: &CourierError| {}),
        };

        Ok(ConnectionSettings {
            io_factory,
            context_factory,
            error_callback,
            contextual_tasks: self.contextual_tasks.clone(),
            shutdown_callbacks: self.shutdown_callbacks.clone(),
            recurring_task_factories: self.recurring_task_factories.clone(),
            config: self.config.clone().unwrap_or_default(),
        })
    }

    /// Builds a connection over the streams set with
    /// [`with_streams`](Self::with_streams), consuming them.
    ///
    /// The connection is not started.
    ///
    /// # Errors
    /// [`CourierError::Configuration`] if the io factory, context factory
    /// or streams are missing, or a single-valued component was set twice.
    pub fn build(&mut self) -> Result<Connection<M>, CourierError> {
        let settings = self.settings()?;
        let (read, write) = self
            .streams
            .take()
            .ok_or_else(|| CourierError::Configuration("no streams set".into()))?;
        Ok(Connection::assemble(&settings, read, write))
    }

    /// Connects to `addr` over TCP and builds a connection on the socket.
    ///
    /// The connection is not started.
    pub async fn connect(&mut self, addr: impl ToSocketAddrs) -> Result<Connection<M>, CourierError> {
        if self.streams.is_some() {
            return Err(CourierError::Configuration(
                "streams already set; connect supplies its own".into(),
            ));
        }
        let settings = self.settings()?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(TransportError::ConnectFailed)?;
        if let Ok(peer) = stream.peer_addr() {
            tracing::debug!(%peer, "connected");
        }
        let (read, write) = stream.into_split();
        Ok(Connection::assemble(&settings, Box::new(read), Box::new(write)))
    }
}

impl<M: Message> Default for ConnectionBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Message> fmt::Debug for ConnectionBuilder<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("has_io_factory", &self.io_factory.is_some())
            .field("has_streams", &self.streams.is_some())
            .field("has_context_factory", &self.context_factory.is_some())
            .field("contextual_tasks", &self.contextual_tasks.len())
            .field("shutdown_callbacks", &self.shutdown_callbacks.len())
            .field("recurring_task_factories", &self.recurring_task_factories.len())
            .field("violations", &self.violations)
            .finish()
    }
}

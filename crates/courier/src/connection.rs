//! A single connection: four workers around a mailbox.
//!
//! ```text
//!            ┌────────────── Connection ───────────────┐
//!  stream ──→│ ReadWorker ──→ incoming                 │
//!            │                   │                     │
//!            │            ExecuteWorker (owns context) │
//!            │                   │                     │
//!  stream ←──│ WriteWorker ←── outgoing ←── send_message
//!            │                                         │
//!            │ ErrorWorker ←── errors ──→ error callback
//!            └─────────────────────────────────────────┘
//! ```
//!
//! Lifecycle is `Created → Started → Stopped`; `Stopped` is terminal.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use courier_protocol::Message;
use courier_tick::{RecurringTask, TaskHandle};
use courier_transport::{BoxedRead, BoxedWrite, ConnectionId, MessageReader, MessageWriter};
use tokio::task::AbortHandle;
use tracing::{info, warn};

use crate::builder::ConnectionSettings;
use crate::config::ConnectionConfig;
use crate::mailbox::Mailbox;
use crate::{CourierError, worker};

/// Called once per error recorded by a connection's workers.
pub type ErrorCallback<M> = Arc<dyn Fn(&Connection<M>, &CourierError) + Send + Sync>;

/// Called with a connection, e.g. when it stops.
pub type ConnectionCallback<M> = Arc<dyn Fn(&Connection<M>) + Send + Sync>;

/// Run against the context after every executed message.
pub type ContextualTask<C> = Arc<dyn Fn(&mut C) + Send + Sync>;

/// Creates the execution context for a new connection.
pub type ContextFactory<C> = Arc<dyn Fn() -> C + Send + Sync>;

const CREATED: u8 = 0;
const STARTED: u8 = 1;
const STOPPED: u8 = 2;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct Inner<M: Message> {
    pub(crate) id: ConnectionId,
    pub(crate) config: ConnectionConfig,
    pub(crate) mailbox: Mailbox<M>,
    /// Out of the slot while the read worker is mid-read.
    reader: Mutex<Option<Box<dyn MessageReader<M>>>>,
    /// Out of the slot while the write worker is mid-batch.
    writer: Mutex<Option<Box<dyn MessageWriter<M>>>>,
    /// Moved into the execute worker on start.
    context: Mutex<Option<M::Context>>,
    pub(crate) error_callback: ErrorCallback<M>,
    pub(crate) contextual_tasks: Vec<ContextualTask<M::Context>>,
    shutdown_callbacks: Vec<ConnectionCallback<M>>,
    state: AtomicU8,
    pub(crate) read_failed: AtomicBool,
    pub(crate) write_failed: AtomicBool,
    workers: Mutex<Vec<AbortHandle>>,
}

/// Handle to a connection. Clones refer to the same connection.
pub struct Connection<M: Message> {
    pub(crate) inner: Arc<Inner<M>>,
}

impl<M: Message> Clone for Connection<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Message> Connection<M> {
    /// Wires a new connection from builder settings and a stream pair.
    pub(crate) fn assemble(
        settings: &ConnectionSettings<M>,
        read: BoxedRead,
        write: BoxedWrite,
    ) -> Self {
        let mailbox = Mailbox::new();
        for factory in &settings.recurring_task_factories {
            mailbox.schedule(factory());
        }
        Self {
            inner: Arc::new(Inner {
                id: ConnectionId::random(),
                config: settings.config.clone().validated(),
                mailbox,
                reader: Mutex::new(Some(settings.io_factory.create_reader(read))),
                writer: Mutex::new(Some(settings.io_factory.create_writer(write))),
                context: Mutex::new(Some((settings.context_factory)())),
                error_callback: Arc::clone(&settings.error_callback),
                contextual_tasks: settings.contextual_tasks.clone(),
                shutdown_callbacks: settings.shutdown_callbacks.clone(),
                state: AtomicU8::new(CREATED),
                read_failed: AtomicBool::new(false),
                write_failed: AtomicBool::new(false),
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Spawns the error, read, write and execute workers.
    ///
    /// Must be called from within a tokio runtime. Calling it on a
    /// connection that was already started or stopped only logs a warning.
    pub fn start(&self) {
        if self
            .inner
            .state
            .compare_exchange(CREATED, STARTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(id = %self.id(), "start ignored: connection already started or stopped");
            return;
        }
        let Some(context) = lock(&self.inner.context).take() else {
            return;
        };

        let handles = worker::spawn_workers(self, context);
        let mut workers = lock(&self.inner.workers);
        workers.extend(handles);
        // A concurrent stop() may have run before the handles were stored.
        if self.is_stopped() {
            workers.drain(..).for_each(|h| h.abort());
            return;
        }
        drop(workers);
        info!(id = %self.id(), "connection started");
    }

    /// Stops the connection.
    ///
    /// Aborts every worker (an in-flight read or write included), closes
    /// the reader and writer, then invokes each shutdown callback once.
    /// A reader or writer held by an in-flight worker is closed when the
    /// runtime drops that worker, right after the abort.
    /// Later calls do nothing. Safe to call from an error callback.
    pub fn stop(&self) {
        if self.inner.state.swap(STOPPED, Ordering::AcqRel) == STOPPED {
            return;
        }
        lock(&self.inner.workers)
            .drain(..)
            .for_each(|h| h.abort());

        let reader = lock(&self.inner.reader).take();
        if let Some(reader) = reader {
            close_reader(self.id(), reader);
        }
        let writer = lock(&self.inner.writer).take();
        if let Some(writer) = writer {
            close_writer(self.id(), writer);
        }

        info!(id = %self.id(), "connection stopped");
        for callback in &self.inner.shutdown_callbacks {
            callback(self);
        }
    }

    /// Whether the workers are running.
    pub fn is_started(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == STARTED
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == STOPPED
    }

    /// Queues a message for the write worker. Never blocks.
    pub fn send_message(&self, message: M) {
        self.inner.mailbox.enqueue_outgoing(message);
    }

    /// Adds a recurring task, returning its control handle.
    pub fn schedule(&self, task: RecurringTask<M::Context>) -> TaskHandle {
        self.inner.mailbox.schedule(task)
    }

    /// Handles of the tasks that are not cancelled.
    pub fn recurring_tasks(&self) -> Vec<TaskHandle> {
        self.inner.mailbox.live_recurring_tasks()
    }

    pub(crate) fn take_reader(&self) -> Option<Box<dyn MessageReader<M>>> {
        lock(&self.inner.reader).take()
    }

    /// Puts the reader back, or closes it if the connection stopped while
    /// it was out.
    pub(crate) fn return_reader(&self, reader: Box<dyn MessageReader<M>>) {
        let mut slot = lock(&self.inner.reader);
        if self.is_stopped() {
            drop(slot);
            close_reader(self.id(), reader);
        } else {
            *slot = Some(reader);
        }
    }

    pub(crate) fn take_writer(&self) -> Option<Box<dyn MessageWriter<M>>> {
        lock(&self.inner.writer).take()
    }

    pub(crate) fn return_writer(&self, writer: Box<dyn MessageWriter<M>>) {
        let mut slot = lock(&self.inner.writer);
        if self.is_stopped() {
            drop(slot);
            close_writer(self.id(), writer);
        } else {
            *slot = Some(writer);
        }
    }
}

impl<M: Message> fmt::Debug for Connection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.state.load(Ordering::Acquire) {
            CREATED => "created",
            STARTED => "started",
            _ => "stopped",
        };
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

/// The reader, out of its slot for one read.
///
/// Dropped without [`give_back`](Self::give_back), as when `stop()` aborts
/// the worker mid-read, it closes the reader.
pub(crate) struct ReaderLease<'a, M: Message> {
    conn: &'a Connection<M>,
    reader: Option<Box<dyn MessageReader<M>>>,
}

impl<'a, M: Message> ReaderLease<'a, M> {
    pub(crate) fn take(conn: &'a Connection<M>) -> Option<Self> {
        let reader = conn.take_reader()?;
        Some(Self {
            conn,
            reader: Some(reader),
        })
    }

    pub(crate) fn reader(&mut self) -> Option<&mut (dyn MessageReader<M> + 'static)> {
        self.reader.as_deref_mut()
    }

    pub(crate) fn give_back(mut self) {
        if let Some(reader) = self.reader.take() {
            self.conn.return_reader(reader);
        }
    }
}

impl<M: Message> Drop for ReaderLease<'_, M> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            close_reader(self.conn.id(), reader);
        }
    }
}

/// The writer, out of its slot for one batch. Closes it on drop unless
/// given back.
pub(crate) struct WriterLease<'a, M: Message> {
    conn: &'a Connection<M>,
    writer: Option<Box<dyn MessageWriter<M>>>,
}

impl<'a, M: Message> WriterLease<'a, M> {
    pub(crate) fn take(conn: &'a Connection<M>) -> Option<Self> {
        let writer = conn.take_writer()?;
        Some(Self {
            conn,
            writer: Some(writer),
        })
    }

    pub(crate) fn writer(&mut self) -> Option<&mut (dyn MessageWriter<M> + 'static)> {
        self.writer.as_deref_mut()
    }

    pub(crate) fn give_back(mut self) {
        if let Some(writer) = self.writer.take() {
            self.conn.return_writer(writer);
        }
    }
}

impl<M: Message> Drop for WriterLease<'_, M> {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            close_writer(self.conn.id(), writer);
        }
    }
}

pub(crate) fn close_reader<M: 'static>(id: ConnectionId, mut reader: Box<dyn MessageReader<M>>) {
    if let Err(e) = reader.close() {
        warn!(%id, error = %e, "failed to close reader");
    }
}

pub(crate) fn close_writer<M: 'static>(id: ConnectionId, mut writer: Box<dyn MessageWriter<M>>) {
    if let Err(e) = writer.close() {
        warn!(%id, error = %e, "failed to close writer");
    }
}

//! The four per-connection workers.
//!
//! Each worker is a tokio task running a fixed-delay loop: one
//! invocation, then a sleep of the connection's cadence. Invocations of
//! the same worker never overlap; different workers run in parallel.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::Ordering;
use std::time::Duration;

use courier_protocol::Message;
use tokio::task::AbortHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, trace, warn};

use crate::connection::{Connection, ReaderLease, WriterLease};
use crate::CourierError;

/// Spawns the workers, error worker first, and returns their handles.
pub(crate) fn spawn_workers<M: Message>(
    conn: &Connection<M>,
    context: M::Context,
) -> Vec<AbortHandle> {
    let cadence = conn.inner.config.worker_cadence;
    vec![
        tokio::spawn(error_worker(conn.clone(), cadence)).abort_handle(),
        tokio::spawn(read_worker(conn.clone(), cadence)).abort_handle(),
        tokio::spawn(write_worker(conn.clone(), cadence)).abort_handle(),
        tokio::spawn(execute_worker(conn.clone(), context, cadence)).abort_handle(),
    ]
}

async fn error_worker<M: Message>(conn: Connection<M>, cadence: Duration) {
    loop {
        dispatch_errors(&conn);
        sleep(cadence).await;
    }
}

async fn read_worker<M: Message>(conn: Connection<M>, cadence: Duration) {
    loop {
        read_once(&conn).await;
        sleep(cadence).await;
    }
}

async fn write_worker<M: Message>(conn: Connection<M>, cadence: Duration) {
    loop {
        write_batch(&conn).await;
        sleep(cadence).await;
    }
}

async fn execute_worker<M: Message>(conn: Connection<M>, mut context: M::Context, cadence: Duration) {
    loop {
        execute_batch(&conn, &mut context);
        sleep(cadence).await;
    }
}

// ---------------------------------------------------------------------------
// ErrorWorker
// ---------------------------------------------------------------------------

pub(crate) fn dispatch_errors<M: Message>(conn: &Connection<M>) {
    for err in conn.inner.mailbox.drain_errors() {
        if err.is_end_of_stream() {
            warn!(id = %conn.id(), reason = %err, "connection closed by peer");
        } else {
            warn!(id = %conn.id(), error = %err, "connection error");
        }
        let callback = &conn.inner.error_callback;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(conn, &err))) {
            error!(
                id = %conn.id(),
                panic = %panic_message(&*payload),
                "error callback panicked"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// ReadWorker
// ---------------------------------------------------------------------------

/// Reads one message. After the first failure this worker never reads
/// again.
pub(crate) async fn read_once<M: Message>(conn: &Connection<M>) {
    if conn.inner.read_failed.load(Ordering::Acquire) {
        return;
    }
    let Some(mut lease) = ReaderLease::take(conn) else {
        return;
    };
    let Some(reader) = lease.reader() else {
        return;
    };

    match reader.read().await {
        Ok(message) => {
            trace!(id = %conn.id(), "message read");
            conn.inner.mailbox.enqueue_incoming(message);
            lease.give_back();
        }
        Err(e) => {
            conn.inner.read_failed.store(true, Ordering::Release);
            conn.inner.mailbox.record_error(e.into());
            // Dropping the lease closes the reader.
            drop(lease);
        }
    }
}

// ---------------------------------------------------------------------------
// WriteWorker
// ---------------------------------------------------------------------------

/// Writes everything queued since the last batch, in order.
///
/// The first failure closes the writer and abandons the rest of the
/// batch. Messages drained after that are discarded.
pub(crate) async fn write_batch<M: Message>(conn: &Connection<M>) {
    let batch = conn.inner.mailbox.drain_outgoing();
    if batch.is_empty() {
        return;
    }
    if conn.inner.write_failed.load(Ordering::Acquire) {
        debug!(id = %conn.id(), discarded = batch.len(), "writer closed; discarding outgoing messages");
        return;
    }
    let Some(mut lease) = WriterLease::take(conn) else {
        debug!(id = %conn.id(), discarded = batch.len(), "writer closed; discarding outgoing messages");
        return;
    };
    let Some(writer) = lease.writer() else {
        return;
    };

    let total = batch.len();
    for (sent, message) in batch.into_iter().enumerate() {
        if let Err(e) = writer.write(&message).await {
            conn.inner.write_failed.store(true, Ordering::Release);
            conn.inner.mailbox.record_error(e.into());
            debug!(id = %conn.id(), abandoned = total - sent - 1, "write failed; abandoning batch");
            // Dropping the lease closes the writer.
            drop(lease);
            return;
        }
    }
    trace!(id = %conn.id(), count = total, "batch written");
    lease.give_back();
}

// ---------------------------------------------------------------------------
// ExecuteWorker
// ---------------------------------------------------------------------------

/// Executes every pending message, then every due recurring task.
///
/// Panics are caught and recorded as [`CourierError::Execution`]; the
/// batch carries on with the next message.
pub(crate) fn execute_batch<M: Message>(conn: &Connection<M>, context: &mut M::Context) {
    let inner = &conn.inner;

    for message in inner.mailbox.drain_incoming() {
        match catch_unwind(AssertUnwindSafe(|| message.execute(context))) {
            Ok(Some(response)) => inner.mailbox.enqueue_outgoing(response),
            Ok(None) => {}
            Err(payload) => record_panic(conn, "message", &*payload),
        }
        for task in &inner.contextual_tasks {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task(context))) {
                record_panic(conn, "contextual task", &*payload);
            }
        }
    }

    let now = Instant::now();
    let mut tasks = inner.mailbox.take_live_recurring_tasks();
    for task in &mut tasks {
        if !task.should_execute(now) {
            continue;
        }
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.run(context))) {
            record_panic(conn, "recurring task", &*payload);
        }
        task.done(now);
    }
    inner.mailbox.restore_recurring_tasks(tasks);
}

fn record_panic<M: Message>(conn: &Connection<M>, what: &str, payload: &(dyn Any + Send)) {
    let message = format!("{what} panicked: {}", panic_message(payload));
    debug!(id = %conn.id(), %message, "caught panic during execution");
    conn.inner
        .mailbox
        .record_error(CourierError::Execution(message));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

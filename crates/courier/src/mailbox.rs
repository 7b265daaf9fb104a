//! The per-connection mailbox.
//!
//! Three ordered buffers, each behind its own lock, so the read, write,
//! execute and error workers never wait on each other's buffer:
//!
//! ```text
//! ReadWorker ──enqueue_incoming──→ [incoming] ──drain──→ ExecuteWorker
//! ExecuteWorker / send_message ──→ [outgoing] ──drain──→ WriteWorker
//! any worker ──record_error──────→ [errors]   ──drain──→ ErrorWorker
//! ```
//!
//! A drain returns everything added since the previous drain of that
//! buffer, in insertion order, and leaves the buffer empty.

use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};

use courier_protocol::Message;
use courier_tick::{RecurringTask, TaskHandle};

use crate::CourierError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Buffers shared by a connection's workers.
pub struct Mailbox<M: Message> {
    incoming: Mutex<Vec<M>>,
    outgoing: Mutex<Vec<M>>,
    errors: Mutex<Vec<CourierError>>,
    recurring: Mutex<Vec<RecurringTask<M::Context>>>,
    /// Handles of `recurring`, kept apart so listing still sees tasks the
    /// execute worker has taken out to run.
    handles: Mutex<Vec<TaskHandle>>,
}

impl<M: Message> Mailbox<M> {
    pub fn new() -> Self {
        Self {
            incoming: Mutex::new(Vec::new()),
            outgoing: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            recurring: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn enqueue_incoming(&self, message: M) {
        lock(&self.incoming).push(message);
    }

    pub fn drain_incoming(&self) -> Vec<M> {
        mem::take(&mut *lock(&self.incoming))
    }

    pub fn enqueue_outgoing(&self, message: M) {
        lock(&self.outgoing).push(message);
    }

    pub fn drain_outgoing(&self) -> Vec<M> {
        mem::take(&mut *lock(&self.outgoing))
    }

    pub fn record_error(&self, error: CourierError) {
        lock(&self.errors).push(error);
    }

    pub fn drain_errors(&self) -> Vec<CourierError> {
        mem::take(&mut *lock(&self.errors))
    }

    /// Adds a recurring task and returns its control handle.
    pub fn schedule(&self, task: RecurringTask<M::Context>) -> TaskHandle {
        let handle = task.handle();
        lock(&self.handles).push(handle.clone());
        lock(&self.recurring).push(task);
        handle
    }

    /// Handles of every task not yet cancelled, including tasks that are
    /// running right now. Cancelled tasks are dropped as a side effect.
    pub fn live_recurring_tasks(&self) -> Vec<TaskHandle> {
        lock(&self.recurring).retain(|t| !t.is_cancelled());
        let mut handles = lock(&self.handles);
        handles.retain(|h| !h.is_cancelled());
        handles.clone()
    }

    /// Removes the live tasks so they can run without the lock held.
    /// Must be paired with [`restore_recurring_tasks`](Self::restore_recurring_tasks).
    pub(crate) fn take_live_recurring_tasks(&self) -> Vec<RecurringTask<M::Context>> {
        let mut tasks = mem::take(&mut *lock(&self.recurring));
        tasks.retain(|t| !t.is_cancelled());
        tasks
    }

    /// Puts tasks back ahead of any scheduled while they were out.
    pub(crate) fn restore_recurring_tasks(&self, mut tasks: Vec<RecurringTask<M::Context>>) {
        let mut slot = lock(&self.recurring);
        tasks.append(&mut slot);
        *slot = tasks;
    }
}

impl<M: Message> Default for Mailbox<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use courier_protocol::{MessageType, ProtocolError, WireFields};
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        producer: usize,
        seq: usize,
    }

    impl MessageType for Item {
        const IDENTIFIER: &'static str = "Item";
    }

    impl Message for Item {
        type Context = Vec<usize>;

        fn execute(&self, _: &mut Vec<usize>) -> Option<Self> {
            None
        }

        fn to_wire(&self) -> Result<WireFields, ProtocolError> {
            WireFields::of(self)
        }
    }

    #[test]
    fn test_concurrent_enqueues_are_drained_exactly_once_in_order() {
        const PRODUCERS: usize = 8;
        const PER_PRODUCER: usize = 500;

        let mailbox = Arc::new(Mailbox::<Item>::new());
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let mailbox = Arc::clone(&mailbox);
                thread::spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        mailbox.enqueue_incoming(Item { producer, seq });
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let drained = mailbox.drain_incoming();
        assert_eq!(drained.len(), PRODUCERS * PER_PRODUCER);
        for producer in 0..PRODUCERS {
            let seqs: Vec<_> = drained
                .iter()
                .filter(|i| i.producer == producer)
                .map(|i| i.seq)
                .collect();
            assert_eq!(seqs, (0..PER_PRODUCER).collect::<Vec<_>>());
        }

        assert!(mailbox.drain_incoming().is_empty());
    }

    #[test]
    fn test_buffers_are_independent() {
        let mailbox = Mailbox::<Item>::new();
        mailbox.enqueue_incoming(Item { producer: 0, seq: 0 });
        mailbox.enqueue_outgoing(Item { producer: 1, seq: 0 });
        mailbox.record_error(CourierError::Execution("x".into()));

        // Holding one buffer's lock doesn't block the others.
        let _incoming = lock(&mailbox.incoming);
        assert_eq!(mailbox.drain_outgoing().len(), 1);
        assert_eq!(mailbox.drain_errors().len(), 1);
        assert!(mailbox.drain_outgoing().is_empty());
    }

    #[test]
    fn test_drain_only_returns_items_since_last_drain() {
        let mailbox = Mailbox::<Item>::new();
        mailbox.enqueue_outgoing(Item { producer: 0, seq: 1 });
        assert_eq!(mailbox.drain_outgoing().len(), 1);

        mailbox.enqueue_outgoing(Item { producer: 0, seq: 2 });
        mailbox.enqueue_outgoing(Item { producer: 0, seq: 3 });
        let seqs: Vec<_> = mailbox.drain_outgoing().into_iter().map(|i| i.seq).collect();
        assert_eq!(seqs, [2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_drops_cancelled_tasks() {
        let mailbox = Mailbox::<Item>::new();
        let keep = mailbox.schedule(RecurringTask::new(Duration::from_millis(5), |_, _| {}));
        let gone = mailbox.schedule(RecurringTask::new(Duration::from_millis(5), |_, _| {}));

        gone.cancel();
        let live = mailbox.live_recurring_tasks();
        assert_eq!(live.len(), 1);
        assert!(!live[0].is_cancelled());
        assert_eq!(lock(&mailbox.recurring).len(), 1);
        assert_eq!(lock(&mailbox.handles).len(), 1);
        keep.cancel();
        assert!(mailbox.live_recurring_tasks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_scheduled_while_taken_are_kept() {
        let mailbox = Mailbox::<Item>::new();
        mailbox.schedule(RecurringTask::new(Duration::from_millis(5), |_, _| {}));

        let taken = mailbox.take_live_recurring_tasks();
        assert_eq!(taken.len(), 1);
        mailbox.schedule(RecurringTask::new(Duration::from_millis(5), |_, _| {}));
        mailbox.restore_recurring_tasks(taken);

        assert_eq!(mailbox.live_recurring_tasks().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_tasks_are_still_listed() {
        let mailbox = Mailbox::<Item>::new();
        let handle = mailbox.schedule(RecurringTask::new(Duration::from_millis(5), |_, _| {}));

        let taken = mailbox.take_live_recurring_tasks();
        assert!(lock(&mailbox.recurring).is_empty());
        let live = mailbox.live_recurring_tasks();
        assert_eq!(live.len(), 1);

        live[0].pause();
        assert!(handle.is_paused());
        mailbox.restore_recurring_tasks(taken);
        assert_eq!(mailbox.live_recurring_tasks().len(), 1);
    }
}

//! Priority command queue
//!
//! Pending commands live in a binary heap ordered by `(priority desc,
//! sequence asc)`, so higher priorities always dequeue first and equal
//! priorities keep their enqueue order.
//!
//! The heap, the in-flight counter and the drain resolvers form one piece of
//! state behind a single mutex; every operation touches them in one critical
//! section and never awaits while holding it.
//!
//! ```text
//!  enqueue ──► [ heap ] ──next_ready──► running += 1 ──complete──► running -= 1
//!                 │                                                   │
//!             try_cancel                                    idle? ──► drain waiters
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::{futures::Notified, oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::{CommandId, CommandOutcome, CommandPayload, DomainEvent};
use crate::error::{CommandError, CommandResult};
use crate::event_bus::EventSender;

/// A command waiting in the queue
#[derive(Debug)]
pub(crate) struct QueuedItem {
    pub(crate) id: CommandId,
    pub(crate) payload: CommandPayload,
    pub(crate) priority: i32,
    pub(crate) sequence: u64,
    pub(crate) enqueued_at: Instant,
    pub(crate) sink: oneshot::Sender<CommandResult>,
}

impl PartialEq for QueuedItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedItem {}

impl PartialOrd for QueuedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower sequence (earlier) first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Handle to a queued command
///
/// Await it to get the command's result. Dropping the ticket does not cancel
/// the command.
#[derive(Debug)]
pub struct CommandTicket {
    id: CommandId,
    receiver: oneshot::Receiver<CommandResult>,
}

impl CommandTicket {
    pub fn id(&self) -> CommandId {
        self.id
    }
}

impl Future for CommandTicket {
    type Output = CommandResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(CommandError::Cancelled { id })))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<QueuedItem>,
    running: usize,
    next_sequence: u64,
    drain_waiters: Vec<oneshot::Sender<()>>,
    closed: bool,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.heap.is_empty() && self.running == 0
    }

    fn take_waiters_if_idle(&mut self) -> Vec<oneshot::Sender<()>> {
        if self.is_idle() {
            std::mem::take(&mut self.drain_waiters)
        } else {
            Vec::new()
        }
    }
}

/// Bounded priority queue of pending commands
pub struct PriorityCommandQueue {
    state: Mutex<QueueState>,
    max_size: usize,
    wakeup: Notify,
    events: EventSender,
}

impl PriorityCommandQueue {
    /// Create a queue holding at most `max_size` pending commands
    pub fn new(max_size: usize, events: EventSender) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_size: max_size.max(1),
            wakeup: Notify::new(),
            events,
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Pending (not yet started) commands
    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().heap.is_empty()
    }

    /// Commands currently executing
    pub fn running(&self) -> usize {
        self.state.lock().running
    }

    /// No pending and no running commands
    pub fn is_idle(&self) -> bool {
        self.state.lock().is_idle()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Add a command to the queue.
    ///
    /// Fails with [`CommandError::QueueFull`] when `max_size` commands are
    /// already pending; the rejected command is not buffered.
    pub fn enqueue(&self, payload: CommandPayload, priority: i32) -> Result<CommandTicket, CommandError> {
        let id = CommandId::new();
        let (sink, receiver) = oneshot::channel();
        let name = payload.name.clone();

        let queue_len = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(CommandError::Closed);
            }
            if state.heap.len() >= self.max_size {
                warn!(
                    command = %name,
                    capacity = self.max_size,
                    "[Queue] Rejected command, queue full"
                );
                return Err(CommandError::QueueFull {
                    capacity: self.max_size,
                });
            }

            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.heap.push(QueuedItem {
                id,
                payload,
                priority,
                sequence,
                enqueued_at: Instant::now(),
                sink,
            });
            state.heap.len()
        };

        debug!(command_id = %id, command = %name, priority, queue_len, "[Queue] Enqueued command");
        self.events.emit(DomainEvent::CommandQueued {
            command_id: id,
            name,
            priority,
            queue_len,
        });
        self.wakeup.notify_one();

        Ok(CommandTicket { id, receiver })
    }

    /// Remove a command that has not started yet.
    ///
    /// Its ticket settles with [`CommandError::Cancelled`]. Returns false if
    /// the command already started or is unknown.
    pub fn try_cancel(&self, id: CommandId) -> bool {
        let (item, waiters) = {
            let mut state = self.state.lock();
            if !state.heap.iter().any(|item| item.id == id) {
                return false;
            }

            let (mut removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.heap)
                .into_vec()
                .into_iter()
                .partition(|item| item.id == id);
            state.heap = BinaryHeap::from(kept);

            let waiters = state.take_waiters_if_idle();
            match removed.pop() {
                Some(item) => (item, waiters),
                None => return false,
            }
        };

        debug!(command_id = %id, "[Queue] Cancelled queued command");
        self.settle_cancelled(item);
        notify_waiters(waiters);
        true
    }

    /// Wait until nothing is pending and nothing is running.
    ///
    /// Resolves immediately when already idle. Waiters are released by the
    /// state transition into idle, not by polling.
    pub async fn drain(&self) {
        let receiver = {
            let mut state = self.state.lock();
            if state.is_idle() {
                return;
            }
            let (tx, rx) = oneshot::channel();
            state.drain_waiters.push(tx);
            rx
        };

        // A dropped sender also means there is nothing left to wait for.
        let _ = receiver.await;
    }

    /// Close the queue and cancel everything still pending.
    ///
    /// Returns the number of commands cancelled.
    pub fn close(&self) -> usize {
        let (items, waiters) = {
            let mut state = self.state.lock();
            state.closed = true;
            let items = std::mem::take(&mut state.heap).into_sorted_vec();
            let waiters = state.take_waiters_if_idle();
            (items, waiters)
        };

        let cancelled = items.len();
        // into_sorted_vec is ascending; settle in dequeue order.
        for item in items.into_iter().rev() {
            self.settle_cancelled(item);
        }
        notify_waiters(waiters);
        self.wakeup.notify_one();
        cancelled
    }

    /// Whether the dispatcher may start another command
    pub(crate) fn has_ready(&self, concurrency: usize) -> bool {
        let state = self.state.lock();
        state.running < concurrency && !state.heap.is_empty()
    }

    /// Pop the highest-priority command and count it as running
    pub(crate) fn next_ready(&self, concurrency: usize) -> Option<QueuedItem> {
        let mut state = self.state.lock();
        if state.running >= concurrency {
            return None;
        }
        let item = state.heap.pop()?;
        state.running += 1;
        Some(item)
    }

    /// Mark one running command as finished
    pub(crate) fn complete(&self) {
        let waiters = {
            let mut state = self.state.lock();
            state.running = state.running.saturating_sub(1);
            state.take_waiters_if_idle()
        };
        notify_waiters(waiters);
        self.wakeup.notify_one();
    }

    /// Future that resolves on the next enqueue/complete/close
    pub(crate) fn notified(&self) -> Notified<'_> {
        self.wakeup.notified()
    }

    fn settle_cancelled(&self, item: QueuedItem) {
        let QueuedItem {
            id,
            payload,
            enqueued_at,
            sink,
            ..
        } = item;

        self.events.emit(DomainEvent::CommandCompleted {
            command_id: id,
            name: payload.name,
            outcome: CommandOutcome::Cancelled,
            duration_ms: enqueued_at.elapsed().as_millis() as u64,
        });
        let _ = sink.send(Err(CommandError::Cancelled { id }));
    }
}

fn notify_waiters(waiters: Vec<oneshot::Sender<()>>) {
    for waiter in waiters {
        let _ = waiter.send(());
    }
}

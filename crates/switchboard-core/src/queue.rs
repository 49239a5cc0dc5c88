//! Bounded, disposable outbound mailbox.
//!
//! Producers never block: [`OutboundQueue::put`] fails fast with
//! [`QueueError::Full`] when the buffer is at capacity. The single consumer
//! (the session output loop) waits in [`OutboundQueue::get`] for an item,
//! the timeout, or disposal, whichever comes first.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{Instant, timeout_at};

use crate::errors::QueueError;
use crate::message::Message;

/// Fixed-capacity FIFO of outbound messages.
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

struct QueueState {
    items: VecDeque<Message>,
    disposed: bool,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` messages (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                disposed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Maximum number of buffered messages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// Enqueue without blocking.
    pub fn put(&self, message: Message) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock();
            if state.disposed {
                return Err(QueueError::Disposed);
            }
            if state.items.len() >= self.capacity {
                return Err(QueueError::Full);
            }
            state.items.push_back(message);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Dequeue without waiting. `Ok(None)` means the queue is empty.
    pub fn try_get(&self) -> Result<Option<Message>, QueueError> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(QueueError::Disposed);
        }
        Ok(state.items.pop_front())
    }

    /// Dequeue, waiting up to `timeout` for an item.
    pub async fn get(&self, timeout: Duration) -> Result<Message, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a put or dispose between the check
            // and the await still wakes us.
            let _ = notified.as_mut().enable();

            if let Some(message) = self.try_get()? {
                return Ok(message);
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Err(QueueError::Timeout);
            }
        }
    }

    /// Dispose the queue. Idempotent.
    ///
    /// Buffered messages are discarded, pending and future `get` calls return
    /// [`QueueError::Disposed`], and `put` is rejected from now on.
    pub fn dispose(&self) {
        {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.items.clear();
        }
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

impl std::fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("OutboundQueue")
            .field("len", &state.items.len())
            .field("capacity", &self.capacity)
            .field("disposed", &state.disposed)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

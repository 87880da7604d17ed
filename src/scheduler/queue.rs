use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use tokio::sync::Notify;
use uuid::Uuid;

/// FIFO queue of ready job ids shared between the scheduler and the worker
/// pool. Duplicate enqueues are no-ops; `dequeue` parks idle workers until
/// an id arrives or the queue is closed.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct Inner {
    order: VecDeque<Uuid>,
    queued: HashSet<Uuid>,
    closed: bool,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a ready job id. Returns false if the id was already queued or
    /// the queue is closed.
    pub fn enqueue(&self, id: Uuid) -> bool {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            if inner.closed || !inner.queued.insert(id) {
                return false;
            }
            inner.order.push_back(id);
        }
        // One wakeup per item; the permit is stored if no worker is parked.
        self.notify.notify_one();
        true
    }

    /// Take the oldest ready id, waiting if none is available.
    /// Returns `None` once the queue is closed; ids still queued at close
    /// stay in the store for restart recovery and are not handed out.
    pub async fn dequeue(&self) -> Option<Uuid> {
        loop {
            // Register for a wakeup before checking, so an enqueue between
            // the check and the await cannot be lost.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                if inner.closed {
                    return None;
                }
                if let Some(id) = inner.order.pop_front() {
                    inner.queued.remove(&id);
                    return Some(id);
                }
            }
            notified.await;
        }
    }

    /// Remove a specific id (cancellation of a queued job). Returns whether
    /// it was present.
    pub fn remove(&self, id: &Uuid) -> bool {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.queued.remove(id) {
            inner.order.retain(|queued| queued != id);
            true
        } else {
            false
        }
    }

    /// Close the queue: pending and future `dequeue` calls return `None`.
    /// Ids already handed out are unaffected.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            inner.closed = true;
        }
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("queue lock poisoned").closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

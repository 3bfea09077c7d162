/*!
A thread-safe FIFO shared between the threads of one worker manager.

Every manager owns four of these: a low- and a high-priority input queue fed
by the supervisor's data listeners, and a low- and a high-priority result
queue drained by the result publisher. Producers never block (unless a
bounded overflow policy says so); consumers block on a condition variable
until the queue is non-empty or it has been stopped.

Stopping is one-way: [`WorkQueue::notify_all`] wakes every waiter and latches
a permanent `stopped` flag. After that, [`WorkQueue::front`] and
[`WorkQueue::get`] fail with [`QueueStopped`] and [`WorkQueue::pop`] returns
silently, which lets worker threads fall out of their loops without treating
shutdown as an error.
*/

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use thiserror::Error;

/// The queue was stopped while (or before) a consumer was waiting on it.
///
/// This is the expected way for blocked consumers to learn about shutdown;
/// it is not reported to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue stopped")]
pub struct QueueStopped;

/// Which lane of a manager an item travelled through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    High,
}

impl Priority {
    pub fn as_index(self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::High => 1,
        }
    }
}

/// What `push` does once a configured bound is reached.
///
/// The pipeline runs unbounded by default (the upstream frontend gates the
/// rate), but the bound is a configuration point so deployments can cap
/// memory. Discarded items are counted and show up in monitoring snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Never drop; `push` always succeeds. The default.
    Unbounded,
    /// Discard the oldest queued item to make room for the new one.
    DropOldest(usize),
    /// Discard the incoming item.
    DropNewest(usize),
    /// Block the producer until a consumer makes room.
    Block(usize),
}

struct Inner<T> {
    items: VecDeque<T>,
    stopped: bool,
    high_water: usize,
    dropped: u64,
}

pub struct WorkQueue<T> {
    inner: Mutex<Inner<T>>,
    condvar: Condvar,
    policy: OverflowPolicy,
}

/// The item type every queue in the pipeline actually carries.
pub type ByteQueue = WorkQueue<Vec<u8>>;

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        WorkQueue::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> WorkQueue<T> {
        WorkQueue::with_policy(OverflowPolicy::Unbounded)
    }

    pub fn with_policy(policy: OverflowPolicy) -> WorkQueue<T> {
        WorkQueue {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                stopped: false,
                high_water: 0,
                dropped: 0,
            }),
            condvar: Condvar::new(),
            policy,
        }
    }

    /// Append an item and wake one waiter.
    ///
    /// Never blocks under the default policy. Items pushed after the queue
    /// has been stopped are discarded (and counted), so a producer racing
    /// with shutdown either hands the item to a consumer or loses it whole,
    /// never half-way.
    pub fn push(&self, item: T) {
        let mut inner = self.inner.lock().unwrap();
        if inner.stopped {
            inner.dropped += 1;
            return;
        }
        match self.policy {
            OverflowPolicy::Unbounded => {}
            OverflowPolicy::DropOldest(cap) => {
                if inner.items.len() >= cap {
                    inner.items.pop_front();
                    inner.dropped += 1;
                }
            }
            OverflowPolicy::DropNewest(cap) => {
                if inner.items.len() >= cap {
                    inner.dropped += 1;
                    return;
                }
            }
            OverflowPolicy::Block(cap) => {
                while inner.items.len() >= cap && !inner.stopped {
                    inner = self.condvar.wait(inner).unwrap();
                }
                if inner.stopped {
                    inner.dropped += 1;
                    return;
                }
            }
        }
        inner.items.push_back(item);
        if inner.items.len() > inner.high_water {
            inner.high_water = inner.items.len();
        }
        self.condvar.notify_all();
    }

    /// Block until an item is available, then dequeue and return it.
    pub fn get(&self) -> Result<T, QueueStopped> {
        let mut inner = self.inner.lock().unwrap();
        while inner.items.is_empty() && !inner.stopped {
            inner = self.condvar.wait(inner).unwrap();
        }
        if inner.stopped {
            return Err(QueueStopped);
        }
        let item = inner.items.pop_front().unwrap();
        self.condvar.notify_all();
        Ok(item)
    }

    /// Dequeue without waiting. `None` means empty or stopped.
    pub fn try_get(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        if inner.stopped {
            return None;
        }
        let item = inner.items.pop_front();
        if item.is_some() {
            self.condvar.notify_all();
        }
        item
    }

    /// Block until an item is available, then discard it.
    ///
    /// Unlike [`WorkQueue::get`] this does not report the stop: a consumer
    /// that was only discarding has nothing left to do either way.
    pub fn pop(&self) {
        let mut inner = self.inner.lock().unwrap();
        while inner.items.is_empty() && !inner.stopped {
            inner = self.condvar.wait(inner).unwrap();
        }
        if inner.stopped {
            return;
        }
        inner.items.pop_front();
        self.condvar.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().items.is_empty()
    }

    /// The largest queue depth seen since construction.
    pub fn high_water_mark(&self) -> usize {
        self.inner.lock().unwrap().high_water
    }

    /// How many items were discarded by the overflow policy or by pushes
    /// that arrived after the stop.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().unwrap().dropped
    }

    /// Remove every queued item. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let n = inner.items.len();
        inner.items.clear();
        self.condvar.notify_all();
        n
    }

    /// Stop the queue: wake every blocked consumer and refuse further waits.
    ///
    /// The flag is permanent. This is the shutdown path; there is no
    /// "restart" because a manager that stopped its queues is about to join
    /// its threads and be dropped.
    pub fn notify_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stopped = true;
        self.condvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().unwrap().stopped
    }
}

impl<T: Clone> WorkQueue<T> {
    /// Block until an item is available, then return a copy of the oldest
    /// one without dequeuing it.
    pub fn front(&self) -> Result<T, QueueStopped> {
        let mut inner = self.inner.lock().unwrap();
        while inner.items.is_empty() && !inner.stopped {
            inner = self.condvar.wait(inner).unwrap();
        }
        if inner.stopped {
            return Err(QueueStopped);
        }
        Ok(inner.items.front().unwrap().clone())
    }
}

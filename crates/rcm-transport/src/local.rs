use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{Message, MessageTransport, QueueId};

/// In-process message transport.
///
/// Queues live in a shared registry keyed by name. Each queue has its own
/// lock and condition variable, so traffic on one queue never contends with
/// another.
pub struct LocalTransport {
    registry: Mutex<Registry>,
    next_seq: AtomicU64,
    allocated: AtomicU64,
    delivered: AtomicU64,
    freed: AtomicU64,
}

/// Message accounting counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Messages handed out by `alloc`.
    pub allocated: u64,
    /// Messages accepted by `put`.
    pub delivered: u64,
    /// Messages released by `free`, failed `put`, or queue deletion.
    pub freed: u64,
}

#[derive(Default)]
struct Registry {
    next_id: u32,
    by_name: HashMap<String, QueueId>,
    queues: HashMap<QueueId, Arc<Queue>>,
}

struct Queue {
    name: String,
    state: Mutex<QueueState>,
    ready: Condvar,
}

#[derive(Default)]
struct QueueState {
    messages: VecDeque<Message>,
    unblocked: bool,
    deleted: bool,
}

impl LocalTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            next_seq: AtomicU64::new(1),
            allocated: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            freed: AtomicU64::new(0),
        }
    }

    /// Snapshot of the message counters.
    pub fn stats(&self) -> TransportStats {
        TransportStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
        }
    }

    /// Number of messages waiting on a queue.
    pub fn pending(&self, queue: QueueId) -> Result<usize> {
        let queue = self.lookup(queue)?;
        let state = queue.state.lock();
        Ok(state.messages.len())
    }

    fn lookup(&self, queue: QueueId) -> Result<Arc<Queue>> {
        self.registry
            .lock()
            .queues
            .get(&queue)
            .cloned()
            .ok_or(TransportError::UnknownQueue(queue))
    }

    fn release(&self, msg: Message) {
        self.freed.fetch_add(1, Ordering::Relaxed);
        drop(msg);
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageTransport for LocalTransport {
    fn create_queue(&self, name: &str) -> Result<QueueId> {
        let mut registry = self.registry.lock();
        if registry.by_name.contains_key(name) {
            return Err(TransportError::QueueExists(name.to_string()));
        }

        registry.next_id = registry.next_id.wrapping_add(1);
        let id = QueueId::from_raw(registry.next_id);
        registry.by_name.insert(name.to_string(), id);
        registry.queues.insert(
            id,
            Arc::new(Queue {
                name: name.to_string(),
                state: Mutex::new(QueueState::default()),
                ready: Condvar::new(),
            }),
        );

        info!(queue = %id, name, "created message queue");
        Ok(id)
    }

    fn open_queue(&self, name: &str) -> Result<QueueId> {
        self.registry
            .lock()
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| TransportError::QueueNotFound(name.to_string()))
    }

    fn delete_queue(&self, queue: QueueId) -> Result<()> {
        let removed = {
            let mut registry = self.registry.lock();
            let removed = registry
                .queues
                .remove(&queue)
                .ok_or(TransportError::UnknownQueue(queue))?;
            registry.by_name.remove(&removed.name);
            removed
        };

        let leftovers: Vec<Message> = {
            let mut state = removed.state.lock();
            state.deleted = true;
            state.messages.drain(..).collect()
        };
        removed.ready.notify_all();

        if !leftovers.is_empty() {
            debug!(queue = %queue, count = leftovers.len(), "freeing messages of deleted queue");
        }
        for msg in leftovers {
            self.release(msg);
        }

        info!(queue = %queue, name = %removed.name, "deleted message queue");
        Ok(())
    }

    fn alloc(&self, capacity: usize) -> Message {
        self.allocated.fetch_add(1, Ordering::Relaxed);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        Message::new(seq, capacity)
    }

    fn put(&self, queue: QueueId, msg: Message) -> Result<()> {
        let target = match self.lookup(queue) {
            Ok(target) => target,
            Err(err) => {
                self.release(msg);
                return Err(err);
            }
        };

        {
            let mut state = target.state.lock();
            if state.deleted {
                drop(state);
                self.release(msg);
                return Err(TransportError::UnknownQueue(queue));
            }
            state.messages.push_back(msg);
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        target.ready.notify_one();
        Ok(())
    }

    fn get(&self, queue: QueueId, timeout: Option<Duration>) -> Result<Message> {
        let source = self.lookup(queue)?;
        let deadline = timeout.map(|timeout| (timeout, Instant::now() + timeout));

        let mut state = source.state.lock();
        loop {
            if state.deleted {
                return Err(TransportError::UnknownQueue(queue));
            }
            // Unblock wins over queued messages so shutdown is never starved.
            if state.unblocked {
                state.unblocked = false;
                return Err(TransportError::Unblocked);
            }
            if let Some(msg) = state.messages.pop_front() {
                return Ok(msg);
            }

            match deadline {
                None => source.ready.wait(&mut state),
                Some((timeout, deadline)) => {
                    if Instant::now() >= deadline {
                        return Err(TransportError::Timeout(timeout));
                    }
                    source.ready.wait_until(&mut state, deadline);
                }
            }
        }
    }

    fn unblock(&self, queue: QueueId) -> Result<()> {
        let target = self.lookup(queue)?;
        target.state.lock().unblocked = true;
        target.ready.notify_all();
        debug!(queue = %queue, "unblocked queue");
        Ok(())
    }

    fn free(&self, msg: Message) {
        self.release(msg);
    }
}

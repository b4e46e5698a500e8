use std::fmt;
use std::time::Duration;

use bytes::BytesMut;

use crate::error::Result;

/// Handle to a transport queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(u32);

impl QueueId {
    /// Wrap a raw queue number.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw queue number.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// A message buffer owned by the transport.
///
/// The body is opaque to the transport; upper layers encode their own
/// packet into it. Every message carries the queue its reply should go to.
#[derive(Debug)]
pub struct Message {
    seq: u64,
    reply_queue: Option<QueueId>,
    body: BytesMut,
}

impl Message {
    pub(crate) fn new(seq: u64, capacity: usize) -> Self {
        Self {
            seq,
            reply_queue: None,
            body: BytesMut::with_capacity(capacity),
        }
    }

    /// Transport-assigned sequence number, unique per transport.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Queue the receiver should reply to.
    pub fn reply_queue(&self) -> Option<QueueId> {
        self.reply_queue
    }

    /// Set the queue replies should be routed to.
    pub fn set_reply_queue(&mut self, queue: QueueId) {
        self.reply_queue = Some(queue);
    }

    /// Message body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Mutable message body.
    pub fn body_mut(&mut self) -> &mut BytesMut {
        &mut self.body
    }
}

/// Point-to-point message queue transport.
///
/// `put` gives at-least-once local delivery; there is no ordering guarantee
/// across different destination queues. `get` blocks until a message
/// arrives, the timeout elapses, or the queue is unblocked.
pub trait MessageTransport: Send + Sync {
    /// Create a named queue owned by the caller.
    fn create_queue(&self, name: &str) -> Result<QueueId>;

    /// Look up an existing queue by name.
    fn open_queue(&self, name: &str) -> Result<QueueId>;

    /// Delete a queue. Messages still queued are freed.
    fn delete_queue(&self, queue: QueueId) -> Result<()>;

    /// Allocate a message with room for `capacity` body bytes.
    fn alloc(&self, capacity: usize) -> Message;

    /// Deliver a message to a queue.
    ///
    /// On failure the message is freed by the transport.
    fn put(&self, queue: QueueId, msg: Message) -> Result<()>;

    /// Receive the next message. `None` waits forever.
    ///
    /// Returns `TransportError::Unblocked` when `unblock` was called on the
    /// queue, and `TransportError::Timeout` when the timeout elapses.
    fn get(&self, queue: QueueId, timeout: Option<Duration>) -> Result<Message>;

    /// Release one pending (or the next) `get` on the queue.
    fn unblock(&self, queue: QueueId) -> Result<()>;

    /// Release a message without replying.
    fn free(&self, msg: Message);
}

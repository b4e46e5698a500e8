//! Blocking client for an RCM server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use rcm_packet::{
    decode_packet, encode_packet, MessageKind, Packet, Status, DEFAULT_MAX_PAYLOAD,
};
use rcm_transport::{MessageTransport, QueueId, TransportError};
use tracing::debug;

use crate::error::{RcmError, Result};

/// Sends packets to a server queue and collects the replies on a private
/// reply queue.
///
/// Replies are matched to requests by message id. A reply that arrives
/// while another request is being waited on is kept until asked for. A
/// client may be shared between threads: one caller at a time reads the
/// reply queue and the others pick their replies up from the stash.
pub struct RcmClient {
    transport: Arc<dyn MessageTransport>,
    server: QueueId,
    reply: QueueId,
    next_msg_id: AtomicU16,
    stashed: Mutex<HashMap<u16, Packet>>,
    /// Held while reading the reply queue.
    receiving: Mutex<()>,
    reply_timeout: Option<Duration>,
    max_payload: usize,
}

impl RcmClient {
    /// Open the server's queue and create a reply queue named `client_name`.
    pub fn connect(
        transport: Arc<dyn MessageTransport>,
        server_name: &str,
        client_name: &str,
    ) -> Result<Self> {
        let server = transport.open_queue(server_name)?;
        let reply = transport.create_queue(client_name)?;
        debug!(server = server_name, client = client_name, reply = %reply, "client connected");

        Ok(Self {
            transport,
            server,
            reply,
            next_msg_id: AtomicU16::new(1),
            stashed: Mutex::new(HashMap::new()),
            receiving: Mutex::new(()),
            reply_timeout: None,
            max_payload: DEFAULT_MAX_PAYLOAD,
        })
    }

    /// Bound every reply wait. Without one, waits block indefinitely.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(timeout);
        self
    }

    /// Accept reply payloads up to `max` bytes.
    pub fn with_max_payload(mut self, max: usize) -> Self {
        self.max_payload = max;
        self
    }

    pub fn reply_queue(&self) -> QueueId {
        self.reply
    }

    /// Send a packet without waiting. Returns the message id assigned to it.
    pub fn send(&self, mut packet: Packet) -> Result<u16> {
        let msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
        packet.msg_id = msg_id;
        packet.status = Status::Unprocessed;

        let mut msg = self.transport.alloc(packet.wire_size());
        msg.set_reply_queue(self.reply);
        if let Err(err) = encode_packet(&packet, msg.body_mut()) {
            self.transport.free(msg);
            return Err(err.into());
        }
        self.transport.put(self.server, msg)?;
        Ok(msg_id)
    }

    /// Receive the next reply, whichever request it answers.
    pub fn recv(&self) -> Result<Packet> {
        self.recv_timeout(self.reply_timeout)
    }

    /// Like [`RcmClient::recv`] with an explicit bound on the wait.
    pub fn recv_timeout(&self, timeout: Option<Duration>) -> Result<Packet> {
        if let Some(packet) = self.take_any_stashed() {
            return Ok(packet);
        }
        let started = Instant::now();
        let Some(_receiving) = self.lock_receive(timeout) else {
            return Err(timed_out(timeout));
        };
        // Another caller may have stashed a reply while we waited.
        if let Some(packet) = self.take_any_stashed() {
            return Ok(packet);
        }
        let remaining = timeout.map(|timeout| timeout.saturating_sub(started.elapsed()));
        self.recv_raw(remaining)
    }

    /// Wait for the reply to message `msg_id`.
    pub fn wait_for(&self, msg_id: u16) -> Result<Packet> {
        let deadline = self.reply_timeout.map(|timeout| (timeout, Instant::now() + timeout));
        loop {
            if let Some(packet) = self.stashed.lock().remove(&msg_id) {
                return Ok(packet);
            }

            let remaining = match deadline {
                Some((timeout, at)) => match at.checked_duration_since(Instant::now()) {
                    Some(remaining) => Some(remaining),
                    None => return Err(TransportError::Timeout(timeout).into()),
                },
                None => None,
            };

            let Some(receiving) = self.lock_receive(remaining) else {
                continue;
            };
            if let Some(packet) = self.stashed.lock().remove(&msg_id) {
                return Ok(packet);
            }
            let packet = self.recv_raw(remaining)?;
            if packet.msg_id == msg_id {
                return Ok(packet);
            }
            self.stashed.lock().insert(packet.msg_id, packet);
            // Let a caller waiting for that reply in before reading again.
            MutexGuard::unlock_fair(receiving);
        }
    }

    /// Send a packet and wait for its reply.
    pub fn exec(&self, packet: Packet) -> Result<Packet> {
        let msg_id = self.send(packet)?;
        self.wait_for(msg_id)
    }

    /// Resolve a symbol name to its function index.
    pub fn symbol_index(&self, name: &str) -> Result<u32> {
        let request = Packet::new(MessageKind::SymLookup).with_payload(name.as_bytes());
        let reply = self.exec(request)?;
        match reply.status {
            Status::Success => Ok(reply.fxn_index),
            Status::SymbolNotFound => Err(RcmError::SymbolNotFound(name.to_string())),
            status => Err(RcmError::RequestFailed(status)),
        }
    }

    /// Lease a job id for an ordered message stream.
    pub fn acquire_job_id(&self) -> Result<u16> {
        let reply = self.exec(Packet::new(MessageKind::JobAcquire))?;
        match reply.status {
            Status::Success => Ok(reply.job_id),
            status => Err(RcmError::RequestFailed(status)),
        }
    }

    /// Return a leased job id. Messages still queued for the job come back
    /// with status `Unprocessed`.
    pub fn release_job_id(&self, job_id: u16) -> Result<()> {
        let reply = self.exec(Packet::new(MessageKind::JobRelease).with_job(job_id))?;
        match reply.status {
            Status::Success => Ok(()),
            Status::JobIdNotFound => Err(RcmError::JobIdNotFound(job_id)),
            status => Err(RcmError::RequestFailed(status)),
        }
    }

    fn lock_receive(&self, timeout: Option<Duration>) -> Option<MutexGuard<'_, ()>> {
        match timeout {
            Some(timeout) => self.receiving.try_lock_for(timeout),
            None => Some(self.receiving.lock()),
        }
    }

    fn take_any_stashed(&self) -> Option<Packet> {
        let mut stashed = self.stashed.lock();
        let next = stashed.keys().next().copied();
        next.and_then(|id| stashed.remove(&id))
    }

    fn recv_raw(&self, timeout: Option<Duration>) -> Result<Packet> {
        let msg = self.transport.get(self.reply, timeout)?;
        let decoded = decode_packet(msg.body(), self.max_payload);
        self.transport.free(msg);
        Ok(decoded?)
    }
}

fn timed_out(timeout: Option<Duration>) -> RcmError {
    TransportError::Timeout(timeout.unwrap_or_default()).into()
}

impl Drop for RcmClient {
    fn drop(&mut self) {
        if let Err(err) = self.transport.delete_queue(self.reply) {
            debug!(reply = %self.reply, error = %err, "reply queue already gone");
        }
    }
}

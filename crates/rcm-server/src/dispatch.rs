//! Dispatcher thread and message execution.
//!
//! The dispatcher receives every inbound message, answers administrative
//! requests itself, and routes function calls to a pool (or runs them
//! in-line when the target pool has no threads). Execution code here is
//! shared by the dispatcher and the worker threads.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use rcm_packet::{
    decode_packet, encode_packet, is_static_pool, MessageKind, Packet, Status, STATIC_POOL_FLAG,
};
use rcm_transport::{Message, MessageTransport, QueueId, TransportError};
use tracing::{debug, error, info, warn};

use crate::error::{RcmError, Result};
use crate::job::{Admission, JobRegistry, JobTicket};
use crate::pool::WorkerPool;
use crate::sem::Semaphore;
use crate::symbol::SymbolTable;

/// A received message together with its decoded packet.
pub(crate) struct Envelope {
    pub(crate) msg: Message,
    pub(crate) packet: Packet,
    /// Set once the message is released from its job stream.
    ticket: Option<JobTicket>,
}

impl Envelope {
    fn new(msg: Message, packet: Packet) -> Self {
        Self {
            msg,
            packet,
            ticket: None,
        }
    }
}

/// State shared by the dispatcher and every worker thread.
pub(crate) struct Core {
    pub(crate) name: String,
    pub(crate) transport: Arc<dyn MessageTransport>,
    pub(crate) queue: QueueId,
    pub(crate) symbols: SymbolTable,
    /// `pools[0]` is the default pool; `pools[i]` has id `0x8000 | i`.
    pub(crate) pools: Vec<Arc<WorkerPool>>,
    pub(crate) jobs: JobRegistry<Envelope>,
    pub(crate) max_payload: usize,
    pub(crate) shutdown: AtomicBool,
    /// Posted by `start` (or teardown) to let the dispatcher run.
    pub(crate) run_gate: Semaphore,
}

impl Core {
    /// Resolve a pool id. Only static pools exist.
    pub(crate) fn pool(&self, pool_id: u16) -> Result<&Arc<WorkerPool>> {
        if !is_static_pool(pool_id) {
            return Err(RcmError::PoolNotFound(pool_id));
        }
        self.pools
            .get((pool_id & !STATIC_POOL_FLAG) as usize)
            .ok_or(RcmError::PoolNotFound(pool_id))
    }

    /// Write `status` into the packet and send the message back to its
    /// sender.
    pub(crate) fn reply(&self, env: Envelope, status: Status) {
        let Envelope {
            mut msg,
            mut packet,
            ..
        } = env;
        packet.status = status;

        let body = msg.body_mut();
        body.clear();
        if let Err(err) = encode_packet(&packet, body) {
            warn!(server = %self.name, msg_id = packet.msg_id, error = %err, "reply encode failed");
            packet.status = Status::Error;
            packet.payload.clear();
            body.clear();
            encode_or_warn(&self.name, &packet, body);
        }

        send_back(self.transport.as_ref(), &self.name, msg);
    }

    /// Return messages that will never run.
    pub(crate) fn reply_unprocessed(&self, envs: Vec<Envelope>) {
        for env in envs {
            debug!(
                server = %self.name,
                msg_id = env.packet.msg_id,
                job_id = env.packet.job_id,
                "returning unprocessed message"
            );
            self.reply(env, Status::Unprocessed);
        }
    }

    /// Return every message still waiting in the inbound queue.
    pub(crate) fn drain_inbound(&self) {
        loop {
            match self.transport.get(self.queue, Some(Duration::ZERO)) {
                Ok(msg) => match decode_packet(msg.body(), self.max_payload) {
                    Ok(packet) => self.reply(Envelope::new(msg, packet), Status::Unprocessed),
                    Err(_) => reject_undecodable(self, msg),
                },
                Err(TransportError::Unblocked) => continue,
                Err(_) => break,
            }
        }
    }
}

/// Dispatcher thread body.
pub(crate) fn run_dispatcher(core: Arc<Core>) {
    core.run_gate.wait();
    if !core.shutdown.load(Ordering::Acquire) {
        info!(server = %core.name, queue = %core.queue, "dispatcher running");
    }

    while !core.shutdown.load(Ordering::Acquire) {
        match core.transport.get(core.queue, None) {
            Ok(msg) => handle_inbound(&core, msg),
            Err(TransportError::Unblocked) => {
                debug!(server = %core.name, "dispatcher unblocked");
            }
            Err(err) => {
                error!(server = %core.name, error = %err, "dispatcher receive failed");
                break;
            }
        }
    }

    debug!(server = %core.name, "dispatcher exiting");
}

fn handle_inbound(core: &Core, msg: Message) {
    let packet = match decode_packet(msg.body(), core.max_payload) {
        Ok(packet) => packet,
        Err(err) => {
            warn!(server = %core.name, seq = msg.seq(), error = %err, "undecodable message");
            reject_undecodable(core, msg);
            return;
        }
    };

    debug!(
        server = %core.name,
        kind = %packet.kind,
        msg_id = packet.msg_id,
        pool_id = packet.pool_id,
        job_id = packet.job_id,
        "received message"
    );

    let mut env = Envelope::new(msg, packet);
    let status = match env.packet.kind {
        MessageKind::Exec | MessageKind::Cmd => {
            route(core, env);
            return;
        }
        MessageKind::SymLookup => lookup_symbol(core, &mut env.packet),
        MessageKind::JobAcquire => match core.jobs.acquire() {
            Ok(job_id) => {
                env.packet.job_id = job_id;
                Status::Success
            }
            Err(err) => {
                warn!(server = %core.name, error = %err, "job id acquire failed");
                Status::Error
            }
        },
        MessageKind::JobRelease => match core.jobs.release(env.packet.job_id) {
            Ok(unprocessed) => {
                core.reply_unprocessed(unprocessed);
                Status::Success
            }
            Err(_) => Status::JobIdNotFound,
        },
        MessageKind::SymAdd => {
            debug!(server = %core.name, "remote symbol registration is not supported");
            Status::InvalidMessageType
        }
    };
    core.reply(env, status);
}

fn lookup_symbol(core: &Core, packet: &mut Packet) -> Status {
    let Ok(name) = std::str::from_utf8(&packet.payload) else {
        return Status::SymbolNotFound;
    };
    match core.symbols.lookup(name) {
        Ok(index) => {
            packet.fxn_index = index;
            Status::Success
        }
        Err(_) => Status::SymbolNotFound,
    }
}

fn route(core: &Core, env: Envelope) {
    let pool = match core.pool(env.packet.pool_id) {
        Ok(pool) => pool,
        Err(_) => {
            debug!(server = %core.name, pool_id = env.packet.pool_id, "pool not found");
            core.reply(env, Status::PoolNotFound);
            return;
        }
    };

    if !env.packet.in_job() {
        schedule(core, pool, env);
        return;
    }

    let job_id = env.packet.job_id;
    match core.jobs.admit(job_id, env) {
        Admission::Ready(mut env, ticket) => {
            env.ticket = Some(ticket);
            schedule(core, pool, env);
        }
        Admission::Queued => {
            debug!(server = %core.name, job_id, "queued behind in-flight job message");
        }
        Admission::UnknownJob(env) => core.reply(env, Status::JobIdNotFound),
    }
}

/// Hand a ready message to its pool, or run it on the current thread when
/// the pool has no workers.
fn schedule(core: &Core, pool: &WorkerPool, env: Envelope) {
    if pool.is_inline() {
        run_to_completion(core, env);
    } else {
        pool.enqueue(env);
    }
}

/// Execute a message, then release the next message of its job.
pub(crate) fn run_to_completion(core: &Core, env: Envelope) {
    let ticket = env.ticket;
    execute(core, env);
    if let Some(ticket) = ticket {
        advance_job(core, ticket);
    }
}

fn advance_job(core: &Core, ticket: JobTicket) {
    while let Some(mut next) = core.jobs.advance(ticket) {
        next.ticket = Some(ticket);
        match core.pool(next.packet.pool_id) {
            Ok(pool) if pool.is_inline() => execute(core, next),
            Ok(pool) => {
                pool.enqueue(next);
                return;
            }
            Err(_) => core.reply(next, Status::PoolNotFound),
        }
    }
}

/// Invoke the packet's function and reply (or free a successful `Cmd`).
fn execute(core: &Core, mut env: Envelope) {
    let fxn_index = env.packet.fxn_index;
    let status = match core.symbols.resolve(fxn_index) {
        Err(_) => Status::InvalidFunction,
        Ok(fxn) => {
            let payload = &mut env.packet.payload;
            match panic::catch_unwind(AssertUnwindSafe(|| fxn(payload))) {
                Ok(rv) => {
                    env.packet.result = rv;
                    if rv < 0 {
                        Status::MessageFunctionError
                    } else {
                        Status::Success
                    }
                }
                Err(_) => {
                    warn!(
                        server = %core.name,
                        fxn_index = format_args!("{fxn_index:#010x}"),
                        "function panicked"
                    );
                    Status::Error
                }
            }
        }
    };

    debug!(
        server = %core.name,
        msg_id = env.packet.msg_id,
        fxn_index = format_args!("{fxn_index:#010x}"),
        status = %status,
        "executed message"
    );

    if env.packet.kind == MessageKind::Cmd && status.is_success() {
        core.transport.free(env.msg);
        return;
    }
    core.reply(env, status);
}

/// Answer a body that is not a valid packet with a bare `Error` packet.
fn reject_undecodable(core: &Core, mut msg: Message) {
    let mut packet = Packet::new(MessageKind::Exec);
    packet.status = Status::Error;
    if let Some(raw) = msg.body().get(4..6) {
        packet.msg_id = u16::from_le_bytes([raw[0], raw[1]]);
    }

    let body = msg.body_mut();
    body.clear();
    encode_or_warn(&core.name, &packet, body);
    send_back(core.transport.as_ref(), &core.name, msg);
}

/// Encode a header-only packet. Failure leaves the body empty.
fn encode_or_warn(server: &str, packet: &Packet, body: &mut BytesMut) {
    if let Err(err) = encode_packet(packet, body) {
        warn!(server, msg_id = packet.msg_id, error = %err, "packet encode failed");
        body.clear();
    }
}

fn send_back(transport: &dyn MessageTransport, server: &str, msg: Message) {
    match msg.reply_queue() {
        Some(queue) => {
            if let Err(err) = transport.put(queue, msg) {
                warn!(server, queue = %queue, error = %err, "reply undeliverable");
            }
        }
        None => {
            warn!(server, seq = msg.seq(), "message has no reply queue; freeing");
            transport.free(msg);
        }
    }
}

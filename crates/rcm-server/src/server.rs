use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::BytesMut;
use rcm_packet::STATIC_POOL_FLAG;
use rcm_transport::{MessageTransport, QueueId};
use tracing::{debug, info, warn};

use crate::config::ServerParams;
use crate::dispatch::{self, Core};
use crate::error::{RcmError, Result};
use crate::job::JobRegistry;
use crate::pool::{Worker, WorkerPool};
use crate::sem::Semaphore;
use crate::symbol::SymbolTable;

/// Server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Threads exist but the dispatcher has not started receiving.
    Created,
    Running,
    Terminated,
}

/// An RCM server instance.
///
/// Owns an inbound queue on the transport, a dispatcher thread and the
/// worker threads of every pool. Dropping the server tears it down the same
/// way [`RcmServer::delete`] does.
pub struct RcmServer {
    core: Arc<Core>,
    state: ServerState,
    dispatcher: Option<JoinHandle<()>>,
    workers: Vec<Worker>,
}

impl RcmServer {
    /// Create a server listening on a new queue called `name`.
    ///
    /// Worker threads start immediately; the dispatcher waits for
    /// [`RcmServer::start`].
    pub fn create(
        transport: Arc<dyn MessageTransport>,
        name: &str,
        params: ServerParams,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(RcmError::InvalidArgument(
                "server name must not be empty".to_string(),
            ));
        }
        params.validate()?;

        let ServerParams {
            default_pool,
            worker_pools,
            max_payload_size,
            fxns,
        } = params;

        let symbols = SymbolTable::new(fxns)?;
        let pools: Vec<Arc<WorkerPool>> = std::iter::once(default_pool)
            .chain(worker_pools)
            .enumerate()
            .map(|(index, pool)| Arc::new(WorkerPool::new(STATIC_POOL_FLAG | index as u16, pool)))
            .collect();

        let queue = transport.create_queue(name)?;
        let core = Arc::new(Core {
            name: name.to_string(),
            transport,
            queue,
            symbols,
            pools,
            jobs: JobRegistry::new(),
            max_payload: max_payload_size,
            shutdown: Default::default(),
            run_gate: Semaphore::new(0),
        });

        // From here on, an early return drops `server`, which unwinds
        // whatever has been started.
        let mut server = Self {
            core: core.clone(),
            state: ServerState::Created,
            dispatcher: None,
            workers: Vec::new(),
        };

        for pool in &core.pools {
            for ordinal in 0..pool.thread_count() {
                let worker = Worker::spawn(core.clone(), pool.clone(), ordinal)?;
                server.workers.push(worker);
            }
        }

        let thread_name = format!("rcm-{name}-dispatch");
        let dispatcher_core = core.clone();
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || dispatch::run_dispatcher(dispatcher_core))
            .map_err(|source| RcmError::ThreadSpawn {
                name: thread_name,
                source,
            })?;
        server.dispatcher = Some(handle);

        info!(
            server = name,
            queue = %queue,
            pools = core.pools.len(),
            workers = server.workers.len(),
            "server created"
        );
        Ok(server)
    }

    /// Let the dispatcher begin receiving messages.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ServerState::Created {
            return Err(RcmError::InvalidState("server already started"));
        }
        self.core.run_gate.post();
        self.state = ServerState::Running;
        Ok(())
    }

    /// Stop all threads, return pending messages as unprocessed, and delete
    /// the inbound queue.
    pub fn delete(mut self) -> Result<()> {
        self.teardown()
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// The inbound queue clients send to.
    pub fn queue(&self) -> QueueId {
        self.core.queue
    }

    /// Register a function in the dynamic symbol table.
    pub fn add_symbol<F>(&self, name: &str, fxn: F) -> Result<u32>
    where
        F: Fn(&mut BytesMut) -> i32 + Send + Sync + 'static,
    {
        self.core.symbols.add(name, Arc::new(fxn))
    }

    /// Remove a dynamic symbol. Messages already holding its index fail
    /// with `InvalidFunction`.
    pub fn remove_symbol(&self, name: &str) -> Result<()> {
        self.core.symbols.remove(name)
    }

    pub fn symbol_index(&self, name: &str) -> Result<u32> {
        self.core.symbols.lookup(name)
    }

    /// Static symbols and their indices, in table order.
    pub fn static_symbols(&self) -> Vec<(String, u32)> {
        self.core.symbols.static_symbols()
    }

    /// Pool id for a pool name, including the default pool.
    pub fn pool_id(&self, name: &str) -> Option<u16> {
        self.core
            .pools
            .iter()
            .find(|pool| pool.name() == name)
            .map(|pool| pool.id())
    }

    /// Number of job ids currently leased.
    pub fn leased_jobs(&self) -> usize {
        self.core.jobs.len()
    }

    fn teardown(&mut self) -> Result<()> {
        if self.state == ServerState::Terminated {
            return Ok(());
        }
        let core = self.core.clone();
        debug!(server = %core.name, "tearing down");

        core.shutdown.store(true, Ordering::Release);
        core.run_gate.post();
        if let Err(err) = core.transport.unblock(core.queue) {
            warn!(server = %core.name, error = %err, "could not unblock dispatcher");
        }
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                warn!(server = %core.name, "dispatcher thread panicked");
            }
        }

        core.drain_inbound();
        core.reply_unprocessed(core.jobs.drain_all());
        for pool in &core.pools {
            core.reply_unprocessed(pool.drain());
        }

        for worker in &self.workers {
            worker.request_terminate();
        }
        for pool in &core.pools {
            pool.wake_all();
        }
        for worker in self.workers.drain(..) {
            worker.join();
        }

        // Job messages released by workers that were mid-execution above.
        core.reply_unprocessed(core.jobs.drain_all());
        for pool in &core.pools {
            core.reply_unprocessed(pool.drain());
        }

        self.state = ServerState::Terminated;
        core.transport.delete_queue(core.queue)?;
        info!(server = %core.name, "server deleted");
        Ok(())
    }
}

impl Drop for RcmServer {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            warn!(server = %self.core.name, error = %err, "teardown failed");
        }
    }
}

impl std::fmt::Debug for RcmServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RcmServer")
            .field("name", &self.core.name)
            .field("queue", &self.core.queue)
            .field("state", &self.state)
            .field("workers", &self.workers.len())
            .finish()
    }
}

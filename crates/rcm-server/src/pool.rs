//! Worker pools and worker threads.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::PoolParams;
use crate::dispatch::{self, Core, Envelope};
use crate::error::{RcmError, Result};
use crate::sem::Semaphore;

/// A named group of worker threads sharing one ready queue.
pub(crate) struct WorkerPool {
    id: u16,
    params: PoolParams,
    /// One post per enqueued message, plus one per worker at shutdown.
    sem: Semaphore,
    ready: Mutex<VecDeque<Envelope>>,
}

impl WorkerPool {
    pub(crate) fn new(id: u16, params: PoolParams) -> Self {
        Self {
            id,
            params,
            sem: Semaphore::new(0),
            ready: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn id(&self) -> u16 {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.params.name
    }

    pub(crate) fn thread_count(&self) -> usize {
        self.params.count
    }

    /// A pool without threads runs work on the thread that schedules it.
    pub(crate) fn is_inline(&self) -> bool {
        self.params.count == 0
    }

    pub(crate) fn enqueue(&self, env: Envelope) {
        self.ready.lock().push_back(env);
        self.sem.post();
    }

    fn fetch(&self) -> Option<Envelope> {
        self.ready.lock().pop_front()
    }

    /// Remove every message still waiting for a worker.
    pub(crate) fn drain(&self) -> Vec<Envelope> {
        self.ready.lock().drain(..).collect()
    }

    /// Wake every worker so it can observe its terminate flag.
    pub(crate) fn wake_all(&self) {
        self.sem.post_n(self.params.count);
    }
}

/// Handle to one worker thread.
pub(crate) struct Worker {
    name: String,
    terminate: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Worker {
    pub(crate) fn spawn(core: Arc<Core>, pool: Arc<WorkerPool>, ordinal: usize) -> Result<Self> {
        let name = format!("rcm-{}-{}-{ordinal}", core.name, pool.name());
        let terminate = Arc::new(AtomicBool::new(false));

        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(stack_size) = pool.params.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let flag = terminate.clone();
        let handle = builder
            .spawn(move || worker_loop(&core, &pool, &flag))
            .map_err(|source| RcmError::ThreadSpawn {
                name: name.clone(),
                source,
            })?;

        debug!(worker = %name, "spawned worker");
        Ok(Self {
            name,
            terminate,
            handle,
        })
    }

    pub(crate) fn request_terminate(&self) {
        self.terminate.store(true, Ordering::Release);
    }

    pub(crate) fn join(self) {
        if self.handle.join().is_err() {
            warn!(worker = %self.name, "worker thread panicked");
        }
    }
}

fn worker_loop(core: &Core, pool: &WorkerPool, terminate: &AtomicBool) {
    if let Some(nice) = pool.params.priority {
        if let Err(err) = set_thread_priority(nice) {
            warn!(
                pool = pool.name(),
                nice,
                error = %err,
                "could not set worker priority"
            );
        }
    }

    loop {
        pool.sem.wait();
        if terminate.load(Ordering::Acquire) {
            break;
        }
        // A post can outlive its message when teardown drained the queue.
        let Some(env) = pool.fetch() else {
            continue;
        };
        dispatch::run_to_completion(core, env);
    }

    debug!(pool = pool.name(), pool_id = pool.id(), "worker exiting");
}

/// Apply a nice value to the calling thread.
#[cfg(target_os = "linux")]
fn set_thread_priority(nice: i32) -> std::io::Result<()> {
    // SAFETY: gettid has no preconditions.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::id_t;
    // SAFETY: on Linux PRIO_PROCESS with a thread id affects only that thread.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, nice) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
fn set_thread_priority(_nice: i32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "per-thread priority is only supported on Linux",
    ))
}

use std::collections::HashSet;

use rcm_packet::DEFAULT_MAX_PAYLOAD;
use serde::{Deserialize, Serialize};

use crate::error::{RcmError, Result};
use crate::symbol::{FxnDesc, MAX_STATIC_SYMBOLS};

/// Name of the pool used when a message does not name a worker pool.
pub const DEFAULT_POOL_NAME: &str = "default";

/// Largest number of configured worker pools (pool ids are 15-bit).
pub const MAX_WORKER_POOLS: usize = 0x7FFE;

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolParams {
    /// Pool name, unique within a server.
    pub name: String,
    /// Number of worker threads. Only the default pool may have zero.
    pub count: usize,
    /// Nice value applied to each worker thread (Unix). `None` inherits.
    pub priority: Option<i32>,
    /// Worker thread stack size in bytes. `None` uses the platform default.
    pub stack_size: Option<usize>,
}

impl PoolParams {
    /// A pool with `count` threads and inherited priority and stack size.
    pub fn new(name: impl Into<String>, count: usize) -> Self {
        Self {
            name: name.into(),
            count,
            ..Self::default()
        }
    }
}

impl Default for PoolParams {
    fn default() -> Self {
        Self {
            name: DEFAULT_POOL_NAME.to_string(),
            count: 0,
            priority: None,
            stack_size: None,
        }
    }
}

/// Server creation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerParams {
    /// The default pool. With zero threads, default-pool work runs on the
    /// dispatcher thread.
    pub default_pool: PoolParams,
    /// Additional worker pools, addressed by `pool_id(name)`.
    pub worker_pools: Vec<PoolParams>,
    /// Largest payload accepted in an inbound packet.
    pub max_payload_size: usize,
    /// Static symbol table, fixed for the lifetime of the server.
    #[serde(skip)]
    pub fxns: Vec<FxnDesc>,
}

impl Default for ServerParams {
    fn default() -> Self {
        Self {
            default_pool: PoolParams::default(),
            worker_pools: Vec::new(),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            fxns: Vec::new(),
        }
    }
}

impl ServerParams {
    /// Add a worker pool.
    pub fn with_pool(mut self, pool: PoolParams) -> Self {
        self.worker_pools.push(pool);
        self
    }

    /// Add a static symbol.
    pub fn with_fxn(mut self, fxn: FxnDesc) -> Self {
        self.fxns.push(fxn);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.worker_pools.len() > MAX_WORKER_POOLS {
            return Err(RcmError::InvalidArgument(format!(
                "too many worker pools ({}, max {MAX_WORKER_POOLS})",
                self.worker_pools.len()
            )));
        }
        if self.fxns.len() > MAX_STATIC_SYMBOLS {
            return Err(RcmError::InvalidArgument(format!(
                "too many static symbols ({}, max {MAX_STATIC_SYMBOLS})",
                self.fxns.len()
            )));
        }
        if self.max_payload_size == 0 {
            return Err(RcmError::InvalidArgument(
                "max_payload_size must be non-zero".to_string(),
            ));
        }

        let mut names = HashSet::new();
        names.insert(self.default_pool.name.as_str());
        for pool in &self.worker_pools {
            if pool.name.is_empty() {
                return Err(RcmError::InvalidArgument(
                    "worker pool name must not be empty".to_string(),
                ));
            }
            if pool.count == 0 {
                return Err(RcmError::InvalidArgument(format!(
                    "worker pool '{}' needs at least one thread",
                    pool.name
                )));
            }
            if !names.insert(pool.name.as_str()) {
                return Err(RcmError::InvalidArgument(format!(
                    "duplicate pool name '{}'",
                    pool.name
                )));
            }
        }
        Ok(())
    }
}

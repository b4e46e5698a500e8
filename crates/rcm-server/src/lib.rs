//! Remote Command Message server.
//!
//! A server owns an inbound message queue and executes named functions on
//! behalf of its clients:
//! - a symbol table maps names to function indices (static and dynamic)
//! - worker pools run function calls on dedicated threads
//! - job ids group messages into ordered streams
//! - a dispatcher thread routes every inbound message
//!
//! [`RcmClient`] is the matching blocking client.

pub mod client;
pub mod config;
mod dispatch;
pub mod error;
mod job;
mod pool;
mod sem;
pub mod server;
pub mod symbol;

pub use client::RcmClient;
pub use config::{PoolParams, ServerParams, DEFAULT_POOL_NAME, MAX_WORKER_POOLS};
pub use error::{RcmError, Result};
pub use server::{RcmServer, ServerState};
pub use symbol::{is_static_index, FxnDesc, MsgFn, SymbolTable, MAX_DYNAMIC_TABLES, MAX_STATIC_SYMBOLS};

//! Message-queue transport for the RCM server.
//!
//! The server only needs a small contract from its transport:
//! - named point-to-point queues with blocking receive
//! - an `unblock` primitive that releases a pending receive
//! - per-message reply routing and explicit free
//!
//! [`MessageTransport`] captures that contract; [`LocalTransport`] is the
//! in-process implementation used by the server, the client and the tests.

pub mod error;
pub mod local;
pub mod traits;

pub use error::{Result, TransportError};
pub use local::{LocalTransport, TransportStats};
pub use traits::{Message, MessageTransport, QueueId};

//! Remote Command Message server.
//!
//! An RCM server lets clients invoke named functions on pools of worker
//! threads over a message-queue transport, with per-job ordering.
//!
//! # Crate Structure
//!
//! - [`transport`]: Message-queue transport contract and in-process queues
//! - [`packet`]: Packet header layout, message kinds and reply statuses
//! - [`server`]: Symbol table, worker pools, job streams, dispatcher, client

/// Re-export transport types.
pub mod transport {
    pub use rcm_transport::*;
}

/// Re-export packet types.
pub mod packet {
    pub use rcm_packet::*;
}

/// Re-export server types.
pub mod server {
    pub use rcm_server::*;
}

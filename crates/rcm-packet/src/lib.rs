//! RCM packet layout.
//!
//! Every RCM message body carries one packet:
//! - a fixed 24-byte little-endian header (kind, status, routing ids,
//!   function index, result)
//! - the function payload
//!
//! The transport never looks inside; the server decodes on receipt and
//! re-encodes before replying.

pub mod codec;
pub mod desc;
pub mod error;

pub use codec::{decode_packet, encode_packet, Packet, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use desc::{
    is_static_pool, MessageKind, Status, DEFAULT_POOL_ID, DISCRETE_JOB_ID, STATIC_POOL_FLAG,
};
pub use error::{PacketError, Result};

use bytes::{Buf, BufMut, BytesMut};

use crate::desc::{MessageKind, Status, DEFAULT_POOL_ID, DISCRETE_JOB_ID};
use crate::error::{PacketError, Result};

/// Packet header size in bytes.
pub const HEADER_SIZE: usize = 24;

/// Magic bytes: "RC" (0x52 0x43).
pub const MAGIC: [u8; 2] = [0x52, 0x43];

/// Default maximum payload size: 64 KiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024;

/// One RCM request or reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: MessageKind,
    pub status: Status,
    /// Client-chosen id used to match replies to requests.
    pub msg_id: u16,
    pub pool_id: u16,
    pub job_id: u16,
    pub fxn_index: u32,
    /// Return code of the invoked function.
    pub result: i32,
    pub payload: BytesMut,
}

impl Packet {
    /// Create an unprocessed packet for the default pool, outside any job.
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            status: Status::Unprocessed,
            msg_id: 0,
            pool_id: DEFAULT_POOL_ID,
            job_id: DISCRETE_JOB_ID,
            fxn_index: 0,
            result: 0,
            payload: BytesMut::new(),
        }
    }

    /// An `Exec` packet for a function index.
    pub fn exec(fxn_index: u32) -> Self {
        Self {
            fxn_index,
            ..Self::new(MessageKind::Exec)
        }
    }

    /// A `Cmd` packet for a function index.
    pub fn cmd(fxn_index: u32) -> Self {
        Self {
            fxn_index,
            ..Self::new(MessageKind::Cmd)
        }
    }

    pub fn with_pool(mut self, pool_id: u16) -> Self {
        self.pool_id = pool_id;
        self
    }

    pub fn with_job(mut self, job_id: u16) -> Self {
        self.job_id = job_id;
        self
    }

    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        self.payload.clear();
        self.payload.extend_from_slice(payload);
        self
    }

    /// True when the packet belongs to a job stream.
    pub fn in_job(&self) -> bool {
        self.job_id != DISCRETE_JOB_ID
    }

    /// The encoded size of this packet (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a packet into a message body.
///
/// Wire format (little endian):
/// ```text
/// ┌───────────┬──────┬────────┬────────┬─────────┬────────┬──────────┐
/// │ Magic (2) │ Kind │ Status │ Msg id │ Pool id │ Job id │ Rsvd (2) │
/// │ "RC"      │ (1)  │ (1)    │ (2)    │ (2)     │ (2)    │          │
/// ├───────────┴──────┴──┬─────┴────────┴───┬─────┴────────┴──────────┤
/// │ Fxn index (4)       │ Result (4, i32)  │ Payload len (4)         │
/// ├─────────────────────┴──────────────────┴─────────────────────────┤
/// │ Payload (len bytes)                                               │
/// └───────────────────────────────────────────────────────────────────┘
/// ```
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut) -> Result<()> {
    if packet.payload.len() > u32::MAX as usize {
        return Err(PacketError::PayloadTooLarge {
            size: packet.payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(packet.wire_size());
    dst.put_slice(&MAGIC);
    dst.put_u8(packet.kind as u8);
    dst.put_u8(packet.status as u8);
    dst.put_u16_le(packet.msg_id);
    dst.put_u16_le(packet.pool_id);
    dst.put_u16_le(packet.job_id);
    dst.put_u16_le(0);
    dst.put_u32_le(packet.fxn_index);
    dst.put_i32_le(packet.result);
    dst.put_u32_le(packet.payload.len() as u32);
    dst.put_slice(&packet.payload);
    Ok(())
}

/// Decode a packet from a complete message body.
pub fn decode_packet(mut src: &[u8], max_payload: usize) -> Result<Packet> {
    if src.len() < HEADER_SIZE {
        return Err(PacketError::Truncated {
            expected: HEADER_SIZE,
            actual: src.len(),
        });
    }
    if src[0..2] != MAGIC {
        return Err(PacketError::InvalidMagic);
    }
    let total = src.len();
    src.advance(2);

    let kind_raw = src.get_u8();
    let kind = MessageKind::from_u8(kind_raw).ok_or(PacketError::UnknownKind(kind_raw))?;
    let status_raw = src.get_u8();
    let status = Status::from_u8(status_raw).ok_or(PacketError::UnknownStatus(status_raw))?;
    let msg_id = src.get_u16_le();
    let pool_id = src.get_u16_le();
    let job_id = src.get_u16_le();
    let _reserved = src.get_u16_le();
    let fxn_index = src.get_u32_le();
    let result = src.get_i32_le();
    let payload_len = src.get_u32_le() as usize;

    if payload_len > max_payload {
        return Err(PacketError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }
    if src.len() < payload_len {
        return Err(PacketError::Truncated {
            expected: HEADER_SIZE + payload_len,
            actual: total,
        });
    }

    Ok(Packet {
        kind,
        status,
        msg_id,
        pool_id,
        job_id,
        fxn_index,
        result,
        payload: BytesMut::from(&src[..payload_len]),
    })
}

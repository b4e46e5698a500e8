/// Errors that can occur during packet encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    /// The packet header contains an invalid magic number.
    #[error("invalid packet magic (expected 0x5243 \"RC\")")]
    InvalidMagic,

    /// The message kind byte is not a known kind.
    #[error("unknown message kind {0}")]
    UnknownKind(u8),

    /// The status byte is not a known status code.
    #[error("unknown status code {0}")]
    UnknownStatus(u8),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The body ended before the header or the declared payload.
    #[error("truncated packet ({actual} bytes, need {expected})")]
    Truncated { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, PacketError>;

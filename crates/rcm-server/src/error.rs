use rcm_packet::Status;

/// Errors returned by the server's administrative API and the client.
///
/// Failures that happen while routing or executing a message are not
/// returned here; they travel back to the sender as a packet [`Status`].
#[derive(Debug, thiserror::Error)]
pub enum RcmError {
    /// Caller input was empty, out of range, or otherwise unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The server is not in a state that allows the operation.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// A worker or dispatcher thread could not be started.
    #[error("failed to spawn thread {name}: {source}")]
    ThreadSpawn {
        name: String,
        source: std::io::Error,
    },

    /// Every dynamic symbol table is allocated and full.
    #[error("symbol table full")]
    SymbolTableFull,

    #[error("symbol '{0}' not found")]
    SymbolNotFound(String),

    /// Static symbols cannot be removed.
    #[error("symbol '{0}' is static")]
    SymbolIsStatic(String),

    /// The function index is malformed or refers to a removed symbol.
    #[error("invalid function index {0:#010x}")]
    InvalidFunctionIndex(u32),

    #[error("pool {0:#06x} not found")]
    PoolNotFound(u16),

    #[error("job id {0} not found")]
    JobIdNotFound(u16),

    /// All 65535 job ids are leased.
    #[error("job id space exhausted")]
    JobIdsExhausted,

    /// The server answered a request with a non-success status.
    #[error("request failed with status {0}")]
    RequestFailed(Status),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] rcm_transport::TransportError),

    /// Packet-level error.
    #[error("packet error: {0}")]
    Packet(#[from] rcm_packet::PacketError),
}

pub type Result<T> = std::result::Result<T, RcmError>;

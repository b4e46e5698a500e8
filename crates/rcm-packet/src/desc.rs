//! Message kinds, status codes and reserved routing ids.
//!
//! Pool ids with bit 15 set name static pools created with the server.
//! Ids with bit 15 clear are reserved for dynamic pools, which servers do
//! not create.

use std::fmt;

/// Bit marking a pool id as a static (creation-time) pool.
pub const STATIC_POOL_FLAG: u16 = 0x8000;

/// The default pool, used when a message does not name a worker pool.
pub const DEFAULT_POOL_ID: u16 = STATIC_POOL_FLAG;

/// Job id of discrete work, which belongs to no job stream.
pub const DISCRETE_JOB_ID: u16 = 0;

/// What a packet asks the server to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Invoke a function and always reply.
    Exec = 0,
    /// Invoke a function; reply only on failure.
    Cmd = 1,
    /// Register a symbol remotely.
    SymAdd = 2,
    /// Resolve a symbol name to its function index.
    SymLookup = 3,
    /// Lease a new job id.
    JobAcquire = 4,
    /// Release a leased job id.
    JobRelease = 5,
}

impl MessageKind {
    /// Decode a kind byte.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Exec),
            1 => Some(Self::Cmd),
            2 => Some(Self::SymAdd),
            3 => Some(Self::SymLookup),
            4 => Some(Self::JobAcquire),
            5 => Some(Self::JobRelease),
            _ => None,
        }
    }

    /// Human-readable kind name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Exec => "EXEC",
            Self::Cmd => "CMD",
            Self::SymAdd => "SYM_ADD",
            Self::SymLookup => "SYM_LOOKUP",
            Self::JobAcquire => "JOB_ACQUIRE",
            Self::JobRelease => "JOB_RELEASE",
        }
    }

    /// True for kinds that invoke a function through a worker pool.
    pub fn invokes_function(self) -> bool {
        matches!(self, Self::Exec | Self::Cmd)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome the server writes into a packet before replying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// Not processed; set on new packets and on work drained at shutdown
    /// or job release.
    Unprocessed = 0,
    Success = 1,
    /// The function index is malformed or stale.
    InvalidFunction = 2,
    SymbolNotFound = 3,
    InvalidMessageType = 4,
    /// The function ran and returned a failure code.
    MessageFunctionError = 5,
    Error = 6,
    PoolNotFound = 7,
    JobIdNotFound = 8,
}

impl Status {
    /// Decode a status byte.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Unprocessed),
            1 => Some(Self::Success),
            2 => Some(Self::InvalidFunction),
            3 => Some(Self::SymbolNotFound),
            4 => Some(Self::InvalidMessageType),
            5 => Some(Self::MessageFunctionError),
            6 => Some(Self::Error),
            7 => Some(Self::PoolNotFound),
            8 => Some(Self::JobIdNotFound),
            _ => None,
        }
    }

    /// Human-readable status name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Unprocessed => "UNPROCESSED",
            Self::Success => "SUCCESS",
            Self::InvalidFunction => "INVALID_FUNCTION",
            Self::SymbolNotFound => "SYMBOL_NOT_FOUND",
            Self::InvalidMessageType => "INVALID_MESSAGE_TYPE",
            Self::MessageFunctionError => "MESSAGE_FUNCTION_ERROR",
            Self::Error => "ERROR",
            Self::PoolNotFound => "POOL_NOT_FOUND",
            Self::JobIdNotFound => "JOB_ID_NOT_FOUND",
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns true if the pool id names a static pool.
pub fn is_static_pool(pool_id: u16) -> bool {
    pool_id & STATIC_POOL_FLAG != 0
}

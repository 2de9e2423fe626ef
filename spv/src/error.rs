//! Error types for the SPV client.

use std::io;

use thiserror::Error;

use bisonwire::message::network::RejectCode;
use bisonwire::BlockHash;

/// Top-level error type for the SPV client.
#[derive(Debug, Error)]
pub enum SpvError {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("backend shutting down")]
    BackendShuttingDown,
}

/// Network and peer-level errors.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("peer protocol version {0} below minimum")]
    ObsoleteProtocol(u32),

    #[error("peer sent a second version message")]
    DuplicateHandshake,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("timeout")]
    Timeout,

    #[error("peer closed")]
    PeerClosed,

    #[error("peer misbehaving, score {score}")]
    PeerMisbehaving { score: u32 },

    #[error("peer is banned")]
    Banned,

    #[error("no connected peers")]
    NoPeers,

    #[error("wire error: {0}")]
    Wire(#[from] bisonwire::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("internal channel closed")]
    ChannelClosed,
}

/// Storage backend errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("data not found: {0}")]
    NotFound(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("record decode failed: {0}")]
    Decode(#[from] bisonwire::Error),
}

/// The reason a header was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    PrevMissing,
    BadTimestamp,
    BadDifficulty,
    PowFail,
    CheckpointMismatch,
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            HeaderError::PrevMissing => "previous block missing",
            HeaderError::BadTimestamp => "timestamp not past median of last 11",
            HeaderError::BadDifficulty => "difficulty bits do not match retarget schedule",
            HeaderError::PowFail => "proof of work below target not met",
            HeaderError::CheckpointMismatch => "hash contradicts hard-coded checkpoint",
        })
    }
}

/// Consensus validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid header: {0}")]
    Header(HeaderError),

    #[error("invalid filter: {0}")]
    FilterInvalid(String),

    #[error("invalid filter header chain: {0}")]
    FilterHeaderChain(String),
}

impl ValidationError {
    /// Whether the source peer earns a ban for this.
    pub fn is_bannable(&self) -> bool {
        // A missing parent can be an innocent race with a reorg; the rest
        // cannot.
        !matches!(self, ValidationError::Header(HeaderError::PrevMissing))
    }
}

/// Synchronization errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("timeout: {0}")]
    Timeout(String),

    #[error("no peers able to serve the request")]
    NoPeers,

    #[error("block {0} unavailable after retries")]
    BlockUnavailable(BlockHash),

    #[error("broadcast rejected ({code}): {reason}")]
    BroadcastRejected { code: RejectCode, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Type alias for Result with SpvError.
pub type Result<T> = std::result::Result<T, SpvError>;

/// Type alias for network operation results.
pub type NetworkResult<T> = std::result::Result<T, NetworkError>;

/// Type alias for storage operation results.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Type alias for sync operation results.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

//! Wire-level error types.

use std::io;

use thiserror::Error;

/// Errors produced while framing, encoding, or decoding wire messages.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("message from foreign network (magic {0:#010x})")]
    ForeignNetwork(u32),

    #[error("payload for '{command}' is {length} bytes, limit {max}")]
    PayloadTooLarge {
        command: String,
        length: u32,
        max: u32,
    },

    #[error("command '{0}' exceeds 12 bytes")]
    CommandTooLong(String),

    #[error("malformed command bytes {0:02x?}")]
    MalformedCommand([u8; 12]),

    #[error("checksum mismatch for '{command}': header {expected:02x?}, computed {actual:02x?}")]
    ChecksumMismatch {
        command: String,
        expected: [u8; 4],
        actual: [u8; 4],
    },

    #[error("unknown message command '{0}'")]
    UnknownMessage(String),

    #[error("non-canonical compact size encoding")]
    NonCanonicalVarInt,

    #[error("allocation of oversized vector requested ({requested} > {max})")]
    OversizedVectorAllocation { requested: u64, max: u64 },

    #[error("parse failed: {0}")]
    ParseFailed(&'static str),
}

impl Error {
    /// Whether the reader hit a command it has no constructor for. Callers
    /// that want to stay connected to newer peers treat this as ignorable.
    pub fn is_unknown_message(&self) -> bool {
        matches!(self, Error::UnknownMessage(_))
    }
}

/// Result alias for wire operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Bitcoin-family wire protocol with per-chain message variants.
//!
//! This crate is the protocol floor of the SPV wallet core:
//!
//! - Framed message envelope (magic, command, length, checksum) with
//!   read/write validation and stream resynchronization
//! - Consensus encoding primitives and the [`message::NetworkMessage`]
//!   payload set
//! - Per-chain transaction and block decoding: stock Bitcoin, and
//!   Litecoin with its MWEB extension framing
//! - BIP158 compact filters and the BIP157 header chain
//! - Chain parameters for Bitcoin and Litecoin mainnet/testnet/regtest,
//!   including Litecoin's scrypt proof-of-work
//!
//! It performs no I/O scheduling of its own; everything operates on
//! `std::io` streams and byte slices so the async client crate can frame
//! messages however it likes.

pub mod bip158;
pub mod block;
pub mod encode;
pub mod error;
pub mod hash_types;
pub mod ltc;
pub mod message;
pub mod params;
pub mod pow;
pub mod transaction;

pub use block::{Block, BlockHeader};
pub use error::{Error, Result};
pub use hash_types::{BlockHash, FilterHash, FilterHeader, Txid, TxMerkleNode};
pub use message::NetworkMessage;
pub use params::{chain_params, ChainKind, ChainParams, Checkpoint, Network};
pub use pow::{Target, Work};
pub use transaction::{OutPoint, ScriptBuf, Transaction, TxIn, TxOut};

/// Current version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Multi-asset SPV wallet core.
//!
//! Maintains a local best header chain for Bitcoin-family UTXO networks
//! (Bitcoin and Litecoin), validates proof-of-work and difficulty
//! retargets against hard-coded checkpoints, downloads BIP157/158
//! compact filters on demand, scans them for wallet-relevant outputs,
//! and broadcasts transactions to peers. Full blocks are fetched only
//! when a filter indicates wallet interest.
//!
//! # Quick start
//!
//! ```no_run
//! use bisonwire::{ChainKind, Network};
//! use utxo_spv::{ClientConfig, SpvClient};
//! use utxo_spv::storage::DiskStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new(ChainKind::Litecoin, Network::Mainnet)
//!         .with_data_dir("./spv-data".into());
//!     let storage = DiskStorage::open("./spv-data").await?;
//!
//!     let mut client = SpvClient::new(config, storage).await?;
//!     client.start().await?;
//!
//!     let mut tips = client.subscribe_tip();
//!     while let Ok(tip) = tips.recv().await {
//!         println!("new tip {} at {}", tip.hash, tip.height);
//!     }
//!
//!     client.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod chain;
pub mod client;
pub mod config;
pub mod error;
pub mod network;
pub mod storage;
pub mod sync;
pub mod types;

pub use client::SpvClient;
pub use config::ClientConfig;
pub use error::{NetworkError, Result, SpvError, StorageError, SyncError, ValidationError};
pub use types::{
    BlockMatch, BroadcastHandle, BroadcastOutcome, PeerId, PeerInfo, SyncPhase, SyncStatus,
    TipUpdate, WatchItem, WatchSet,
};

// Re-export the wire crate's core types for convenience.
pub use bisonwire::{
    chain_params, Block, BlockHash, BlockHeader, ChainKind, ChainParams, Network, OutPoint,
    ScriptBuf, Transaction, Txid,
};

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Helpers for chain tests: a regtest store and a toy miner.

use bisonwire::{chain_params, ChainKind, Network, BlockHeader, TxMerkleNode};

use crate::chain::HeaderStore;
use crate::storage::{MemoryStorage, StoredHeader};

/// A fresh regtest header store with in-memory storage.
pub fn regtest_store() -> (HeaderStore, MemoryStorage) {
    let params = chain_params(ChainKind::Bitcoin, Network::Regtest);
    (HeaderStore::new(params), MemoryStorage::new())
}

/// Mines a regtest block on `prev`. The salt diversifies the merkle root
/// so divergent branches get distinct hashes.
pub fn mine_on(prev: &StoredHeader, salt: u32) -> BlockHeader {
    let params = chain_params(ChainKind::Bitcoin, Network::Regtest);
    let mut merkle = [0u8; 32];
    merkle[..4].copy_from_slice(&salt.to_le_bytes());
    merkle[4..8].copy_from_slice(&prev.height.to_le_bytes());
    let mut header = BlockHeader {
        version: 1,
        prev_blockhash: prev.block_hash(),
        merkle_root: TxMerkleNode::from_byte_array(merkle),
        time: prev.header.time + 60,
        bits: prev.header.bits,
        nonce: 0,
    };
    while !params.header_pow_valid(&header) {
        header.nonce += 1;
    }
    header
}

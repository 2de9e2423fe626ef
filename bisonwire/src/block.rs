//! Block headers and blocks.

use std::io;

use crate::encode::{self, serialize, Decodable, Encodable, VarInt};
use crate::error::Result;
use crate::hash_types::{BlockHash, TxMerkleNode};
use crate::params::ChainKind;
use crate::pow::Target;
use crate::transaction::Transaction;

/// Size of a serialized block header.
pub const HEADER_SIZE: usize = 80;

/// The bit of the header version that signals a possible trailing MWEB
/// extension block on Litecoin.
pub const MWEB_VERSION_BIT: i32 = 0x2000_0000; // 1 << 29

/// An 80-byte block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_blockhash: BlockHash,
    pub merkle_root: TxMerkleNode,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// The identity hash: double-SHA-256 of the serialized header,
    /// regardless of chain. Litecoin's scrypt hash exists only for the PoW
    /// comparison and never identifies a block.
    pub fn block_hash(&self) -> BlockHash {
        BlockHash::hash(&serialize(self))
    }

    /// The target threshold this header claims to meet.
    pub fn target(&self) -> Target {
        Target::from_compact(self.bits)
    }

    /// Whether the header version signals a MWEB extension block.
    pub fn has_mweb_version_bit(&self) -> bool {
        self.version & MWEB_VERSION_BIT != 0
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.version.consensus_encode(w)?;
        len += self.prev_blockhash.consensus_encode(w)?;
        len += self.merkle_root.consensus_encode(w)?;
        len += self.time.consensus_encode(w)?;
        len += self.bits.consensus_encode(w)?;
        len += self.nonce.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        Ok(BlockHeader {
            version: i32::consensus_decode(r)?,
            prev_blockhash: BlockHash::consensus_decode(r)?,
            merkle_root: TxMerkleNode::consensus_decode(r)?,
            time: u32::consensus_decode(r)?,
            bits: u32::consensus_decode(r)?,
            nonce: u32::consensus_decode(r)?,
        })
    }
}

encode::impl_vec!(BlockHeader);

/// A full block: header plus canonical transactions.
///
/// For Litecoin the trailing MWEB extension block, when present, is
/// validated for framing during decode and then dropped; its interior is
/// opaque to the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub txdata: Vec<Transaction>,
}

impl Block {
    pub fn block_hash(&self) -> BlockHash {
        self.header.block_hash()
    }
}

impl Encodable for Block {
    /// Encodes the stock Bitcoin layout. Blocks holding MWEB transactions
    /// refuse to encode (decode-only), which the transaction encoder
    /// enforces.
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.header.consensus_encode(w)?;
        len += VarInt(self.txdata.len() as u64).consensus_encode(w)?;
        for tx in &self.txdata {
            len += tx.consensus_encode(w)?;
        }
        Ok(len)
    }
}

impl Decodable for Block {
    /// Decodes the stock Bitcoin block format. The Litecoin variant lives
    /// in [`crate::ltc`].
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        let header = BlockHeader::consensus_decode(r)?;
        let txdata = Vec::<Transaction>::consensus_decode(r)?;
        Ok(Block { header, txdata })
    }
}

/// Decodes a block in the framing of the given chain.
pub fn decode_block<R: io::Read + ?Sized>(kind: ChainKind, r: &mut R) -> Result<Block> {
    match kind {
        ChainKind::Bitcoin => Block::consensus_decode(r),
        ChainKind::Litecoin => crate::ltc::decode_block(r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::deserialize;
    use crate::params;

    #[test]
    fn header_round_trip() {
        let header = params::chain_params(ChainKind::Bitcoin, params::Network::Mainnet).genesis;
        let enc = serialize(&header);
        assert_eq!(enc.len(), HEADER_SIZE);
        let dec: BlockHeader = deserialize(&enc).unwrap();
        assert_eq!(dec, header);
    }

    #[test]
    fn btc_genesis_header_hash() {
        let params = params::chain_params(ChainKind::Bitcoin, params::Network::Mainnet);
        let header = params.genesis;
        assert_eq!(header.bits, 0x1d00_ffff);
        assert_eq!(header.nonce, 0x7c2b_ac1d);
        assert_eq!(header.time, 0x495f_ab29);
        assert_eq!(
            hex::encode(header.block_hash().to_byte_array()),
            "6fe28c0ab6f1b372c1a6a246ae63f74f931e8365e15a089c68d6190000000000"
        );
        assert_eq!(header.block_hash(), params.genesis_hash);
    }

    #[test]
    fn mweb_version_bit() {
        let mut header = params::chain_params(ChainKind::Litecoin, params::Network::Mainnet).genesis;
        assert!(!header.has_mweb_version_bit());
        header.version = 0x2000_0000;
        assert!(header.has_mweb_version_bit());
    }
}

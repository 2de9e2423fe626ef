//! Inventory and block-data request payloads.

use std::io;

use crate::encode::{self, Decodable, Encodable};
use crate::error::Result;
use crate::hash_types::{BlockHash, Txid};

/// Protocol version sent in locator-bearing requests.
pub const PROTOCOL_VERSION: u32 = 70016;

/// Maximum locator hashes a `getheaders`/`getblocks` may carry.
pub const MAX_LOCATOR_HASHES: usize = 101;

/// An inventory vector entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Inventory {
    Tx(Txid),
    Block(BlockHash),
    FilteredBlock(BlockHash),
    WitnessTx(Txid),
    WitnessBlock(BlockHash),
    /// An inventory type we do not know. Carried so `notfound` echoes
    /// survive a round trip.
    Unknown { inv_type: u32, hash: [u8; 32] },
}

impl Inventory {
    fn inv_type(&self) -> u32 {
        match self {
            Inventory::Tx(_) => 1,
            Inventory::Block(_) => 2,
            Inventory::FilteredBlock(_) => 3,
            Inventory::WitnessTx(_) => 0x4000_0001,
            Inventory::WitnessBlock(_) => 0x4000_0002,
            Inventory::Unknown { inv_type, .. } => *inv_type,
        }
    }

    fn raw_hash(&self) -> [u8; 32] {
        match self {
            Inventory::Tx(txid) | Inventory::WitnessTx(txid) => txid.to_byte_array(),
            Inventory::Block(hash)
            | Inventory::FilteredBlock(hash)
            | Inventory::WitnessBlock(hash) => hash.to_byte_array(),
            Inventory::Unknown { hash, .. } => *hash,
        }
    }
}

impl Encodable for Inventory {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        Ok(self.inv_type().consensus_encode(w)? + self.raw_hash().consensus_encode(w)?)
    }
}

impl Decodable for Inventory {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        let inv_type = u32::consensus_decode(r)?;
        let hash = <[u8; 32]>::consensus_decode(r)?;
        Ok(match inv_type {
            1 => Inventory::Tx(Txid::from_byte_array(hash)),
            2 => Inventory::Block(BlockHash::from_byte_array(hash)),
            3 => Inventory::FilteredBlock(BlockHash::from_byte_array(hash)),
            0x4000_0001 => Inventory::WitnessTx(Txid::from_byte_array(hash)),
            0x4000_0002 => Inventory::WitnessBlock(BlockHash::from_byte_array(hash)),
            inv_type => Inventory::Unknown { inv_type, hash },
        })
    }
}

encode::impl_vec!(Inventory);
encode::impl_vec!(BlockHash);

/// The `getheaders` request: a locator plus an optional stop hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetHeadersMessage {
    pub version: u32,
    /// Exponentially thinning list of best-chain hashes, newest first.
    pub locator_hashes: Vec<BlockHash>,
    /// All-zero means "as many as you will give me".
    pub stop_hash: BlockHash,
}

impl GetHeadersMessage {
    pub fn new(locator_hashes: Vec<BlockHash>, stop_hash: BlockHash) -> Self {
        GetHeadersMessage {
            version: PROTOCOL_VERSION,
            locator_hashes,
            stop_hash,
        }
    }
}

impl Encodable for GetHeadersMessage {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.version.consensus_encode(w)?;
        len += self.locator_hashes.consensus_encode(w)?;
        len += self.stop_hash.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for GetHeadersMessage {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        Ok(GetHeadersMessage {
            version: u32::consensus_decode(r)?,
            locator_hashes: Vec::<BlockHash>::consensus_decode(r)?,
            stop_hash: BlockHash::consensus_decode(r)?,
        })
    }
}

/// The `getblocks` request. Same shape as `getheaders`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBlocksMessage {
    pub version: u32,
    pub locator_hashes: Vec<BlockHash>,
    pub stop_hash: BlockHash,
}

impl Encodable for GetBlocksMessage {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.version.consensus_encode(w)?;
        len += self.locator_hashes.consensus_encode(w)?;
        len += self.stop_hash.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for GetBlocksMessage {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        Ok(GetBlocksMessage {
            version: u32::consensus_decode(r)?,
            locator_hashes: Vec::<BlockHash>::consensus_decode(r)?,
            stop_hash: BlockHash::consensus_decode(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{deserialize, serialize};

    #[test]
    fn inventory_round_trip() {
        let items = vec![
            Inventory::Tx(Txid::from_byte_array([1; 32])),
            Inventory::Block(BlockHash::from_byte_array([2; 32])),
            Inventory::WitnessBlock(BlockHash::from_byte_array([3; 32])),
            Inventory::Unknown {
                inv_type: 0x7777,
                hash: [4; 32],
            },
        ];
        let dec: Vec<Inventory> = deserialize(&serialize(&items)).unwrap();
        assert_eq!(dec, items);
    }

    #[test]
    fn getheaders_round_trip() {
        let msg = GetHeadersMessage::new(
            vec![BlockHash::from_byte_array([9; 32]), BlockHash::all_zeros()],
            BlockHash::all_zeros(),
        );
        let dec: GetHeadersMessage = deserialize(&serialize(&msg)).unwrap();
        assert_eq!(dec, msg);
    }
}

//! BIP157 filter retrieval payloads.

use std::io;

use crate::encode::{self, Decodable, Encodable};
use crate::error::Result;
use crate::hash_types::{BlockHash, FilterHash, FilterHeader};

/// Maximum filters requestable in one `getcfilters`.
pub const MAX_GETCFILTERS_SIZE: u32 = 1000;
/// Maximum filter headers requestable in one `getcfheaders`.
pub const MAX_GETCFHEADERS_SIZE: u32 = 2000;
/// Interval between `cfcheckpt` entries.
pub const CFCHECKPT_INTERVAL: u32 = 1000;

/// `getcfilters`: request filters for a height range ending at a hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetCFilters {
    pub filter_type: u8,
    pub start_height: u32,
    pub stop_hash: BlockHash,
}

impl Encodable for GetCFilters {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.filter_type.consensus_encode(w)?;
        len += self.start_height.consensus_encode(w)?;
        len += self.stop_hash.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for GetCFilters {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        Ok(GetCFilters {
            filter_type: u8::consensus_decode(r)?,
            start_height: u32::consensus_decode(r)?,
            stop_hash: BlockHash::consensus_decode(r)?,
        })
    }
}

/// `cfilter`: one filter for one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CFilter {
    pub filter_type: u8,
    pub block_hash: BlockHash,
    pub filter: Vec<u8>,
}

impl Encodable for CFilter {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.filter_type.consensus_encode(w)?;
        len += self.block_hash.consensus_encode(w)?;
        len += self.filter.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for CFilter {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        Ok(CFilter {
            filter_type: u8::consensus_decode(r)?,
            block_hash: BlockHash::consensus_decode(r)?,
            filter: Vec::<u8>::consensus_decode(r)?,
        })
    }
}

/// `getcfheaders`: request filter headers for a height range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetCFHeaders {
    pub filter_type: u8,
    pub start_height: u32,
    pub stop_hash: BlockHash,
}

impl Encodable for GetCFHeaders {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.filter_type.consensus_encode(w)?;
        len += self.start_height.consensus_encode(w)?;
        len += self.stop_hash.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for GetCFHeaders {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        Ok(GetCFHeaders {
            filter_type: u8::consensus_decode(r)?,
            start_height: u32::consensus_decode(r)?,
            stop_hash: BlockHash::consensus_decode(r)?,
        })
    }
}

/// `cfheaders`: the previous header plus filter hashes for the range, from
/// which the requester rebuilds and verifies the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CFHeaders {
    pub filter_type: u8,
    pub stop_hash: BlockHash,
    pub previous_filter_header: FilterHeader,
    pub filter_hashes: Vec<FilterHash>,
}

impl Encodable for CFHeaders {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.filter_type.consensus_encode(w)?;
        len += self.stop_hash.consensus_encode(w)?;
        len += self.previous_filter_header.consensus_encode(w)?;
        len += self.filter_hashes.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for CFHeaders {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        Ok(CFHeaders {
            filter_type: u8::consensus_decode(r)?,
            stop_hash: BlockHash::consensus_decode(r)?,
            previous_filter_header: FilterHeader::consensus_decode(r)?,
            filter_hashes: Vec::<FilterHash>::consensus_decode(r)?,
        })
    }
}

/// `getcfcheckpt`: request the checkpoint headers up to a stop hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetCFCheckpt {
    pub filter_type: u8,
    pub stop_hash: BlockHash,
}

impl Encodable for GetCFCheckpt {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        Ok(self.filter_type.consensus_encode(w)? + self.stop_hash.consensus_encode(w)?)
    }
}

impl Decodable for GetCFCheckpt {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        Ok(GetCFCheckpt {
            filter_type: u8::consensus_decode(r)?,
            stop_hash: BlockHash::consensus_decode(r)?,
        })
    }
}

/// `cfcheckpt`: filter headers at each 1000-block interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CFCheckpt {
    pub filter_type: u8,
    pub stop_hash: BlockHash,
    pub filter_headers: Vec<FilterHeader>,
}

impl Encodable for CFCheckpt {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.filter_type.consensus_encode(w)?;
        len += self.stop_hash.consensus_encode(w)?;
        len += self.filter_headers.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for CFCheckpt {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        Ok(CFCheckpt {
            filter_type: u8::consensus_decode(r)?,
            stop_hash: BlockHash::consensus_decode(r)?,
            filter_headers: Vec::<FilterHeader>::consensus_decode(r)?,
        })
    }
}

encode::impl_vec!(FilterHash);
encode::impl_vec!(FilterHeader);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{deserialize, serialize};

    #[test]
    fn cfheaders_round_trip() {
        let msg = CFHeaders {
            filter_type: 0,
            stop_hash: BlockHash::from_byte_array([7; 32]),
            previous_filter_header: FilterHeader::from_byte_array([8; 32]),
            filter_hashes: vec![
                FilterHash::from_byte_array([1; 32]),
                FilterHash::from_byte_array([2; 32]),
            ],
        };
        let dec: CFHeaders = deserialize(&serialize(&msg)).unwrap();
        assert_eq!(dec, msg);
    }

    #[test]
    fn getcfilters_round_trip() {
        let msg = GetCFilters {
            filter_type: 0,
            start_height: 500_000,
            stop_hash: BlockHash::from_byte_array([3; 32]),
        };
        let dec: GetCFilters = deserialize(&serialize(&msg)).unwrap();
        assert_eq!(dec, msg);
    }
}

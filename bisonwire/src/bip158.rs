//! BIP158 compact block filters.
//!
//! Golomb-coded sets keyed by the block hash, with the BIP157 header
//! chain. Only the "basic" filter type exists on the network.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::io;

use bitcoin_hashes::siphash24;

use crate::encode::{Decodable, Encodable, VarInt};
use crate::error::{Error, Result};
use crate::hash_types::{BlockHash, FilterHash, FilterHeader};

/// The BIP158 basic filter type byte.
pub const FILTER_TYPE_BASIC: u8 = 0x00;

/// Golomb-Rice coding parameter.
const P: u8 = 19;
/// False-positive inverse rate parameter.
const M: u64 = 784_931;

/// A serialized basic block filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFilter {
    /// Golomb-coded filter content, including the leading element count.
    pub content: Vec<u8>,
}

impl BlockFilter {
    pub fn new(content: &[u8]) -> BlockFilter {
        BlockFilter {
            content: content.to_vec(),
        }
    }

    /// Double-SHA-256 of the filter contents.
    pub fn filter_hash(&self) -> FilterHash {
        FilterHash::hash(&self.content)
    }

    /// This filter's link in the BIP157 header chain.
    pub fn filter_header(&self, prev: &FilterHeader) -> FilterHeader {
        self.filter_hash().filter_header(prev)
    }

    /// Whether any of the query elements may be in the set backing this
    /// filter. False positives happen at roughly 1/M; false negatives
    /// never.
    pub fn match_any<'a, I>(&self, block_hash: &BlockHash, queries: I) -> Result<bool>
    where
        I: Iterator<Item = &'a [u8]>,
    {
        let reader = GcsFilterReader::new(block_hash);
        reader.match_any(&mut io::Cursor::new(&self.content), queries)
    }
}

/// Derives the siphash keys from a block hash: the first 16 bytes of the
/// hash in internal byte order, split into two little-endian words.
fn siphash_keys(block_hash: &BlockHash) -> (u64, u64) {
    let bytes = block_hash.as_byte_array();
    let mut k0 = [0u8; 8];
    let mut k1 = [0u8; 8];
    k0.copy_from_slice(&bytes[0..8]);
    k1.copy_from_slice(&bytes[8..16]);
    (u64::from_le_bytes(k0), u64::from_le_bytes(k1))
}

/// Maps a 64-bit hash uniformly onto `[0, nm)`.
fn map_to_range(hash: u64, nm: u64) -> u64 {
    ((hash as u128 * nm as u128) >> 64) as u64
}

/// Reads and matches against a Golomb-coded set.
pub struct GcsFilterReader {
    k0: u64,
    k1: u64,
}

impl GcsFilterReader {
    pub fn new(block_hash: &BlockHash) -> Self {
        let (k0, k1) = siphash_keys(block_hash);
        GcsFilterReader { k0, k1 }
    }

    fn hash_element(&self, element: &[u8], nm: u64) -> u64 {
        map_to_range(siphash24::Hash::hash_to_u64_with_keys(self.k0, self.k1, element), nm)
    }

    /// Matches any query element against the encoded set in `reader`.
    pub fn match_any<'a, R, I>(&self, reader: &mut R, queries: I) -> Result<bool>
    where
        R: io::Read + ?Sized,
        I: Iterator<Item = &'a [u8]>,
    {
        let n_elements = VarInt::consensus_decode(reader)?.0;
        if n_elements == 0 {
            return Ok(false);
        }
        let nm = n_elements
            .checked_mul(M)
            .ok_or(Error::ParseFailed("filter element count overflows"))?;

        let mapped: BTreeSet<u64> = queries.map(|q| self.hash_element(q, nm)).collect();
        if mapped.is_empty() {
            return Ok(false);
        }

        let mut wanted = mapped.into_iter();
        let mut want = wanted.next().expect("checked non-empty");
        let mut bits = BitStreamReader::new(reader);
        let mut data = 0u64;
        for _ in 0..n_elements {
            data += golomb_rice_decode(&mut bits)?;
            loop {
                match data.cmp(&want) {
                    Ordering::Equal => return Ok(true),
                    Ordering::Greater => match wanted.next() {
                        Some(next) => want = next,
                        None => return Ok(false),
                    },
                    Ordering::Less => break,
                }
            }
        }
        Ok(false)
    }
}

/// Builds a Golomb-coded set from raw elements.
///
/// The sync path never constructs filters, but tests and the broadcast
/// acceptance check need to produce byte-identical filters to a serving
/// node's.
pub struct GcsFilterWriter {
    k0: u64,
    k1: u64,
    elements: BTreeSet<Vec<u8>>,
}

impl GcsFilterWriter {
    pub fn new(block_hash: &BlockHash) -> Self {
        let (k0, k1) = siphash_keys(block_hash);
        GcsFilterWriter {
            k0,
            k1,
            elements: BTreeSet::new(),
        }
    }

    /// Adds raw element data to the set. Duplicates and empty elements
    /// collapse, as in the reference implementation.
    pub fn add_element(&mut self, element: &[u8]) {
        if !element.is_empty() {
            self.elements.insert(element.to_vec());
        }
    }

    /// Encodes the set, returning the serialized filter content.
    pub fn finish(&self) -> Vec<u8> {
        let n = self.elements.len() as u64;
        let mut out = Vec::new();
        VarInt(n)
            .consensus_encode(&mut out)
            .expect("in-memory writers don't error");
        if n == 0 {
            return out;
        }
        let nm = n * M;
        let mut mapped: Vec<u64> = self
            .elements
            .iter()
            .map(|el| map_to_range(siphash24::Hash::hash_to_u64_with_keys(self.k0, self.k1, el), nm))
            .collect();
        mapped.sort_unstable();

        let mut bits = BitStreamWriter::new(&mut out);
        let mut last = 0u64;
        for value in mapped {
            golomb_rice_encode(&mut bits, value - last);
            last = value;
        }
        bits.flush();
        out
    }
}

fn golomb_rice_decode<R: io::Read + ?Sized>(bits: &mut BitStreamReader<R>) -> Result<u64> {
    let mut quotient = 0u64;
    while bits.read(1)? == 1 {
        quotient += 1;
        if quotient > 1 << 32 {
            return Err(Error::ParseFailed("filter delta quotient unreasonably large"));
        }
    }
    let remainder = bits.read(P)?;
    Ok((quotient << P) + remainder)
}

fn golomb_rice_encode(bits: &mut BitStreamWriter<'_>, value: u64) {
    let quotient = value >> P;
    for _ in 0..quotient {
        bits.write(1, 1);
    }
    bits.write(0, 1);
    bits.write(value & ((1 << P) - 1), P);
}

struct BitStreamReader<'a, R: io::Read + ?Sized> {
    reader: &'a mut R,
    buffer: u8,
    offset: u8,
}

impl<'a, R: io::Read + ?Sized> BitStreamReader<'a, R> {
    fn new(reader: &'a mut R) -> Self {
        BitStreamReader {
            reader,
            buffer: 0,
            offset: 8,
        }
    }

    /// Reads up to 64 bits, most significant first.
    fn read(&mut self, mut nbits: u8) -> Result<u64> {
        debug_assert!(nbits <= 64);
        let mut data = 0u64;
        while nbits > 0 {
            if self.offset == 8 {
                let mut buf = [0u8; 1];
                self.reader.read_exact(&mut buf)?;
                self.buffer = buf[0];
                self.offset = 0;
            }
            let bits_here = std::cmp::min(8 - self.offset, nbits);
            data <<= bits_here;
            data |= u64::from(
                (self.buffer << self.offset) >> (8 - bits_here),
            );
            self.offset += bits_here;
            nbits -= bits_here;
        }
        Ok(data)
    }
}

struct BitStreamWriter<'a> {
    out: &'a mut Vec<u8>,
    buffer: u8,
    offset: u8,
}

impl<'a> BitStreamWriter<'a> {
    fn new(out: &'a mut Vec<u8>) -> Self {
        BitStreamWriter {
            out,
            buffer: 0,
            offset: 0,
        }
    }

    /// Writes the `nbits` low bits of `data`, most significant first.
    fn write(&mut self, data: u64, mut nbits: u8) {
        debug_assert!(nbits <= 64);
        while nbits > 0 {
            let bits_here = std::cmp::min(8 - self.offset, nbits);
            let chunk = (data >> (nbits - bits_here)) & ((1 << bits_here) - 1);
            self.buffer |= (chunk as u8) << (8 - self.offset - bits_here);
            self.offset += bits_here;
            nbits -= bits_here;
            if self.offset == 8 {
                self.out.push(self.buffer);
                self.buffer = 0;
                self.offset = 0;
            }
        }
    }

    fn flush(&mut self) {
        if self.offset > 0 {
            self.out.push(self.buffer);
            self.buffer = 0;
            self.offset = 0;
        }
    }
}

//! Newtypes for the 32-byte hashes that flow through the wire protocol.
//!
//! All of them hold the digest in internal (little-endian) byte order and
//! display in the conventional reversed hex order.

use std::fmt;
use std::str::FromStr;

use bitcoin_hashes::{sha256d, Hash as _};

use crate::encode::{Decodable, Encodable};
use crate::error::{Error, Result};

macro_rules! hash_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Constructs from internal (little-endian) byte order.
            pub const fn from_byte_array(bytes: [u8; 32]) -> Self {
                $name(bytes)
            }

            /// Returns the internal byte representation.
            pub const fn to_byte_array(self) -> [u8; 32] {
                self.0
            }

            /// Borrows the internal byte representation.
            pub fn as_byte_array(&self) -> &[u8; 32] {
                &self.0
            }

            /// The all-zero hash.
            pub const fn all_zeros() -> Self {
                $name([0u8; 32])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                // Reverse byte order, as hashes are conventionally printed.
                for b in self.0.iter().rev() {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                let mut bytes: Vec<u8> =
                    hex::decode(s).map_err(|_| Error::ParseFailed("invalid hash hex"))?;
                if bytes.len() != 32 {
                    return Err(Error::ParseFailed("hash hex is not 32 bytes"));
                }
                bytes.reverse();
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes);
                Ok($name(arr))
            }
        }

        impl Encodable for $name {
            #[inline]
            fn consensus_encode<W: std::io::Write + ?Sized>(
                &self,
                w: &mut W,
            ) -> std::io::Result<usize> {
                self.0.consensus_encode(w)
            }
        }

        impl Decodable for $name {
            #[inline]
            fn consensus_decode<R: std::io::Read + ?Sized>(r: &mut R) -> Result<Self> {
                Ok($name(<[u8; 32]>::consensus_decode(r)?))
            }
        }
    };
}

hash_newtype! {
    /// Identity hash of a block header (double-SHA-256 of the 80 bytes).
    BlockHash
}
hash_newtype! {
    /// Identity hash of a transaction.
    Txid
}
hash_newtype! {
    /// Root of a block's transaction merkle tree.
    TxMerkleNode
}
hash_newtype! {
    /// Double-SHA-256 of a serialized BIP158 filter.
    FilterHash
}
hash_newtype! {
    /// A link in the BIP157 filter header chain.
    FilterHeader
}

/// Double-SHA-256 over `data`, as raw little-endian bytes.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256d::Hash::hash(data).to_byte_array()
}

impl BlockHash {
    /// Hashes a serialized 80-byte header.
    pub fn hash(header_bytes: &[u8]) -> Self {
        BlockHash(sha256d(header_bytes))
    }
}

impl Txid {
    /// Hashes a stripped transaction serialization.
    pub fn hash(tx_bytes: &[u8]) -> Self {
        Txid(sha256d(tx_bytes))
    }
}

impl FilterHash {
    /// Hashes serialized filter contents.
    pub fn hash(filter_bytes: &[u8]) -> Self {
        FilterHash(sha256d(filter_bytes))
    }

    /// Chains this filter hash onto the previous filter header, per BIP157:
    /// `header = sha256d(filter_hash || prev_header)`.
    pub fn filter_header(&self, prev: &FilterHeader) -> FilterHeader {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&self.0);
        buf[32..].copy_from_slice(prev.as_byte_array());
        FilterHeader::from_byte_array(sha256d(&buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_reversed_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xAB;
        let hash = BlockHash::from_byte_array(bytes);
        let s = hash.to_string();
        assert!(s.ends_with("ab"));
        assert_eq!(s.len(), 64);
        assert_eq!(BlockHash::from_str(&s).unwrap(), hash);
    }

    #[test]
    fn filter_header_chain_from_genesis() {
        // An empty-ish filter chained onto the zero header must be stable.
        let fh = FilterHash::hash(&[0x01, 0x02]);
        let h0 = fh.filter_header(&FilterHeader::all_zeros());
        let h1 = fh.filter_header(&h0);
        assert_ne!(h0, h1);
    }
}

//! Bitcoin-family transactions, with the Litecoin MWEB extension fields.

use std::fmt;
use std::io;

use crate::encode::{self, Decodable, Encodable, VarInt};
use crate::error::{Error, Result};
use crate::hash_types::Txid;
use crate::params::ChainKind;

/// An owned script, kept as raw bytes. The wallet core never interprets
/// scripts beyond equality against the watch set.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScriptBuf(Vec<u8>);

impl ScriptBuf {
    pub const fn new() -> Self {
        ScriptBuf(Vec::new())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        ScriptBuf(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for ScriptBuf {
    fn from(bytes: Vec<u8>) -> Self {
        ScriptBuf(bytes)
    }
}

impl Encodable for ScriptBuf {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        self.0.consensus_encode(w)
    }
}

impl Decodable for ScriptBuf {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        Ok(ScriptBuf(Vec::<u8>::consensus_decode(r)?))
    }
}

/// A reference to an output of a previous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutPoint {
    pub txid: Txid,
    pub vout: u32,
}

impl OutPoint {
    pub const fn new(txid: Txid, vout: u32) -> Self {
        OutPoint { txid, vout }
    }

    /// The outpoint of a coinbase input.
    pub fn null() -> Self {
        OutPoint {
            txid: Txid::all_zeros(),
            vout: u32::MAX,
        }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

impl Encodable for OutPoint {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        Ok(self.txid.consensus_encode(w)? + self.vout.consensus_encode(w)?)
    }
}

impl Decodable for OutPoint {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        Ok(OutPoint {
            txid: Txid::consensus_decode(r)?,
            vout: u32::consensus_decode(r)?,
        })
    }
}

/// A transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: ScriptBuf,
    pub sequence: u32,
    /// Witness stack, one byte vector per item. Empty when the input does
    /// not spend a segwit output.
    pub witness: Vec<Vec<u8>>,
}

impl Encodable for TxIn {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.previous_output.consensus_encode(w)?;
        len += self.script_sig.consensus_encode(w)?;
        len += self.sequence.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for TxIn {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        Ok(TxIn {
            previous_output: OutPoint::consensus_decode(r)?,
            script_sig: ScriptBuf::consensus_decode(r)?,
            sequence: u32::consensus_decode(r)?,
            witness: Vec::new(),
        })
    }
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: ScriptBuf,
}

impl Encodable for TxOut {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        Ok(self.value.consensus_encode(w)? + self.script_pubkey.consensus_encode(w)?)
    }
}

impl Decodable for TxOut {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        Ok(TxOut {
            value: i64::consensus_decode(r)?,
            script_pubkey: ScriptBuf::consensus_decode(r)?,
        })
    }
}

encode::impl_vec!(TxIn);
encode::impl_vec!(TxOut);
encode::impl_vec!(Vec<u8>);

/// MWEB data carried by a Litecoin transaction with witness flag bit 3.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MwebTx {
    /// Raw bytes of the first MW kernel, the identity preimage of a pure-MW
    /// transaction. Empty for an integration (HogEx) transaction, which
    /// carries a null MW payload.
    pub kern0: Vec<u8>,
    /// Whether this is the block-final integration transaction.
    pub is_hogex: bool,
}

/// A decoded transaction.
///
/// The canonical fields follow the stock Bitcoin layout; `mweb` is only
/// ever populated by the Litecoin decoder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transaction {
    pub version: i32,
    pub input: Vec<TxIn>,
    pub output: Vec<TxOut>,
    pub lock_time: u32,
    pub mweb: Option<MwebTx>,
}

impl Transaction {
    /// The transaction identity hash.
    ///
    /// A pure-MW transaction (no canonical inputs or outputs, non-empty
    /// kernel) is identified by BLAKE3 of its first kernel; everything else
    /// hashes the stripped serialization with double-SHA-256.
    pub fn txid(&self) -> Txid {
        if let Some(mweb) = &self.mweb {
            if !mweb.kern0.is_empty() && self.input.is_empty() && self.output.is_empty() {
                return Txid::from_byte_array(*blake3::hash(&mweb.kern0).as_bytes());
            }
        }
        let mut enc = Vec::with_capacity(self.stripped_len());
        self.encode_stripped(&mut enc).expect("in-memory writers don't error");
        Txid::hash(&enc)
    }

    /// Whether any input carries witness data.
    pub fn has_witness(&self) -> bool {
        self.input.iter().any(|txin| !txin.witness.is_empty())
    }

    /// Whether this is the block-final MWEB integration transaction.
    pub fn is_hogex(&self) -> bool {
        self.mweb.as_ref().is_some_and(|m| m.is_hogex)
    }

    fn stripped_len(&self) -> usize {
        // Close enough for a capacity hint.
        8 + self.input.len() * 48 + self.output.len() * 34
    }

    /// Serializes without witness or MWEB data, the txid preimage.
    fn encode_stripped<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.version.consensus_encode(w)?;
        len += self.input.consensus_encode(w)?;
        len += self.output.consensus_encode(w)?;
        len += self.lock_time.consensus_encode(w)?;
        Ok(len)
    }
}

/// Witness flag bit 0: BIP144 witness data follows the outputs.
const WITNESS_FLAG_SEGWIT: u8 = 0x01;
/// Witness flag bit 3: a MWEB payload follows the outputs (Litecoin only).
pub(crate) const WITNESS_FLAG_MWEB: u8 = 0x08;

impl Encodable for Transaction {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        if self.mweb.is_some() {
            // MWEB payload interiors are not retained on decode, so
            // re-encoding would produce garbage. Decode-only, like the
            // blocks that carry them.
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "MWEB transactions are decode-only",
            ));
        }
        if !self.has_witness() {
            return self.encode_stripped(w);
        }
        let mut len = self.version.consensus_encode(w)?;
        w.write_all(&[0x00, WITNESS_FLAG_SEGWIT])?;
        len += 2;
        len += self.input.consensus_encode(w)?;
        len += self.output.consensus_encode(w)?;
        for txin in &self.input {
            len += txin.witness.consensus_encode(w)?;
        }
        len += self.lock_time.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for Transaction {
    /// Decodes the stock Bitcoin (BIP144) transaction format. The Litecoin
    /// variant lives in [`crate::ltc`].
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        let version = i32::consensus_decode(r)?;
        let count = VarInt::consensus_decode(r)?.0;
        if count == 0 {
            // Segwit marker: the zero was the marker byte, a flag follows.
            let flag = u8::consensus_decode(r)?;
            if flag != WITNESS_FLAG_SEGWIT {
                return Err(Error::ParseFailed("unsupported witness flag"));
            }
            let mut input = Vec::<TxIn>::consensus_decode(r)?;
            let output = Vec::<TxOut>::consensus_decode(r)?;
            for txin in input.iter_mut() {
                txin.witness = Vec::<Vec<u8>>::consensus_decode(r)?;
            }
            if input.iter().all(|txin| txin.witness.is_empty()) {
                return Err(Error::ParseFailed("witness flag set but no witness data"));
            }
            Ok(Transaction {
                version,
                input,
                output,
                lock_time: u32::consensus_decode(r)?,
                mweb: None,
            })
        } else {
            let mut input = Vec::with_capacity(std::cmp::min(count as usize, 1024));
            for _ in 0..count {
                input.push(TxIn::consensus_decode(r)?);
            }
            let output = Vec::<TxOut>::consensus_decode(r)?;
            Ok(Transaction {
                version,
                input,
                output,
                lock_time: u32::consensus_decode(r)?,
                mweb: None,
            })
        }
    }
}

encode::impl_vec!(Transaction);

/// Decodes a transaction in the framing of the given chain.
pub fn decode_transaction<R: io::Read + ?Sized>(kind: ChainKind, r: &mut R) -> Result<Transaction> {
    match kind {
        ChainKind::Bitcoin => Transaction::consensus_decode(r),
        ChainKind::Litecoin => crate::ltc::decode_transaction(r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{deserialize, serialize};

    fn sample_tx() -> Transaction {
        Transaction {
            version: 2,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::from_bytes(vec![0x51]),
                sequence: 0xFFFF_FFFF,
                witness: Vec::new(),
            }],
            output: vec![TxOut {
                value: 50_000,
                script_pubkey: ScriptBuf::from_bytes(vec![0x00, 0x14, 0xAB]),
            }],
            lock_time: 0,
            mweb: None,
        }
    }

    #[test]
    fn legacy_round_trip() {
        let tx = sample_tx();
        let enc = serialize(&tx);
        let dec: Transaction = deserialize(&enc).unwrap();
        assert_eq!(dec, tx);
        assert_eq!(dec.txid(), tx.txid());
    }

    #[test]
    fn segwit_round_trip_and_stable_txid() {
        let mut tx = sample_tx();
        let base_txid = tx.txid();
        tx.input[0].witness = vec![vec![0x01, 0x02], vec![0x03]];
        let enc = serialize(&tx);
        // Marker and flag bytes after version.
        assert_eq!(enc[4], 0x00);
        assert_eq!(enc[5], 0x01);
        let dec: Transaction = deserialize(&enc).unwrap();
        assert_eq!(dec, tx);
        // Witness data does not change the identity hash.
        assert_eq!(dec.txid(), base_txid);
    }

    #[test]
    fn segwit_without_witness_rejected() {
        let mut enc = serialize(&sample_tx());
        // Splice in a marker+flag with empty witness stacks.
        enc.splice(4..4, [0x00, 0x01]);
        enc.splice(enc.len() - 4..enc.len() - 4, [0x00]);
        assert!(deserialize::<Transaction>(&enc).is_err());
    }

    #[test]
    fn mweb_tx_is_decode_only() {
        let mut tx = sample_tx();
        tx.mweb = Some(MwebTx {
            kern0: vec![1, 2, 3],
            is_hogex: false,
        });
        let mut sink = Vec::new();
        assert!(tx.consensus_encode(&mut sink).is_err());
    }

    #[test]
    fn pure_mw_txid_is_blake3_of_kernel() {
        let kern0 = vec![0xAAu8; 96];
        let tx = Transaction {
            version: 2,
            input: vec![],
            output: vec![],
            lock_time: 0,
            mweb: Some(MwebTx {
                kern0: kern0.clone(),
                is_hogex: false,
            }),
        };
        assert_eq!(tx.txid(), Txid::from_byte_array(*blake3::hash(&kern0).as_bytes()));
    }
}

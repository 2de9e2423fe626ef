//! Litecoin transaction and block deserialization.
//!
//! MWEB changes both serializations. Transactions may carry an MWEB
//! payload after the outputs (witness flag bit 3), and blocks whose header
//! version has bit 29 set may carry a trailing extension block after a
//! final integration (HogEx) transaction. The extension payload interiors
//! are validated for framing and then discarded; only the first kernel of
//! a transaction's MW payload is retained, because it is the identity
//! preimage of a pure-MW transaction.
//!
//! Litecoin blocks are decode-only. Nothing in the wallet ever re-encodes
//! one.

use std::io;

use crate::block::{Block, BlockHeader};
use crate::encode::{discard_bytes, Decodable, VarInt};
use crate::error::{Error, Result};
use crate::transaction::{MwebTx, Transaction, TxIn, TxOut, WITNESS_FLAG_MWEB};

/// Witness flag bit 0, plain segwit.
const WITNESS_FLAG_SEGWIT: u8 = 0x01;

// MW kernel feature bits, src/libmw/include/mw/models/tx/Kernel.h.
const KERNEL_FEE: u8 = 0x01;
const KERNEL_PEGIN: u8 = 0x02;
const KERNEL_PEGOUT: u8 = 0x04;
const KERNEL_HEIGHT_LOCK: u8 = 0x08;
const KERNEL_STEALTH_EXCESS: u8 = 0x10;
const KERNEL_EXTRA_DATA: u8 = 0x20;

// MW input feature bits, src/libmw/include/mw/models/tx/Input.h.
const INPUT_STEALTH_KEY: u8 = 0x01;
const INPUT_EXTRA_DATA: u8 = 0x02;

// MW output message feature bits, src/libmw/include/mw/models/tx/OutputMessage.h.
const OUTPUT_STANDARD_FIELDS: u8 = 0x01;
const OUTPUT_EXTRA_DATA: u8 = 0x02;

/// Size of a serialized MW range proof.
const RANGE_PROOF_SIZE: u64 = 675;

fn read_u8<R: io::Read + ?Sized>(r: &mut R) -> Result<u8> {
    Ok(u8::consensus_decode(r)?)
}

/// Reads a Bitcoin Core `VARINT`: base-128, big-endian, with a
/// continuation bit and a +1 offset per continuation byte. MWEB uses it
/// for amounts and MMR sizes.
fn read_vlq<R: io::Read + ?Sized>(r: &mut R) -> Result<u64> {
    let mut n: u64 = 0;
    loop {
        let b = read_u8(r)?;
        if n > (u64::MAX >> 7) {
            return Err(Error::ParseFailed("VLQ overflows 64 bits"));
        }
        n = (n << 7) | u64::from(b & 0x7f);
        if b & 0x80 == 0 {
            return Ok(n);
        }
        if n == u64::MAX {
            return Err(Error::ParseFailed("VLQ overflows 64 bits"));
        }
        n += 1;
    }
}

/// Decodes a Litecoin wire transaction.
///
/// The layout matches the stock format except that witness flag bits 0
/// (segwit) and 3 (MWEB) are each valid independently, and the MWEB
/// payload sits between the outputs (or witnesses) and the locktime.
pub fn decode_transaction<R: io::Read + ?Sized>(r: &mut R) -> Result<Transaction> {
    let version = i32::consensus_decode(r)?;

    let mut count = VarInt::consensus_decode(r)?.0;
    let mut flag = 0u8;
    if count == 0 {
        // The zero count was the flag marker; the real flag byte follows.
        flag = read_u8(r)?;
        if flag & (WITNESS_FLAG_SEGWIT | WITNESS_FLAG_MWEB) == 0 {
            return Err(Error::ParseFailed("witness marker with unrecognized flag byte"));
        }
        count = VarInt::consensus_decode(r)?.0;
    }

    if count > 1024 * 64 {
        return Err(Error::OversizedVectorAllocation {
            requested: count,
            max: 1024 * 64,
        });
    }
    let mut input = Vec::with_capacity(count as usize);
    for _ in 0..count {
        input.push(TxIn::consensus_decode(r)?);
    }

    let output = Vec::<TxOut>::consensus_decode(r)?;

    if flag & WITNESS_FLAG_SEGWIT != 0 {
        for txin in input.iter_mut() {
            txin.witness = Vec::<Vec<u8>>::consensus_decode(r)?;
        }
    }

    let mweb = if flag & WITNESS_FLAG_MWEB != 0 {
        let mweb = read_mw_tx(r)?;
        if mweb.is_hogex && output.is_empty() {
            return Err(Error::ParseFailed("no outputs on HogEx transaction"));
        }
        Some(mweb)
    } else {
        None
    };

    Ok(Transaction {
        version,
        input,
        output,
        lock_time: u32::consensus_decode(r)?,
        mweb,
    })
}

/// Reads the optional MW transaction that follows the outputs when flag
/// bit 3 is set (src/mweb/mweb_models.h, struct Tx).
///
/// A null payload is how the integration (HogEx) transaction presents;
/// fixtures show no other transaction shaped this way, so null is taken to
/// mean HogEx rather than being mirrored from the pure-MW case.
fn read_mw_tx<R: io::Read + ?Sized>(r: &mut R) -> Result<MwebTx> {
    let has_mw_tx = read_u8(r)?;
    if has_mw_tx == 0 {
        return Ok(MwebTx {
            kern0: Vec::new(),
            is_hogex: true,
        });
    }

    // mw::Transaction: kernel_offset and stealth_offset blinding factors,
    // then the body.
    discard_bytes(r, 32 * 2)?;
    let kern0 = read_mw_tx_body(r)?;
    Ok(MwebTx {
        kern0,
        is_hogex: false,
    })
}

/// Reads a MW TxBody (inputs, outputs, kernels), returning the raw bytes
/// of kernel 0. Everything else is consumed and dropped.
fn read_mw_tx_body<R: io::Read + ?Sized>(r: &mut R) -> Result<Vec<u8>> {
    let num_inputs = VarInt::consensus_decode(r)?.0;
    for _ in 0..num_inputs {
        read_mw_input(r)?;
    }

    let num_outputs = VarInt::consensus_decode(r)?.0;
    for _ in 0..num_outputs {
        read_mw_output(r)?;
    }

    let num_kernels = VarInt::consensus_decode(r)?.0;
    let mut kern0 = Vec::new();
    for i in 0..num_kernels {
        let kernel = read_mw_kernel(r)?;
        if i == 0 {
            kern0 = kernel;
        }
    }
    Ok(kern0)
}

fn read_mw_input<R: io::Read + ?Sized>(r: &mut R) -> Result<()> {
    let features = read_u8(r)?;
    // Output ID, commitment, output public key.
    discard_bytes(r, 32 + 33 + 33)?;
    if features & INPUT_STEALTH_KEY != 0 {
        discard_bytes(r, 33)?;
    }
    if features & INPUT_EXTRA_DATA != 0 {
        let len = VarInt::consensus_decode(r)?.0;
        discard_bytes(r, len)?;
    }
    // Signature.
    discard_bytes(r, 64)?;
    Ok(())
}

fn read_mw_output<R: io::Read + ?Sized>(r: &mut R) -> Result<()> {
    // Commitment, sender public key, receiver public key.
    discard_bytes(r, 33 * 3)?;
    // OutputMessage.
    let features = read_u8(r)?;
    if features & OUTPUT_STANDARD_FIELDS != 0 {
        // Key-exchange pubkey, view tag, masked value, masked nonce.
        discard_bytes(r, 33 + 1 + 8 + 16)?;
    }
    if features & OUTPUT_EXTRA_DATA != 0 {
        let len = VarInt::consensus_decode(r)?.0;
        discard_bytes(r, len)?;
    }
    discard_bytes(r, RANGE_PROOF_SIZE)?;
    // Signature.
    discard_bytes(r, 64)?;
    Ok(())
}

/// Reads one MW kernel, returning its raw serialized bytes so kernel 0 can
/// feed the BLAKE3 identity hash.
fn read_mw_kernel<R: io::Read + ?Sized>(r: &mut R) -> Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(128);
    let features = read_u8(r)?;
    raw.push(features);
    if features & KERNEL_FEE != 0 {
        copy_vlq(r, &mut raw)?;
    }
    if features & KERNEL_PEGIN != 0 {
        copy_vlq(r, &mut raw)?;
    }
    if features & KERNEL_PEGOUT != 0 {
        let count = copy_compact_size(r, &mut raw)?;
        for _ in 0..count {
            // PegOutCoin: amount then script.
            copy_vlq(r, &mut raw)?;
            copy_var_bytes(r, &mut raw)?;
        }
    }
    if features & KERNEL_HEIGHT_LOCK != 0 {
        copy_vlq(r, &mut raw)?;
    }
    if features & KERNEL_STEALTH_EXCESS != 0 {
        copy_exact(r, &mut raw, 33)?;
    }
    if features & KERNEL_EXTRA_DATA != 0 {
        copy_var_bytes(r, &mut raw)?;
    }
    // Excess commitment and signature.
    copy_exact(r, &mut raw, 33)?;
    copy_exact(r, &mut raw, 64)?;
    Ok(raw)
}

fn copy_exact<R: io::Read + ?Sized>(r: &mut R, out: &mut Vec<u8>, n: usize) -> Result<()> {
    let start = out.len();
    out.resize(start + n, 0);
    r.read_exact(&mut out[start..])?;
    Ok(())
}

fn copy_vlq<R: io::Read + ?Sized>(r: &mut R, out: &mut Vec<u8>) -> Result<u64> {
    let mut n: u64 = 0;
    loop {
        let b = read_u8(r)?;
        out.push(b);
        if n > (u64::MAX >> 7) {
            return Err(Error::ParseFailed("VLQ overflows 64 bits"));
        }
        n = (n << 7) | u64::from(b & 0x7f);
        if b & 0x80 == 0 {
            return Ok(n);
        }
        n += 1;
    }
}

fn copy_compact_size<R: io::Read + ?Sized>(r: &mut R, out: &mut Vec<u8>) -> Result<u64> {
    let v = VarInt::consensus_decode(r)?;
    out.extend_from_slice(&crate::encode::serialize(&v));
    Ok(v.0)
}

fn copy_var_bytes<R: io::Read + ?Sized>(r: &mut R, out: &mut Vec<u8>) -> Result<u64> {
    let len = copy_compact_size(r, out)?;
    if len > crate::encode::MAX_VEC_SIZE {
        return Err(Error::OversizedVectorAllocation {
            requested: len,
            max: crate::encode::MAX_VEC_SIZE,
        });
    }
    copy_exact(r, out, len as usize)?;
    Ok(len)
}

/// Decodes a Litecoin block: header, canonical transactions, and, when the
/// header version has bit 29 set and the final transaction is a HogEx, a
/// trailing extension block whose framing is validated and contents
/// dropped.
pub fn decode_block<R: io::Read + ?Sized>(r: &mut R) -> Result<Block> {
    let header = BlockHeader::consensus_decode(r)?;

    let tx_count = VarInt::consensus_decode(r)?.0;
    if tx_count > 1024 * 1024 {
        return Err(Error::OversizedVectorAllocation {
            requested: tx_count,
            max: 1024 * 1024,
        });
    }

    let mut has_hogex = false;
    let mut txdata = Vec::with_capacity(tx_count as usize);
    for _ in 0..tx_count {
        let tx = decode_transaction(r)?;
        has_hogex = tx.is_hogex(); // hogex is the last txn
        txdata.push(tx);
    }

    if header.has_mweb_version_bit() && has_hogex {
        parse_mweb_block(r)?;
    }

    Ok(Block { header, txdata })
}

/// Consumes a serialized extension block (src/mweb/mweb_models.h, struct
/// Block): one option byte, and if non-zero a mw::Block header followed by
/// a TxBody.
fn parse_mweb_block<R: io::Read + ?Sized>(r: &mut R) -> Result<()> {
    let has_mweb = read_u8(r)?;
    if has_mweb == 0 {
        return Ok(());
    }

    // mw::Header: height, then three hashes (output root, kernel root,
    // leafset root) and two blinding offsets, then the two MMR sizes.
    read_vlq(r)?;
    discard_bytes(r, 32 * 3 + 32 * 2)?;
    read_vlq(r)?;
    read_vlq(r)?;

    read_mw_tx_body(r)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_types::Txid;
    use std::str::FromStr;

    // Integration (HogEx) transaction
    // 3cd43df64e9382040eff0bf54ba1c2389d5111eb5ab0968ab7af67e3c30cac04 from
    // testnet4 block 2319633. Witness flag has bit 3 set and the MW payload
    // is null (option byte zero), which defeats stock segwit decoding.
    const INTEG_TX_HEX: &str = "02000000000801bba0a561a904465fe2215f77822e04045ca01491c358bb16\
89200d71ada3836b0000000000ffffffff01ec069e659a320000225820399cda16\
3b49fdac1f669f69e63b56756d3bc6f2523eb10615710154959cc1360000000000";

    // Peg-in transaction
    // 84b7ea499d5650cc220afac8b972527cef10ed402da5a5b000f994199044f450 with
    // a witness version 9 output, standard segwit framing (flag 0x01).
    const PEGIN_TX_HEX: &str = "02000000000101d4cfc0df00ced17d9f05460b20be3f8b362e213fbfb22514c5a7e566bd9bd6a10000000000feffffff012a\
c07b050000000022592056961cee5a05f60a40f4730bef10786b0b54e42e460ee9102b2756b69efe37210247304402205f44\
1fa690d41056ab5c635fd8f96427cdb7825ba5cdb4a977758fb09ac2bb2e02204c068a057469fd22176ec45bd1bc780bb6db\
34e299a601ae735b8f3db5abd4b10121029e94825ddd9ed088ca2c270b3ccb5cb5573a8204215912cac1f68f288190270c9f\
ce2100";

    #[test]
    fn hogex_tx_decodes() {
        let raw = hex::decode(INTEG_TX_HEX).unwrap();
        let mut cursor = std::io::Cursor::new(&raw[..]);
        let tx = decode_transaction(&mut cursor).unwrap();
        assert_eq!(cursor.position(), raw.len() as u64);

        assert!(tx.is_hogex());
        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.output.len(), 1);
        assert_eq!(tx.lock_time, 0);
        // Witness version 8 output script.
        assert_eq!(tx.output[0].script_pubkey.as_bytes()[0], 0x58);
        assert_eq!(
            tx.txid(),
            Txid::from_str("3cd43df64e9382040eff0bf54ba1c2389d5111eb5ab0968ab7af67e3c30cac04")
                .unwrap()
        );
    }

    #[test]
    fn hogex_tx_fails_stock_segwit_decoding() {
        let raw = hex::decode(INTEG_TX_HEX).unwrap();
        assert!(crate::encode::deserialize::<Transaction>(&raw).is_err());
    }

    #[test]
    fn pegin_tx_decodes_on_both_paths() {
        let raw = hex::decode(PEGIN_TX_HEX).unwrap();
        let mut cursor = std::io::Cursor::new(&raw[..]);
        let tx = decode_transaction(&mut cursor).unwrap();
        assert_eq!(cursor.position(), raw.len() as u64);
        assert!(tx.mweb.is_none());
        // Witness version 9 output script.
        assert_eq!(tx.output[0].script_pubkey.as_bytes()[0], 0x59);
        assert_eq!(
            tx.txid(),
            Txid::from_str("84b7ea499d5650cc220afac8b972527cef10ed402da5a5b000f994199044f450")
                .unwrap()
        );

        // The same bytes are a plain segwit tx to the Bitcoin decoder.
        let btc_tx: Transaction = crate::encode::deserialize(&raw).unwrap();
        assert_eq!(btc_tx.txid(), tx.txid());
    }

    /// Builds a synthetic pure-MW transaction: marker, flag 0x08, no
    /// canonical inputs or outputs, one kernel carrying only a fee.
    fn synthetic_pure_mw_tx() -> (Vec<u8>, Vec<u8>) {
        let mut kernel = Vec::new();
        kernel.push(KERNEL_FEE); // features
        kernel.push(0x2a); // fee VLQ, single byte
        kernel.extend_from_slice(&[0x02; 33]); // excess commitment
        kernel.extend_from_slice(&[0x03; 64]); // signature

        let mut raw = Vec::new();
        raw.extend_from_slice(&2i32.to_le_bytes()); // version
        raw.push(0x00); // marker
        raw.push(WITNESS_FLAG_MWEB); // flag
        raw.push(0x00); // no inputs
        raw.push(0x00); // no outputs
        raw.push(0x01); // MW tx present
        raw.extend_from_slice(&[0x01; 32]); // kernel offset
        raw.extend_from_slice(&[0x01; 32]); // stealth offset
        raw.push(0x00); // no MW inputs
        raw.push(0x00); // no MW outputs
        raw.push(0x01); // one kernel
        raw.extend_from_slice(&kernel);
        raw.extend_from_slice(&123u32.to_le_bytes()); // locktime

        (raw, kernel)
    }

    #[test]
    fn pure_mw_tx_identity_is_blake3_of_kern0() {
        let (raw, kernel) = synthetic_pure_mw_tx();
        let mut cursor = std::io::Cursor::new(&raw[..]);
        let tx = decode_transaction(&mut cursor).unwrap();
        assert_eq!(cursor.position(), raw.len() as u64);

        assert_eq!(tx.lock_time, 123);
        assert!(tx.input.is_empty() && tx.output.is_empty());
        let mweb = tx.mweb.as_ref().unwrap();
        assert!(!mweb.is_hogex);
        assert_eq!(mweb.kern0, kernel);
        assert_eq!(tx.txid(), Txid::from_byte_array(*blake3::hash(&kernel).as_bytes()));
    }

    #[test]
    fn bad_flag_rejected() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&2i32.to_le_bytes());
        raw.push(0x00);
        raw.push(0x02); // neither bit 0 nor bit 3
        assert!(decode_transaction(&mut std::io::Cursor::new(&raw[..])).is_err());
    }

    #[test]
    fn vlq_round_values() {
        // Values from Bitcoin Core's VARINT scheme.
        let cases: &[(&[u8], u64)] = &[
            (&[0x00], 0),
            (&[0x7f], 127),
            (&[0x80, 0x00], 128),
            (&[0x80, 0x7f], 255),
            (&[0x82, 0x2c], ((2 + 1) << 7) | 0x2c),
        ];
        for (bytes, want) in cases {
            let mut cursor = std::io::Cursor::new(*bytes);
            assert_eq!(read_vlq(&mut cursor).unwrap(), *want, "{:02x?}", bytes);
        }
    }

    /// A minimal Litecoin block with the MWEB version bit, one coinbase-ish
    /// tx, a HogEx tx, and a trailing extension block.
    #[test]
    fn block_with_extension_block_decodes() {
        let (pure_mw, _) = synthetic_pure_mw_tx();
        let _ = pure_mw; // pure-MW txns live in the EB, not the block body

        // Plain legacy tx.
        let mut plain = Vec::new();
        plain.extend_from_slice(&1i32.to_le_bytes());
        plain.push(0x01); // one input
        plain.extend_from_slice(&[0u8; 32]); // prevout hash
        plain.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // prevout index
        plain.push(0x00); // empty script sig
        plain.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // sequence
        plain.push(0x01); // one output
        plain.extend_from_slice(&50_000i64.to_le_bytes());
        plain.push(0x01);
        plain.push(0x51); // OP_TRUE
        plain.extend_from_slice(&0u32.to_le_bytes()); // locktime

        // HogEx tx: same body plus null MW payload under flag 0x08.
        let mut hogex = Vec::new();
        hogex.extend_from_slice(&2i32.to_le_bytes());
        hogex.push(0x00);
        hogex.push(WITNESS_FLAG_MWEB);
        hogex.extend_from_slice(&plain[4..plain.len() - 4]); // inputs+outputs
        hogex.push(0x00); // null MW tx
        hogex.extend_from_slice(&0u32.to_le_bytes()); // locktime

        let header = BlockHeader {
            version: 0x2000_0000,
            prev_blockhash: crate::hash_types::BlockHash::all_zeros(),
            merkle_root: crate::hash_types::TxMerkleNode::all_zeros(),
            time: 0,
            bits: 0x207f_ffff,
            nonce: 0,
        };

        let mut raw = crate::encode::serialize(&header);
        raw.push(0x02); // two transactions
        raw.extend_from_slice(&plain);
        raw.extend_from_slice(&hogex);
        // Extension block: present, height 1, roots and offsets, zero MMR
        // sizes, empty body.
        raw.push(0x01);
        raw.push(0x01); // height VLQ
        raw.extend_from_slice(&[0u8; 32 * 5]);
        raw.push(0x00); // output MMR size
        raw.push(0x00); // kernel MMR size
        raw.push(0x00); // no body inputs
        raw.push(0x00); // no body outputs
        raw.push(0x00); // no body kernels

        let mut cursor = std::io::Cursor::new(&raw[..]);
        let block = decode_block(&mut cursor).unwrap();
        assert_eq!(cursor.position(), raw.len() as u64);
        assert_eq!(block.txdata.len(), 2);
        assert!(block.txdata[1].is_hogex());
    }

    #[test]
    fn block_without_version_bit_skips_extension() {
        // Same block but version 1 and no trailing EB bytes.
        let mut plain = Vec::new();
        plain.extend_from_slice(&1i32.to_le_bytes());
        plain.push(0x00); // no inputs
        plain.push(0x00); // no outputs
        plain.extend_from_slice(&0u32.to_le_bytes());

        let header = BlockHeader {
            version: 1,
            prev_blockhash: crate::hash_types::BlockHash::all_zeros(),
            merkle_root: crate::hash_types::TxMerkleNode::all_zeros(),
            time: 0,
            bits: 0x207f_ffff,
            nonce: 0,
        };
        let mut raw = crate::encode::serialize(&header);
        raw.push(0x01);
        raw.extend_from_slice(&plain);

        let mut cursor = std::io::Cursor::new(&raw[..]);
        let block = decode_block(&mut cursor).unwrap();
        assert_eq!(cursor.position(), raw.len() as u64);
        assert_eq!(block.txdata.len(), 1);
    }
}

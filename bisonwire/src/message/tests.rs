//! Envelope and payload round-trip tests.

use std::io::Cursor;

use super::*;
use crate::hash_types::{BlockHash, FilterHash, FilterHeader, Txid};
use crate::message::address::{Address, AddrV2Message, TimedAddress, ADDRV2_NETWORK_IPV4};
use crate::message::blockdata::{GetHeadersMessage, Inventory};
use crate::message::network::{Reject, RejectCode, VersionMessage};
use crate::params::{chain_params, ChainKind, Network};
use crate::transaction::{OutPoint, ScriptBuf, Transaction, TxIn, TxOut};

const BTC_MAGIC: u32 = 0xD9B4_BEF9;
const PVER: u32 = 70016;

fn round_trip(msg: NetworkMessage) {
    round_trip_on(ChainKind::Bitcoin, msg)
}

fn round_trip_on(chain: ChainKind, msg: NetworkMessage) {
    let mut buf = Vec::new();
    let written = write_message(&mut buf, BTC_MAGIC, PVER, &msg).unwrap();
    assert_eq!(written, buf.len());
    let mut cursor = Cursor::new(&buf[..]);
    let (decoded, consumed) = read_message(&mut cursor, chain, BTC_MAGIC, PVER).unwrap();
    assert_eq!(consumed, buf.len());
    assert_eq!(decoded, msg, "round trip failed for {}", msg.cmd());
}

#[test]
fn serialize_verack() {
    // The canonical mainnet verack frame.
    let mut buf = Vec::new();
    write_message(&mut buf, BTC_MAGIC, PVER, &NetworkMessage::Verack).unwrap();
    assert_eq!(
        buf,
        vec![
            0xf9, 0xbe, 0xb4, 0xd9, 0x76, 0x65, 0x72, 0x61, 0x63, 0x6B, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x5d, 0xf6, 0xe0, 0xe2
        ]
    );
}

#[test]
fn serialize_ping() {
    let mut buf = Vec::new();
    write_message(&mut buf, BTC_MAGIC, PVER, &NetworkMessage::Ping(100)).unwrap();
    assert_eq!(
        buf,
        vec![
            0xf9, 0xbe, 0xb4, 0xd9, 0x70, 0x69, 0x6e, 0x67, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x24, 0x67, 0xf1, 0x1d, 0x64, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00
        ]
    );
}

fn sample_version() -> VersionMessage {
    let receiver: std::net::SocketAddr = "91.240.140.128:48333".parse().unwrap();
    let sender: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    VersionMessage {
        version: 70015,
        services: 0x409,
        timestamp: 1_548_554_224,
        receiver: Address::new(&receiver, 1),
        sender: Address::new(&sender, 0x409),
        nonce: 13_952_548_347_456_104_954,
        user_agent: "/Satoshi:0.17.1/".to_string(),
        start_height: 560_275,
        relay: true,
    }
}

#[test]
fn all_control_messages_round_trip() {
    round_trip(NetworkMessage::Version(sample_version()));
    round_trip(NetworkMessage::Verack);
    round_trip(NetworkMessage::SendAddrV2);
    round_trip(NetworkMessage::GetAddr);
    round_trip(NetworkMessage::MemPool);
    round_trip(NetworkMessage::SendHeaders);
    round_trip(NetworkMessage::FilterClear);
    round_trip(NetworkMessage::Ping(0xDEAD));
    round_trip(NetworkMessage::Pong(0xBEEF));
    round_trip(NetworkMessage::FeeFilter(1000));
}

#[test]
fn data_messages_round_trip() {
    let inv = vec![
        Inventory::Tx(Txid::from_byte_array([5; 32])),
        Inventory::Block(BlockHash::from_byte_array([6; 32])),
    ];
    round_trip(NetworkMessage::Inv(inv.clone()));
    round_trip(NetworkMessage::GetData(inv.clone()));
    round_trip(NetworkMessage::NotFound(inv));

    round_trip(NetworkMessage::GetHeaders(GetHeadersMessage::new(
        vec![BlockHash::from_byte_array([7; 32])],
        BlockHash::all_zeros(),
    )));

    let genesis = chain_params(ChainKind::Bitcoin, Network::Mainnet).genesis;
    round_trip(NetworkMessage::Headers(vec![genesis]));

    round_trip(NetworkMessage::Addr(vec![TimedAddress {
        time: 1_700_000_000,
        address: Address::new(&"10.0.0.1:8333".parse().unwrap(), 1),
    }]));
    round_trip(NetworkMessage::AddrV2(vec![AddrV2Message {
        time: 1_700_000_000,
        services: 1,
        network: ADDRV2_NETWORK_IPV4,
        addr: vec![10, 0, 0, 2],
        port: 8333,
    }]));

    round_trip(NetworkMessage::Reject(Reject {
        message: "tx".to_string(),
        ccode: RejectCode::Dust,
        reason: "dust".to_string(),
        hash: Some([9; 32]),
    }));
}

#[test]
fn filter_messages_round_trip() {
    round_trip(NetworkMessage::GetCFilters(GetCFilters {
        filter_type: 0,
        start_height: 1,
        stop_hash: BlockHash::from_byte_array([1; 32]),
    }));
    round_trip(NetworkMessage::CFilter(CFilter {
        filter_type: 0,
        block_hash: BlockHash::from_byte_array([2; 32]),
        filter: vec![0x01, 0xAA, 0xBB],
    }));
    round_trip(NetworkMessage::GetCFHeaders(GetCFHeaders {
        filter_type: 0,
        start_height: 1000,
        stop_hash: BlockHash::from_byte_array([3; 32]),
    }));
    round_trip(NetworkMessage::CFHeaders(CFHeaders {
        filter_type: 0,
        stop_hash: BlockHash::from_byte_array([4; 32]),
        previous_filter_header: FilterHeader::all_zeros(),
        filter_hashes: vec![FilterHash::from_byte_array([5; 32])],
    }));
    round_trip(NetworkMessage::GetCFCheckpt(GetCFCheckpt {
        filter_type: 0,
        stop_hash: BlockHash::from_byte_array([6; 32]),
    }));
    round_trip(NetworkMessage::CFCheckpt(CFCheckpt {
        filter_type: 0,
        stop_hash: BlockHash::from_byte_array([7; 32]),
        filter_headers: vec![FilterHeader::from_byte_array([8; 32])],
    }));
}

fn sample_tx() -> Transaction {
    Transaction {
        version: 2,
        input: vec![TxIn {
            previous_output: OutPoint::new(Txid::from_byte_array([3; 32]), 1),
            script_sig: ScriptBuf::new(),
            sequence: 0xFFFF_FFFF,
            witness: vec![vec![0x30, 0x45], vec![0x02, 0x21]],
        }],
        output: vec![TxOut {
            value: 100_000,
            script_pubkey: ScriptBuf::from_bytes(vec![0x00, 0x14, 0x55]),
        }],
        lock_time: 0,
        mweb: None,
    }
}

#[test]
fn tx_message_round_trips_on_both_chains() {
    // A segwit tx is valid framing on both chains; the decoder chosen by
    // the peer's chain variant must produce the same result.
    round_trip_on(ChainKind::Bitcoin, NetworkMessage::Tx(sample_tx()));
    round_trip_on(ChainKind::Litecoin, NetworkMessage::Tx(sample_tx()));
}

#[test]
fn foreign_magic_rejected_and_drained() {
    let mut buf = Vec::new();
    write_message(&mut buf, 0xDBB6_C0FB, PVER, &NetworkMessage::Ping(7)).unwrap();
    // Append a valid message after the foreign one.
    write_message(&mut buf, BTC_MAGIC, PVER, &NetworkMessage::Pong(7)).unwrap();

    let mut cursor = Cursor::new(&buf[..]);
    let err = read_message(&mut cursor, ChainKind::Bitcoin, BTC_MAGIC, PVER).unwrap_err();
    assert!(matches!(err, Error::ForeignNetwork(0xDBB6_C0FB)));

    // The stream resynchronized: the next message parses.
    let (msg, _) = read_message(&mut cursor, ChainKind::Bitcoin, BTC_MAGIC, PVER).unwrap();
    assert_eq!(msg, NetworkMessage::Pong(7));
}

#[test]
fn unknown_command_rejected_and_drained() {
    let mut buf = Vec::new();
    // Hand-build a frame for a command we do not implement.
    let payload = [0xAAu8; 5];
    let digest = crate::hash_types::sha256d(&payload);
    buf.extend_from_slice(&BTC_MAGIC.to_le_bytes());
    buf.extend_from_slice(b"wtxidrelay\0\0");
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&digest[0..4]);
    buf.extend_from_slice(&payload);
    write_message(&mut buf, BTC_MAGIC, PVER, &NetworkMessage::Ping(1)).unwrap();

    let mut cursor = Cursor::new(&buf[..]);
    let err = read_message(&mut cursor, ChainKind::Bitcoin, BTC_MAGIC, PVER).unwrap_err();
    assert!(err.is_unknown_message());
    let (msg, _) = read_message(&mut cursor, ChainKind::Bitcoin, BTC_MAGIC, PVER).unwrap();
    assert_eq!(msg, NetworkMessage::Ping(1));
}

#[test]
fn malformed_command_rejected() {
    let mut buf = Vec::new();
    let payload: [u8; 0] = [];
    let digest = crate::hash_types::sha256d(&payload);
    buf.extend_from_slice(&BTC_MAGIC.to_le_bytes());
    buf.extend_from_slice(&[0xFF, 0x00, 0x70, 0x69, 0x6e, 0x67, 0, 0, 0, 0, 0, 0]);
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&digest[0..4]);

    let mut cursor = Cursor::new(&buf[..]);
    let err = read_message(&mut cursor, ChainKind::Bitcoin, BTC_MAGIC, PVER).unwrap_err();
    assert!(matches!(err, Error::MalformedCommand(_)));
}

#[test]
fn checksum_mismatch_rejected() {
    let mut buf = Vec::new();
    write_message(&mut buf, BTC_MAGIC, PVER, &NetworkMessage::Ping(42)).unwrap();
    // Corrupt one payload byte.
    let last = buf.len() - 1;
    buf[last] ^= 0x01;
    let mut cursor = Cursor::new(&buf[..]);
    let err = read_message(&mut cursor, ChainKind::Bitcoin, BTC_MAGIC, PVER).unwrap_err();
    assert!(matches!(err, Error::ChecksumMismatch { .. }));
}

#[test]
fn per_command_payload_limit_enforced() {
    // A ping frame claiming a 16-byte payload exceeds ping's 8-byte max.
    let payload = [0u8; 16];
    let digest = crate::hash_types::sha256d(&payload);
    let mut buf = Vec::new();
    buf.extend_from_slice(&BTC_MAGIC.to_le_bytes());
    buf.extend_from_slice(b"ping\0\0\0\0\0\0\0\0");
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&digest[0..4]);
    buf.extend_from_slice(&payload);
    write_message(&mut buf, BTC_MAGIC, PVER, &NetworkMessage::Pong(3)).unwrap();

    let mut cursor = Cursor::new(&buf[..]);
    let err = read_message(&mut cursor, ChainKind::Bitcoin, BTC_MAGIC, PVER).unwrap_err();
    assert!(matches!(err, Error::PayloadTooLarge { max: 8, .. }));
    // Drained past the bogus payload.
    let (msg, _) = read_message(&mut cursor, ChainKind::Bitcoin, BTC_MAGIC, PVER).unwrap();
    assert_eq!(msg, NetworkMessage::Pong(3));
}

#[test]
fn global_payload_limit_is_fatal() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&BTC_MAGIC.to_le_bytes());
    buf.extend_from_slice(b"block\0\0\0\0\0\0\0");
    buf.extend_from_slice(&(MAX_MESSAGE_PAYLOAD + 1).to_le_bytes());
    buf.extend_from_slice(&[0u8; 4]);

    let mut cursor = Cursor::new(&buf[..]);
    let err = read_message(&mut cursor, ChainKind::Bitcoin, BTC_MAGIC, PVER).unwrap_err();
    assert!(matches!(err, Error::PayloadTooLarge { .. }));
}

#[test]
fn command_string_length_enforced() {
    assert!(CommandString::try_from_static("getcfcheckpt").is_ok());
    assert!(CommandString::try_from_static("thirteenchars").is_err());
}

#[test]
fn headers_entry_with_transactions_rejected() {
    let genesis = chain_params(ChainKind::Bitcoin, Network::Mainnet).genesis;
    let mut payload = Vec::new();
    VarInt(1).consensus_encode(&mut payload).unwrap();
    genesis.consensus_encode(&mut payload).unwrap();
    payload.push(0x01); // nonzero tx count
    assert!(decode_payload(ChainKind::Bitcoin, "headers", &payload).is_err());
}

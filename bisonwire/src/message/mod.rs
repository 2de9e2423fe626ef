//! The framed message envelope and the `NetworkMessage` payload enum.
//!
//! Every message on the wire is a 24-byte header (magic, command, payload
//! length, checksum) followed by the payload. The header is
//! chain-agnostic; payload decoding dispatches on the command and, for
//! `tx` and `block`, on the chain variant bound to the reading peer.

pub mod address;
pub mod blockdata;
pub mod filter;
pub mod network;

use std::borrow::Cow;
use std::io;

use crate::block::{self, Block, BlockHeader};
use crate::encode::{discard_bytes, serialize, Decodable, Encodable, VarInt};
use crate::error::{Error, Result};
use crate::hash_types::sha256d;
use crate::message::address::{AddrV2Message, TimedAddress};
use crate::message::blockdata::{GetBlocksMessage, GetHeadersMessage, Inventory};
use crate::message::filter::{
    CFCheckpt, CFHeaders, CFilter, GetCFCheckpt, GetCFHeaders, GetCFilters,
};
use crate::message::network::{Reject, VersionMessage};
use crate::params::ChainKind;
use crate::transaction::{self, Transaction};

/// Size of the fixed message header.
pub const MESSAGE_HEADER_SIZE: usize = 24;
/// Size of the command field within the header.
pub const COMMAND_SIZE: usize = 12;
/// Global ceiling on any payload, regardless of command.
pub const MAX_MESSAGE_PAYLOAD: u32 = 32 * 1024 * 1024; // 32 MiB

/// A validated, bounded command string: at most 12 bytes of ASCII.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandString(Cow<'static, str>);

impl CommandString {
    /// Wraps a static string, failing if it exceeds the field width.
    pub fn try_from_static(s: &'static str) -> Result<CommandString> {
        if s.len() > COMMAND_SIZE {
            return Err(Error::CommandTooLong(s.to_string()));
        }
        Ok(CommandString(Cow::Borrowed(s)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The NUL-padded 12-byte header field.
    pub fn to_field(&self) -> [u8; COMMAND_SIZE] {
        let mut field = [0u8; COMMAND_SIZE];
        field[..self.0.len()].copy_from_slice(self.0.as_bytes());
        field
    }
}

impl std::fmt::Display for CommandString {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A wire message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMessage {
    Version(VersionMessage),
    Verack,
    SendAddrV2,
    Addr(Vec<TimedAddress>),
    AddrV2(Vec<AddrV2Message>),
    GetAddr,
    Ping(u64),
    Pong(u64),
    GetHeaders(GetHeadersMessage),
    Headers(Vec<BlockHeader>),
    GetBlocks(GetBlocksMessage),
    Inv(Vec<Inventory>),
    GetData(Vec<Inventory>),
    NotFound(Vec<Inventory>),
    Block(Block),
    Tx(Transaction),
    MemPool,
    FeeFilter(i64),
    SendHeaders,
    Reject(Reject),
    Alert(Vec<u8>),
    /// BIP37 messages are recognized so a round trip preserves them, but
    /// this wallet never constructs bloom filters.
    FilterLoad(Vec<u8>),
    FilterAdd(Vec<u8>),
    FilterClear,
    MerkleBlock(Vec<u8>),
    GetCFilters(GetCFilters),
    CFilter(CFilter),
    GetCFHeaders(GetCFHeaders),
    CFHeaders(CFHeaders),
    GetCFCheckpt(GetCFCheckpt),
    CFCheckpt(CFCheckpt),
}

impl NetworkMessage {
    /// The message command as a static string.
    pub fn cmd(&self) -> &'static str {
        match self {
            NetworkMessage::Version(_) => "version",
            NetworkMessage::Verack => "verack",
            NetworkMessage::SendAddrV2 => "sendaddrv2",
            NetworkMessage::Addr(_) => "addr",
            NetworkMessage::AddrV2(_) => "addrv2",
            NetworkMessage::GetAddr => "getaddr",
            NetworkMessage::Ping(_) => "ping",
            NetworkMessage::Pong(_) => "pong",
            NetworkMessage::GetHeaders(_) => "getheaders",
            NetworkMessage::Headers(_) => "headers",
            NetworkMessage::GetBlocks(_) => "getblocks",
            NetworkMessage::Inv(_) => "inv",
            NetworkMessage::GetData(_) => "getdata",
            NetworkMessage::NotFound(_) => "notfound",
            NetworkMessage::Block(_) => "block",
            NetworkMessage::Tx(_) => "tx",
            NetworkMessage::MemPool => "mempool",
            NetworkMessage::FeeFilter(_) => "feefilter",
            NetworkMessage::SendHeaders => "sendheaders",
            NetworkMessage::Reject(_) => "reject",
            NetworkMessage::Alert(_) => "alert",
            NetworkMessage::FilterLoad(_) => "filterload",
            NetworkMessage::FilterAdd(_) => "filteradd",
            NetworkMessage::FilterClear => "filterclear",
            NetworkMessage::MerkleBlock(_) => "merkleblock",
            NetworkMessage::GetCFilters(_) => "getcfilters",
            NetworkMessage::CFilter(_) => "cfilter",
            NetworkMessage::GetCFHeaders(_) => "getcfheaders",
            NetworkMessage::CFHeaders(_) => "cfheaders",
            NetworkMessage::GetCFCheckpt(_) => "getcfcheckpt",
            NetworkMessage::CFCheckpt(_) => "cfcheckpt",
        }
    }

    /// The command as a bounded string.
    pub fn command(&self) -> CommandString {
        CommandString::try_from_static(self.cmd()).expect("built-in commands fit the field")
    }
}

/// Whether this implementation has a constructor for a command.
pub fn is_known_command(cmd: &str) -> bool {
    matches!(
        cmd,
        "version"
            | "verack"
            | "sendaddrv2"
            | "addr"
            | "addrv2"
            | "getaddr"
            | "ping"
            | "pong"
            | "getheaders"
            | "headers"
            | "getblocks"
            | "inv"
            | "getdata"
            | "notfound"
            | "block"
            | "tx"
            | "mempool"
            | "feefilter"
            | "sendheaders"
            | "reject"
            | "alert"
            | "filterload"
            | "filteradd"
            | "filterclear"
            | "merkleblock"
            | "getcfilters"
            | "cfilter"
            | "getcfheaders"
            | "cfheaders"
            | "getcfcheckpt"
            | "cfcheckpt"
    )
}

/// Per-command payload ceiling. A malicious peer can forge any length
/// field; this is what stops a well-formed header from forcing a huge
/// read.
pub fn max_payload_len(cmd: &str, _pver: u32) -> u32 {
    match cmd {
        "verack" | "sendaddrv2" | "getaddr" | "mempool" | "sendheaders" | "filterclear" => 0,
        "ping" | "pong" | "feefilter" => 8,
        "version" => 358,
        "addr" => 3 + 1000 * 30,
        "addrv2" => 3 + 1000 * 531,
        "inv" | "getdata" | "notfound" => 9 + 50_000 * 36,
        "getheaders" | "getblocks" => 4 + 9 + 500 * 32 + 32,
        "headers" => 9 + 2000 * 81,
        "block" | "tx" | "merkleblock" => 4_000_000,
        "filterload" => 36_012,
        "filteradd" => 529,
        "getcfilters" | "getcfheaders" => 37,
        "getcfcheckpt" => 33,
        "cfilter" => 1 + 32 + 9 + 256 * 1024,
        "cfheaders" => 1 + 32 + 32 + 9 + 2000 * 32,
        _ => MAX_MESSAGE_PAYLOAD,
    }
}

/// The parsed 24-byte envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: u32,
    pub command: [u8; COMMAND_SIZE],
    pub length: u32,
    pub checksum: [u8; 4],
}

impl MessageHeader {
    pub fn from_bytes(buf: &[u8; MESSAGE_HEADER_SIZE]) -> MessageHeader {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        let mut command = [0u8; COMMAND_SIZE];
        command.copy_from_slice(&buf[4..16]);
        let mut length = [0u8; 4];
        length.copy_from_slice(&buf[16..20]);
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&buf[20..24]);
        MessageHeader {
            magic: u32::from_le_bytes(magic),
            command,
            length: u32::from_le_bytes(length),
            checksum,
        }
    }

    /// Extracts the command, enforcing NUL padding and ASCII content.
    pub fn command_str(&self) -> Result<&str> {
        let end = self
            .command
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(COMMAND_SIZE);
        let bytes = &self.command[..end];
        if !self.command[end..].iter().all(|&b| b == 0) {
            return Err(Error::MalformedCommand(self.command));
        }
        if !bytes.iter().all(|&b| b.is_ascii() && !b.is_ascii_control()) {
            return Err(Error::MalformedCommand(self.command));
        }
        std::str::from_utf8(bytes).map_err(|_| Error::MalformedCommand(self.command))
    }
}

/// Serializes a message's payload bytes.
pub fn encode_payload(msg: &NetworkMessage) -> Vec<u8> {
    match msg {
        NetworkMessage::Version(m) => serialize(m),
        NetworkMessage::Addr(m) => serialize(m),
        NetworkMessage::AddrV2(m) => serialize(m),
        NetworkMessage::Ping(n) | NetworkMessage::Pong(n) => serialize(n),
        NetworkMessage::GetHeaders(m) => serialize(m),
        NetworkMessage::Headers(headers) => serialize(&HeadersWrapper(headers)),
        NetworkMessage::GetBlocks(m) => serialize(m),
        NetworkMessage::Inv(m) | NetworkMessage::GetData(m) | NetworkMessage::NotFound(m) => {
            serialize(m)
        }
        NetworkMessage::Block(m) => serialize(m),
        NetworkMessage::Tx(m) => serialize(m),
        NetworkMessage::FeeFilter(n) => serialize(n),
        NetworkMessage::Reject(m) => serialize(m),
        NetworkMessage::Alert(m)
        | NetworkMessage::FilterLoad(m)
        | NetworkMessage::FilterAdd(m)
        | NetworkMessage::MerkleBlock(m) => m.clone(),
        NetworkMessage::GetCFilters(m) => serialize(m),
        NetworkMessage::CFilter(m) => serialize(m),
        NetworkMessage::GetCFHeaders(m) => serialize(m),
        NetworkMessage::CFHeaders(m) => serialize(m),
        NetworkMessage::GetCFCheckpt(m) => serialize(m),
        NetworkMessage::CFCheckpt(m) => serialize(m),
        NetworkMessage::Verack
        | NetworkMessage::SendAddrV2
        | NetworkMessage::GetAddr
        | NetworkMessage::MemPool
        | NetworkMessage::SendHeaders
        | NetworkMessage::FilterClear => Vec::new(),
    }
}

/// Constructs the typed message for a command from its payload bytes.
/// This is the per-chain empty-message constructor and decode step rolled
/// into one: `tx` and `block` parse under the peer's chain variant.
pub fn decode_payload(chain: ChainKind, cmd: &str, payload: &[u8]) -> Result<NetworkMessage> {
    use crate::encode::deserialize;

    let msg = match cmd {
        "version" => {
            // Tolerate trailing bytes: later protocol versions append
            // fields we do not parse.
            let mut cursor = io::Cursor::new(payload);
            NetworkMessage::Version(VersionMessage::consensus_decode(&mut cursor)?)
        }
        "verack" => NetworkMessage::Verack,
        "sendaddrv2" => NetworkMessage::SendAddrV2,
        "addr" => NetworkMessage::Addr(deserialize(payload)?),
        "addrv2" => NetworkMessage::AddrV2(deserialize(payload)?),
        "getaddr" => NetworkMessage::GetAddr,
        "ping" => NetworkMessage::Ping(deserialize(payload)?),
        "pong" => NetworkMessage::Pong(deserialize(payload)?),
        "getheaders" => NetworkMessage::GetHeaders(deserialize(payload)?),
        "headers" => {
            let wrapper: HeadersWrapperOwned = deserialize(payload)?;
            NetworkMessage::Headers(wrapper.0)
        }
        "getblocks" => NetworkMessage::GetBlocks(deserialize(payload)?),
        "inv" => NetworkMessage::Inv(deserialize(payload)?),
        "getdata" => NetworkMessage::GetData(deserialize(payload)?),
        "notfound" => NetworkMessage::NotFound(deserialize(payload)?),
        "block" => {
            let mut cursor = io::Cursor::new(payload);
            let block = block::decode_block(chain, &mut cursor)?;
            if cursor.position() != payload.len() as u64 {
                return Err(Error::ParseFailed("trailing bytes after block"));
            }
            NetworkMessage::Block(block)
        }
        "tx" => {
            let mut cursor = io::Cursor::new(payload);
            let tx = transaction::decode_transaction(chain, &mut cursor)?;
            if cursor.position() != payload.len() as u64 {
                return Err(Error::ParseFailed("trailing bytes after transaction"));
            }
            NetworkMessage::Tx(tx)
        }
        "mempool" => NetworkMessage::MemPool,
        "feefilter" => NetworkMessage::FeeFilter(deserialize(payload)?),
        "sendheaders" => NetworkMessage::SendHeaders,
        "reject" => NetworkMessage::Reject(deserialize(payload)?),
        "alert" => NetworkMessage::Alert(payload.to_vec()),
        "filterload" => NetworkMessage::FilterLoad(payload.to_vec()),
        "filteradd" => NetworkMessage::FilterAdd(payload.to_vec()),
        "filterclear" => NetworkMessage::FilterClear,
        "merkleblock" => NetworkMessage::MerkleBlock(payload.to_vec()),
        "getcfilters" => NetworkMessage::GetCFilters(deserialize(payload)?),
        "cfilter" => NetworkMessage::CFilter(deserialize(payload)?),
        "getcfheaders" => NetworkMessage::GetCFHeaders(deserialize(payload)?),
        "cfheaders" => NetworkMessage::CFHeaders(deserialize(payload)?),
        "getcfcheckpt" => NetworkMessage::GetCFCheckpt(deserialize(payload)?),
        "cfcheckpt" => NetworkMessage::CFCheckpt(deserialize(payload)?),
        other => return Err(Error::UnknownMessage(other.to_string())),
    };
    Ok(msg)
}

/// Verifies the envelope checksum: first four bytes of double-SHA-256.
pub fn verify_checksum(cmd: &str, payload: &[u8], expected: [u8; 4]) -> Result<()> {
    let digest = sha256d(payload);
    let actual = [digest[0], digest[1], digest[2], digest[3]];
    if actual != expected {
        return Err(Error::ChecksumMismatch {
            command: cmd.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Writes a complete framed message, returning the number of bytes
/// written.
pub fn write_message<W: io::Write + ?Sized>(
    w: &mut W,
    magic: u32,
    pver: u32,
    msg: &NetworkMessage,
) -> Result<usize> {
    let command = msg.command();
    let payload = encode_payload(msg);

    if payload.len() as u64 > u64::from(MAX_MESSAGE_PAYLOAD) {
        return Err(Error::PayloadTooLarge {
            command: command.as_str().to_string(),
            length: payload.len() as u32,
            max: MAX_MESSAGE_PAYLOAD,
        });
    }
    let max = max_payload_len(command.as_str(), pver);
    if payload.len() as u64 > u64::from(max) {
        return Err(Error::PayloadTooLarge {
            command: command.as_str().to_string(),
            length: payload.len() as u32,
            max,
        });
    }

    let digest = sha256d(&payload);
    let mut header = [0u8; MESSAGE_HEADER_SIZE];
    header[0..4].copy_from_slice(&magic.to_le_bytes());
    header[4..16].copy_from_slice(&command.to_field());
    header[16..20].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    header[20..24].copy_from_slice(&digest[0..4]);

    w.write_all(&header)?;
    if !payload.is_empty() {
        w.write_all(&payload)?;
    }
    Ok(MESSAGE_HEADER_SIZE + payload.len())
}

/// Reads, validates, and decodes the next message from a blocking stream.
///
/// Returns the message and the total bytes consumed, including any drained
/// payload when the message had to be rejected after its header. Rejected
/// payloads are discarded in 10 KiB chunks so the stream stays in sync.
pub fn read_message<R: io::Read + ?Sized>(
    r: &mut R,
    chain: ChainKind,
    magic: u32,
    pver: u32,
) -> Result<(NetworkMessage, usize)> {
    let mut header_buf = [0u8; MESSAGE_HEADER_SIZE];
    r.read_exact(&mut header_buf)?;
    let header = MessageHeader::from_bytes(&header_buf);
    let mut consumed = MESSAGE_HEADER_SIZE;

    // An oversized length field cannot be drained in good conscience; the
    // connection is done for.
    if header.length > MAX_MESSAGE_PAYLOAD {
        return Err(Error::PayloadTooLarge {
            command: String::from_utf8_lossy(&header.command).into_owned(),
            length: header.length,
            max: MAX_MESSAGE_PAYLOAD,
        });
    }

    if header.magic != magic {
        discard_bytes(r, u64::from(header.length))?;
        return Err(Error::ForeignNetwork(header.magic));
    }

    let cmd = match header.command_str() {
        Ok(cmd) => cmd.to_string(),
        Err(err) => {
            discard_bytes(r, u64::from(header.length))?;
            return Err(err);
        }
    };

    if !is_known_command(&cmd) {
        discard_bytes(r, u64::from(header.length))?;
        return Err(Error::UnknownMessage(cmd));
    }

    let max = max_payload_len(&cmd, pver);
    if header.length > max {
        discard_bytes(r, u64::from(header.length))?;
        return Err(Error::PayloadTooLarge {
            command: cmd,
            length: header.length,
            max,
        });
    }

    let mut payload = vec![0u8; header.length as usize];
    r.read_exact(&mut payload)?;
    consumed += payload.len();

    verify_checksum(&cmd, &payload, header.checksum)?;
    let msg = decode_payload(chain, &cmd, &payload)?;
    Ok((msg, consumed))
}

/// `headers` entries carry a trailing transaction-count varint that must
/// be zero. These wrappers fold that quirk into the codec.
struct HeadersWrapper<'a>(&'a Vec<BlockHeader>);

impl<'a> Encodable for HeadersWrapper<'a> {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = VarInt(self.0.len() as u64).consensus_encode(w)?;
        for header in self.0 {
            len += header.consensus_encode(w)?;
            len += 0u8.consensus_encode(w)?;
        }
        Ok(len)
    }
}

struct HeadersWrapperOwned(Vec<BlockHeader>);

impl Decodable for HeadersWrapperOwned {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        let len = VarInt::consensus_decode(r)?.0;
        if len > 16 * 1024 {
            return Err(Error::OversizedVectorAllocation {
                requested: len,
                max: 16 * 1024,
            });
        }
        let mut headers = Vec::with_capacity(len as usize);
        for _ in 0..len {
            headers.push(BlockHeader::consensus_decode(r)?);
            if u8::consensus_decode(r)? != 0 {
                return Err(Error::ParseFailed("headers message entry carries transactions"));
            }
        }
        Ok(HeadersWrapperOwned(headers))
    }
}

#[cfg(test)]
mod tests;

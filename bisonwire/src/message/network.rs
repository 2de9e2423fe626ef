//! Handshake and control message payloads.

use std::io;

use crate::encode::{Decodable, Encodable};
use crate::error::{Error, Result};
use crate::message::address::Address;

/// The `version` message, first in either direction on a new connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: u32,
    pub services: u64,
    pub timestamp: i64,
    /// Address of the peer this message is sent to, as seen by the sender.
    pub receiver: Address,
    /// Address of the sender. Mostly junk on the modern network.
    pub sender: Address,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
}

impl Encodable for VersionMessage {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.version.consensus_encode(w)?;
        len += self.services.consensus_encode(w)?;
        len += self.timestamp.consensus_encode(w)?;
        len += self.receiver.consensus_encode(w)?;
        len += self.sender.consensus_encode(w)?;
        len += self.nonce.consensus_encode(w)?;
        len += self.user_agent.consensus_encode(w)?;
        len += self.start_height.consensus_encode(w)?;
        len += self.relay.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for VersionMessage {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        let version = u32::consensus_decode(r)?;
        let services = u64::consensus_decode(r)?;
        let timestamp = i64::consensus_decode(r)?;
        let receiver = Address::consensus_decode(r)?;
        let sender = Address::consensus_decode(r)?;
        let nonce = u64::consensus_decode(r)?;
        let user_agent = String::consensus_decode(r)?;
        let start_height = i32::consensus_decode(r)?;
        // The relay flag is absent before BIP37 negotiation era peers;
        // treat a short read here as relay = true.
        let relay = match u8::consensus_decode(r) {
            Ok(b) => b != 0,
            Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof => true,
            Err(e) => return Err(e),
        };
        Ok(VersionMessage {
            version,
            services,
            timestamp,
            receiver,
            sender,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }
}

/// Machine-readable reasons carried by a `reject` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
    Malformed,
    Invalid,
    Obsolete,
    Duplicate,
    NonStandard,
    Dust,
    InsufficientFee,
    Checkpoint,
    /// A code this implementation does not know.
    Unknown(u8),
}

impl RejectCode {
    pub fn to_byte(self) -> u8 {
        match self {
            RejectCode::Malformed => 0x01,
            RejectCode::Invalid => 0x10,
            RejectCode::Obsolete => 0x11,
            RejectCode::Duplicate => 0x12,
            RejectCode::NonStandard => 0x40,
            RejectCode::Dust => 0x41,
            RejectCode::InsufficientFee => 0x42,
            RejectCode::Checkpoint => 0x43,
            RejectCode::Unknown(b) => b,
        }
    }

    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => RejectCode::Malformed,
            0x10 => RejectCode::Invalid,
            0x11 => RejectCode::Obsolete,
            0x12 => RejectCode::Duplicate,
            0x40 => RejectCode::NonStandard,
            0x41 => RejectCode::Dust,
            0x42 => RejectCode::InsufficientFee,
            0x43 => RejectCode::Checkpoint,
            other => RejectCode::Unknown(other),
        }
    }
}

impl std::fmt::Display for RejectCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            RejectCode::Malformed => "malformed",
            RejectCode::Invalid => "invalid",
            RejectCode::Obsolete => "obsolete",
            RejectCode::Duplicate => "duplicate",
            RejectCode::NonStandard => "nonstandard",
            RejectCode::Dust => "dust",
            RejectCode::InsufficientFee => "insufficientfee",
            RejectCode::Checkpoint => "checkpoint",
            RejectCode::Unknown(b) => return write!(f, "unknown({:#04x})", b),
        };
        f.write_str(s)
    }
}

/// The `reject` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reject {
    /// Command of the message being rejected.
    pub message: String,
    pub ccode: RejectCode,
    pub reason: String,
    /// The txid or block hash at issue, present for `tx` and `block`
    /// rejects.
    pub hash: Option<[u8; 32]>,
}

impl Encodable for Reject {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.message.consensus_encode(w)?;
        len += self.ccode.to_byte().consensus_encode(w)?;
        len += self.reason.consensus_encode(w)?;
        if let Some(hash) = &self.hash {
            len += hash.consensus_encode(w)?;
        }
        Ok(len)
    }
}

impl Decodable for Reject {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        let message = String::consensus_decode(r)?;
        let ccode = RejectCode::from_byte(u8::consensus_decode(r)?);
        let reason = String::consensus_decode(r)?;
        let hash = if message == "tx" || message == "block" {
            match <[u8; 32]>::consensus_decode(r) {
                Ok(h) => Some(h),
                Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof => None,
                Err(e) => return Err(e),
            }
        } else {
            None
        };
        Ok(Reject {
            message,
            ccode,
            reason,
            hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{deserialize, serialize};

    #[test]
    fn reject_round_trip_with_hash() {
        let reject = Reject {
            message: "tx".to_string(),
            ccode: RejectCode::InsufficientFee,
            reason: "min relay fee not met".to_string(),
            hash: Some([0xAB; 32]),
        };
        let dec: Reject = deserialize(&serialize(&reject)).unwrap();
        assert_eq!(dec, reject);
    }

    #[test]
    fn reject_round_trip_without_hash() {
        let reject = Reject {
            message: "version".to_string(),
            ccode: RejectCode::Obsolete,
            reason: "protocol too old".to_string(),
            hash: None,
        };
        let dec: Reject = deserialize(&serialize(&reject)).unwrap();
        assert_eq!(dec, reject);
    }

    #[test]
    fn reject_code_bytes() {
        for code in [
            RejectCode::Malformed,
            RejectCode::Invalid,
            RejectCode::Obsolete,
            RejectCode::Duplicate,
            RejectCode::NonStandard,
            RejectCode::Dust,
            RejectCode::InsufficientFee,
            RejectCode::Checkpoint,
        ] {
            assert_eq!(RejectCode::from_byte(code.to_byte()), code);
        }
        assert_eq!(RejectCode::from_byte(0x99), RejectCode::Unknown(0x99));
    }
}

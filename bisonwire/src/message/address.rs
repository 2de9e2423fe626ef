//! Peer address gossip payloads, legacy and BIP155.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::encode::{self, Decodable, Encodable, VarInt};
use crate::error::{Error, Result};

/// A legacy network address record: services plus an IPv6-mapped address
/// and port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub services: u64,
    pub address: [u8; 16],
    pub port: u16,
}

impl Address {
    pub fn new(socket: &SocketAddr, services: u64) -> Address {
        let address = match socket.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        };
        Address {
            services,
            address,
            port: socket.port(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        let v6 = Ipv6Addr::from(self.address);
        match v6.to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), self.port),
            None => SocketAddr::new(IpAddr::V6(v6), self.port),
        }
    }
}

impl Encodable for Address {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.services.consensus_encode(w)?;
        len += self.address.consensus_encode(w)?;
        // Port is big-endian, unlike everything else.
        w.write_all(&self.port.to_be_bytes())?;
        Ok(len + 2)
    }
}

impl Decodable for Address {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        let services = u64::consensus_decode(r)?;
        let address = <[u8; 16]>::consensus_decode(r)?;
        let mut port = [0u8; 2];
        r.read_exact(&mut port)?;
        Ok(Address {
            services,
            address,
            port: u16::from_be_bytes(port),
        })
    }
}

/// BIP155 network identifiers.
pub const ADDRV2_NETWORK_IPV4: u8 = 0x01;
pub const ADDRV2_NETWORK_IPV6: u8 = 0x02;

/// One entry of an `addrv2` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrV2Message {
    pub time: u32,
    pub services: u64,
    pub network: u8,
    /// Network-defined address bytes; 4 for IPv4, 16 for IPv6, other
    /// lengths for networks we do not dial (Tor, I2P, CJDNS).
    pub addr: Vec<u8>,
    pub port: u16,
}

impl AddrV2Message {
    /// Converts to a dialable socket address, when the network is IP.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match (self.network, self.addr.len()) {
            (ADDRV2_NETWORK_IPV4, 4) => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&self.addr);
                Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), self.port))
            }
            (ADDRV2_NETWORK_IPV6, 16) => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&self.addr);
                Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), self.port))
            }
            _ => None,
        }
    }
}

impl Encodable for AddrV2Message {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.time.consensus_encode(w)?;
        len += VarInt(self.services).consensus_encode(w)?;
        len += self.network.consensus_encode(w)?;
        len += self.addr.consensus_encode(w)?;
        w.write_all(&self.port.to_be_bytes())?;
        Ok(len + 2)
    }
}

impl Decodable for AddrV2Message {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        let time = u32::consensus_decode(r)?;
        let services = VarInt::consensus_decode(r)?.0;
        let network = u8::consensus_decode(r)?;
        let addr = Vec::<u8>::consensus_decode(r)?;
        if addr.len() > 512 {
            return Err(Error::ParseFailed("addrv2 address implausibly long"));
        }
        let mut port = [0u8; 2];
        r.read_exact(&mut port)?;
        Ok(AddrV2Message {
            time,
            services,
            network,
            addr,
            port: u16::from_be_bytes(port),
        })
    }
}

/// One entry of a legacy `addr` message: last-seen time plus address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedAddress {
    pub time: u32,
    pub address: Address,
}

impl Encodable for TimedAddress {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        Ok(self.time.consensus_encode(w)? + self.address.consensus_encode(w)?)
    }
}

impl Decodable for TimedAddress {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self> {
        Ok(TimedAddress {
            time: u32::consensus_decode(r)?,
            address: Address::consensus_decode(r)?,
        })
    }
}

encode::impl_vec!(TimedAddress);
encode::impl_vec!(AddrV2Message);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{deserialize, serialize};

    #[test]
    fn legacy_address_round_trip() {
        let socket: SocketAddr = "203.0.113.7:8333".parse().unwrap();
        let addr = Address::new(&socket, 1);
        let enc = serialize(&addr);
        assert_eq!(enc.len(), 26);
        // Port serializes big-endian.
        assert_eq!(&enc[24..], &8333u16.to_be_bytes());
        let dec: Address = deserialize(&enc).unwrap();
        assert_eq!(dec, addr);
        assert_eq!(dec.socket_addr(), socket);
    }

    #[test]
    fn addrv2_ipv4_round_trip() {
        let msg = AddrV2Message {
            time: 1_700_000_000,
            services: 0x409,
            network: ADDRV2_NETWORK_IPV4,
            addr: vec![203, 0, 113, 7],
            port: 9333,
        };
        let dec: AddrV2Message = deserialize(&serialize(&msg)).unwrap();
        assert_eq!(dec, msg);
        assert_eq!(dec.socket_addr(), Some("203.0.113.7:9333".parse().unwrap()));
    }

    #[test]
    fn addrv2_unknown_network_is_not_dialable() {
        let msg = AddrV2Message {
            time: 0,
            services: 0,
            network: 0x04, // Tor v3
            addr: vec![0; 32],
            port: 0,
        };
        assert_eq!(msg.socket_addr(), None);
    }
}

//! Framed message transport over a TCP stream.
//!
//! Async framing mirrors the blocking codec in `bisonwire`: read the
//! 24-byte envelope, validate, then read (or drain) the payload. Both
//! directions feed the shared byte counters for `net_totals`.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use bisonwire::message::{
    self, MessageHeader, NetworkMessage, MAX_MESSAGE_PAYLOAD, MESSAGE_HEADER_SIZE,
};
use bisonwire::{ChainKind, ChainParams, Error as WireError};

use crate::error::{NetworkError, NetworkResult};
use crate::network::constants::CONNECT_TIMEOUT;
use crate::types::NetTotals;

/// A connected, framed peer transport (pre-split).
pub struct Connection {
    pub addr: SocketAddr,
    reader: MessageReader,
    writer: MessageWriter,
}

impl Connection {
    /// Dials `addr` and wraps the stream in the chain's framing.
    pub async fn dial(
        addr: SocketAddr,
        params: &'static ChainParams,
        totals: Arc<NetTotals>,
    ) -> NetworkResult<Connection> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| NetworkError::Timeout)?
            .map_err(|e| NetworkError::ConnectionFailed(format!("{addr}: {e}")))?;
        stream.set_nodelay(true).ok();
        Ok(Connection::from_stream(stream, addr, params, totals))
    }

    /// Wraps an already-connected stream.
    pub fn from_stream(
        stream: TcpStream,
        addr: SocketAddr,
        params: &'static ChainParams,
        totals: Arc<NetTotals>,
    ) -> Connection {
        let (read_half, write_half) = stream.into_split();
        Connection {
            addr,
            reader: MessageReader {
                inner: BufReader::new(read_half),
                chain: params.chain,
                magic: params.magic,
                pver: crate::network::constants::PROTOCOL_VERSION,
                totals: totals.clone(),
            },
            writer: MessageWriter {
                inner: write_half,
                magic: params.magic,
                pver: crate::network::constants::PROTOCOL_VERSION,
                totals,
            },
        }
    }

    pub async fn send(&mut self, msg: &NetworkMessage) -> NetworkResult<()> {
        self.writer.send(msg).await
    }

    pub async fn recv(&mut self) -> NetworkResult<NetworkMessage> {
        self.reader.recv().await
    }

    /// Locks in the negotiated protocol version after the handshake.
    pub fn set_protocol_version(&mut self, pver: u32) {
        self.reader.pver = pver;
        self.writer.pver = pver;
    }

    /// Splits into independently owned read and write halves.
    pub fn split(self) -> (MessageReader, MessageWriter) {
        (self.reader, self.writer)
    }
}

/// The owned receive half of a connection.
pub struct MessageReader {
    inner: BufReader<OwnedReadHalf>,
    chain: ChainKind,
    magic: u32,
    pver: u32,
    totals: Arc<NetTotals>,
}

impl MessageReader {
    /// Reads the next message.
    ///
    /// Rejected payloads (foreign magic, malformed or unknown command,
    /// oversized for the command) are drained in bounded chunks so the
    /// stream stays framed, then surfaced as errors. The caller decides
    /// which are fatal; `Error::UnknownMessage` usually is not.
    pub async fn recv(&mut self) -> NetworkResult<NetworkMessage> {
        let mut header_buf = [0u8; MESSAGE_HEADER_SIZE];
        self.inner
            .read_exact(&mut header_buf)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => NetworkError::PeerClosed,
                _ => NetworkError::Io(e),
            })?;
        self.totals.add_in(MESSAGE_HEADER_SIZE as u64);
        let header = MessageHeader::from_bytes(&header_buf);

        // A length beyond the global maximum means the framing cannot be
        // trusted at all; no point draining.
        if header.length > MAX_MESSAGE_PAYLOAD {
            return Err(WireError::PayloadTooLarge {
                command: String::from_utf8_lossy(&header.command).into_owned(),
                length: header.length,
                max: MAX_MESSAGE_PAYLOAD,
            }
            .into());
        }

        if header.magic != self.magic {
            self.drain(header.length).await?;
            return Err(WireError::ForeignNetwork(header.magic).into());
        }

        let cmd = match header.command_str() {
            Ok(cmd) => cmd.to_string(),
            Err(err) => {
                self.drain(header.length).await?;
                return Err(err.into());
            }
        };

        if !message::is_known_command(&cmd) {
            self.drain(header.length).await?;
            return Err(WireError::UnknownMessage(cmd).into());
        }

        let max = message::max_payload_len(&cmd, self.pver);
        if header.length > max {
            self.drain(header.length).await?;
            return Err(WireError::PayloadTooLarge {
                command: cmd,
                length: header.length,
                max,
            }
            .into());
        }

        let mut payload = vec![0u8; header.length as usize];
        self.inner.read_exact(&mut payload).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => NetworkError::PeerClosed,
            _ => NetworkError::Io(e),
        })?;
        self.totals.add_in(payload.len() as u64);

        message::verify_checksum(&cmd, &payload, header.checksum)?;
        Ok(message::decode_payload(self.chain, &cmd, &payload)?)
    }

    /// Discards `n` announced payload bytes in 10 KiB chunks.
    async fn drain(&mut self, mut n: u32) -> NetworkResult<()> {
        let mut buf = [0u8; 10 * 1024];
        while n > 0 {
            let take = std::cmp::min(n as usize, buf.len());
            self.inner.read_exact(&mut buf[..take]).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => NetworkError::PeerClosed,
                _ => NetworkError::Io(e),
            })?;
            self.totals.add_in(take as u64);
            n -= take as u32;
        }
        Ok(())
    }
}

/// The owned send half of a connection.
pub struct MessageWriter {
    inner: OwnedWriteHalf,
    magic: u32,
    pver: u32,
    totals: Arc<NetTotals>,
}

impl MessageWriter {
    pub async fn send(&mut self, msg: &NetworkMessage) -> NetworkResult<()> {
        // Assemble in memory, then one write; the payload ceilings are
        // enforced by the encoder.
        let mut buf = Vec::with_capacity(MESSAGE_HEADER_SIZE + 256);
        let written = message::write_message(&mut buf, self.magic, self.pver, msg)?;
        self.inner.write_all(&buf).await?;
        self.totals.add_out(written as u64);
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        let _ = self.inner.shutdown().await;
    }
}

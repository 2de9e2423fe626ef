//! The version/verack handshake.

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

use bisonwire::message::address::Address;
use bisonwire::message::network::VersionMessage;
use bisonwire::message::NetworkMessage;

use crate::error::{NetworkError, NetworkResult};
use crate::network::connection::Connection;
use crate::network::constants::{HANDSHAKE_TIMEOUT, MIN_PROTOCOL_VERSION, PROTOCOL_VERSION};

/// What the handshake learned about the peer.
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub version: u32,
    pub services: u64,
    pub start_height: i32,
    pub user_agent: String,
    pub relay: bool,
    /// Peer offered `sendaddrv2`, so address gossip uses the BIP155 form.
    pub wants_addrv2: bool,
}

/// Runs the outbound handshake on a fresh connection.
///
/// Sends our `version`, answers the peer's `version` with `verack`
/// (echoing `sendaddrv2` first when offered, as ordering requires), and
/// waits for the peer's `verack`. Peers below protocol 70001 are refused.
pub async fn perform(
    conn: &mut Connection,
    user_agent: &str,
    start_height: i32,
) -> NetworkResult<Negotiated> {
    conn.send(&NetworkMessage::Version(build_version(conn.addr, user_agent, start_height)))
        .await?;

    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
    let mut negotiated: Option<Negotiated> = None;
    let mut verack_received = false;

    loop {
        if verack_received {
            if let Some(mut done) = negotiated.take() {
                // Everything after the handshake speaks the lower of the
                // two versions.
                let pver = std::cmp::min(PROTOCOL_VERSION, done.version);
                conn.set_protocol_version(pver);
                done.version = pver;
                return Ok(done);
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining == Duration::ZERO {
            return Err(NetworkError::Timeout);
        }
        let msg = match tokio::time::timeout(remaining, conn.recv()).await {
            Ok(Ok(msg)) => msg,
            Ok(Err(NetworkError::Wire(err))) if err.is_unknown_message() => continue,
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(NetworkError::Timeout),
        };

        match msg {
            NetworkMessage::Version(version) => {
                if negotiated.is_some() {
                    return Err(NetworkError::DuplicateHandshake);
                }
                if version.version < MIN_PROTOCOL_VERSION {
                    return Err(NetworkError::ObsoleteProtocol(version.version));
                }
                negotiated = Some(Negotiated {
                    version: version.version,
                    services: version.services,
                    start_height: version.start_height,
                    user_agent: version.user_agent.clone(),
                    relay: version.relay,
                    wants_addrv2: false,
                });
                conn.send(&NetworkMessage::Verack).await?;
            }
            NetworkMessage::SendAddrV2 => {
                // Must be answered before our verack per BIP155; if the
                // verack already went out, the peer is early-sending and
                // we just record the capability.
                if let Some(n) = negotiated.as_mut() {
                    n.wants_addrv2 = true;
                } else {
                    conn.send(&NetworkMessage::SendAddrV2).await?;
                }
            }
            NetworkMessage::Verack => {
                verack_received = true;
            }
            NetworkMessage::Ping(nonce) => {
                conn.send(&NetworkMessage::Pong(nonce)).await?;
            }
            other => {
                tracing::trace!("ignoring {} during handshake", other.cmd());
            }
        }
    }
}

fn build_version(remote: SocketAddr, user_agent: &str, start_height: i32) -> VersionMessage {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs() as i64;
    let local: SocketAddr = ([0, 0, 0, 0], 0).into();
    VersionMessage {
        version: PROTOCOL_VERSION,
        // An SPV client serves nothing.
        services: 0,
        timestamp,
        receiver: Address::new(&remote, crate::types::SERVICE_NETWORK),
        sender: Address::new(&local, 0),
        nonce: rand::random(),
        user_agent: user_agent.to_string(),
        start_height,
        // Full mempool relay is pointless for filter-based wallets.
        relay: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NetTotals;
    use bisonwire::{chain_params, ChainKind, Network};
    use std::sync::Arc;
    use tokio::net::{TcpListener, TcpStream};

    async fn connection_pair() -> (Connection, Connection) {
        let params = chain_params(ChainKind::Bitcoin, Network::Regtest);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let totals = Arc::new(NetTotals::new());
        let (client, (server, peer_addr)) =
            tokio::join!(TcpStream::connect(addr), async { listener.accept().await.unwrap() });
        (
            Connection::from_stream(client.unwrap(), addr, params, totals.clone()),
            Connection::from_stream(server, peer_addr, params, totals),
        )
    }

    /// Minimal peer side: send version+sendaddrv2, wait for ours, verack.
    async fn fake_remote(mut conn: Connection, version: u32) {
        let remote_version = VersionMessage {
            version,
            services: crate::types::SERVICE_NETWORK | crate::types::SERVICE_COMPACT_FILTERS,
            timestamp: 0,
            receiver: Address::new(&conn.addr, 0),
            sender: Address::new(&conn.addr, 0),
            nonce: 42,
            user_agent: "/remote:1.0/".into(),
            start_height: 812_345,
            relay: true,
        };
        conn.send(&NetworkMessage::Version(remote_version)).await.unwrap();
        conn.send(&NetworkMessage::SendAddrV2).await.unwrap();
        loop {
            match conn.recv().await.unwrap() {
                NetworkMessage::Version(_) => {
                    conn.send(&NetworkMessage::Verack).await.unwrap();
                }
                NetworkMessage::Verack => break,
                _ => {}
            }
        }
        // Hold the socket open briefly so the initiator can finish.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn successful_handshake() {
        let (mut local, remote) = connection_pair().await;
        let remote_task = tokio::spawn(fake_remote(remote, 70015));
        let negotiated = perform(&mut local, "/test:0.1/", 0).await.unwrap();
        assert_eq!(negotiated.version, 70015);
        assert_eq!(negotiated.start_height, 812_345);
        assert!(negotiated.wants_addrv2);
        assert!(negotiated.services & crate::types::SERVICE_COMPACT_FILTERS != 0);
        remote_task.await.unwrap();
    }

    #[tokio::test]
    async fn obsolete_peer_refused() {
        let (mut local, remote) = connection_pair().await;
        let remote_task = tokio::spawn(async move {
            let mut conn = remote;
            let version = VersionMessage {
                version: 60002,
                services: 0,
                timestamp: 0,
                receiver: Address::new(&conn.addr, 0),
                sender: Address::new(&conn.addr, 0),
                nonce: 1,
                user_agent: "/old/".into(),
                start_height: 0,
                relay: false,
            };
            conn.send(&NetworkMessage::Version(version)).await.unwrap();
            // Drain until the initiator hangs up.
            while conn.recv().await.is_ok() {}
        });
        let err = perform(&mut local, "/test:0.1/", 0).await.unwrap_err();
        assert!(matches!(err, NetworkError::ObsoleteProtocol(60002)));
        drop(local);
        remote_task.await.unwrap();
    }
}

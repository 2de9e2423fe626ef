//! One connected peer: state machine, send queue, and the cooperative
//! tasks that service its socket.
//!
//! Each peer runs a reader task, a writer task, and a liveness task. The
//! reader answers pings and address gossip locally and forwards
//! everything else, in arrival order, onto the client's shared event
//! channel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use bisonwire::message::NetworkMessage;

use crate::error::{NetworkError, NetworkResult};
use crate::network::address_book::AddressBook;
use crate::network::ban::{BanManager, Misbehavior};
use crate::network::connection::{Connection, MessageReader, MessageWriter};
use crate::network::constants::{OUTBOUND_CHANNEL_DEPTH, PING_INTERVAL, PONG_TIMEOUT};
use crate::network::handshake::Negotiated;
use crate::types::{PeerId, PeerInfo, PeerState};

/// Events flowing from peers into the sync manager, per-peer ordered.
#[derive(Debug)]
pub enum PeerEvent {
    Ready(PeerId),
    Message(PeerId, NetworkMessage),
    Disconnected(PeerId),
}

/// Shared handles the peer tasks need.
#[derive(Clone)]
pub(crate) struct PeerContext {
    pub peers: Arc<RwLock<crate::types::PeerMap>>,
    pub events: mpsc::Sender<PeerEvent>,
    pub address_book: Arc<AddressBook>,
    pub bans: Arc<BanManager>,
}

struct PendingPing {
    nonce: u64,
    sent_at: Instant,
}

/// A live peer connection.
pub struct Peer {
    pub id: PeerId,
    pub addr: SocketAddr,
    state: AtomicU8,
    info: RwLock<PeerInfo>,
    outbound: mpsc::Sender<NetworkMessage>,
    cancel: CancellationToken,
    /// Unix seconds of the last inbound traffic.
    last_recv: AtomicU64,
    ping: Mutex<Option<PendingPing>>,
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs()
}

const STATE_READY: u8 = 2;
const STATE_CLOSING: u8 = 3;
const STATE_CLOSED: u8 = 4;

fn state_from_u8(v: u8) -> PeerState {
    match v {
        0 => PeerState::Connecting,
        1 => PeerState::Handshaking,
        2 => PeerState::Ready,
        3 => PeerState::Closing,
        _ => PeerState::Closed,
    }
}

impl Peer {
    /// Takes ownership of a handshaken connection, registers the peer,
    /// and spawns its service tasks.
    pub(crate) async fn spawn(
        id: PeerId,
        conn: Connection,
        negotiated: Negotiated,
        parent_cancel: &CancellationToken,
        ctx: PeerContext,
    ) -> Arc<Peer> {
        let addr = conn.addr;
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_DEPTH);
        let cancel = parent_cancel.child_token();

        let peer = Arc::new(Peer {
            id,
            addr,
            state: AtomicU8::new(STATE_READY),
            info: RwLock::new(PeerInfo {
                id,
                address: addr,
                state: PeerState::Ready,
                version: negotiated.version,
                services: negotiated.services,
                user_agent: negotiated.user_agent,
                start_height: negotiated.start_height,
                connected_at: SystemTime::now(),
                ping_rtt_micros: 0,
                wants_addrv2: negotiated.wants_addrv2,
            }),
            outbound,
            cancel: cancel.clone(),
            last_recv: AtomicU64::new(unix_now()),
            ping: Mutex::new(None),
        });

        ctx.peers.write().await.insert(id, peer.clone());
        // Losing the events channel means the client is gone; tasks will
        // notice and unwind on their own.
        let _ = ctx.events.send(PeerEvent::Ready(id)).await;

        let (reader, writer) = conn.split();
        tokio::spawn(Self::writer_task(peer.clone(), writer, outbound_rx));
        tokio::spawn(Self::reader_task(peer.clone(), reader, ctx.clone()));
        tokio::spawn(Self::liveness_task(peer.clone()));

        peer
    }

    /// Queues a message for the peer's writer task.
    pub async fn send(&self, msg: NetworkMessage) -> NetworkResult<()> {
        if !self.is_ready() {
            return Err(NetworkError::PeerClosed);
        }
        self.outbound.send(msg).await.map_err(|_| NetworkError::PeerClosed)
    }

    pub fn state(&self) -> PeerState {
        state_from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_READY
    }

    pub async fn info(&self) -> PeerInfo {
        let mut info = self.info.read().await.clone();
        info.state = self.state();
        info
    }

    /// Best height the peer claimed at handshake time.
    pub async fn start_height(&self) -> i32 {
        self.info.read().await.start_height
    }

    pub async fn ping_rtt_micros(&self) -> u64 {
        self.info.read().await.ping_rtt_micros
    }

    /// Requests the peer shut down. Idempotent; the reaper path in the
    /// reader task does the actual cleanup.
    pub fn close(&self) {
        self.state
            .compare_exchange(STATE_READY, STATE_CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .ok();
        self.cancel.cancel();
    }

    async fn writer_task(
        peer: Arc<Peer>,
        mut writer: MessageWriter,
        mut outbound_rx: mpsc::Receiver<NetworkMessage>,
    ) {
        loop {
            tokio::select! {
                _ = peer.cancel.cancelled() => break,
                msg = outbound_rx.recv() => {
                    let Some(msg) = msg else { break };
                    if let Err(e) = writer.send(&msg).await {
                        tracing::debug!(peer = %peer.id, error = %e, "write failed");
                        peer.close();
                        break;
                    }
                }
            }
        }
        writer.shutdown().await;
    }

    async fn reader_task(peer: Arc<Peer>, mut reader: MessageReader, ctx: PeerContext) {
        loop {
            let msg = tokio::select! {
                _ = peer.cancel.cancelled() => break,
                msg = reader.recv() => msg,
            };
            match msg {
                Ok(msg) => {
                    peer.last_recv.store(unix_now(), Ordering::Relaxed);
                    if !peer.handle_inbound(msg, &ctx).await {
                        break;
                    }
                }
                Err(NetworkError::Wire(err)) if err.is_unknown_message() => {
                    tracing::trace!(peer = %peer.id, %err, "ignoring unknown message");
                }
                Err(NetworkError::PeerClosed) => {
                    tracing::debug!(peer = %peer.id, "peer hung up");
                    break;
                }
                Err(NetworkError::Wire(err)) => {
                    // Garbage framing: checksum, magic, oversize, parse.
                    tracing::debug!(peer = %peer.id, %err, "protocol violation");
                    ctx.bans.record(&peer.addr, Misbehavior::ProtocolViolation).await;
                    break;
                }
                Err(e) => {
                    tracing::debug!(peer = %peer.id, error = %e, "read failed");
                    break;
                }
            }
        }
        peer.teardown(&ctx).await;
    }

    /// Handles one inbound message; returns `false` to close the peer.
    async fn handle_inbound(&self, msg: NetworkMessage, ctx: &PeerContext) -> bool {
        match msg {
            NetworkMessage::Ping(nonce) => {
                if self.send(NetworkMessage::Pong(nonce)).await.is_err() {
                    return false;
                }
                true
            }
            NetworkMessage::Pong(nonce) => {
                let mut pending = self.ping.lock().await;
                match pending.take() {
                    Some(ping) if ping.nonce == nonce => {
                        let rtt = ping.sent_at.elapsed().as_micros() as u64;
                        self.info.write().await.ping_rtt_micros = rtt;
                    }
                    // A stale or unsolicited nonce is discarded without
                    // faulting the peer.
                    other => *pending = other,
                }
                true
            }
            NetworkMessage::Addr(addresses) => {
                for timed in addresses {
                    let socket = timed.address.socket_addr();
                    ctx.address_book
                        .add(socket, timed.address.services, u64::from(timed.time))
                        .await;
                }
                true
            }
            NetworkMessage::AddrV2(addresses) => {
                for entry in addresses {
                    if let Some(socket) = entry.socket_addr() {
                        ctx.address_book.add(socket, entry.services, u64::from(entry.time)).await;
                    }
                }
                true
            }
            NetworkMessage::GetAddr => {
                // We do not relay addresses.
                true
            }
            NetworkMessage::Version(_) => {
                // A second version message after the handshake.
                ctx.bans.record(&self.addr, Misbehavior::DuplicateHandshake).await;
                true
            }
            other => ctx.events.send(PeerEvent::Message(self.id, other)).await.is_ok(),
        }
    }

    async fn liveness_task(peer: Arc<Peer>) {
        let mut tick = tokio::time::interval(Duration::from_secs(5));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = peer.cancel.cancelled() => return,
                _ = tick.tick() => {}
            }

            // An outstanding ping past its deadline faults the peer.
            {
                let pending = peer.ping.lock().await;
                if let Some(ping) = pending.as_ref() {
                    if ping.sent_at.elapsed() > PONG_TIMEOUT {
                        tracing::info!(peer = %peer.id, "ping timeout, closing");
                        drop(pending);
                        peer.close();
                        return;
                    }
                    continue;
                }
            }

            let idle = unix_now().saturating_sub(peer.last_recv.load(Ordering::Relaxed));
            if idle >= PING_INTERVAL.as_secs() {
                let nonce: u64 = rand::random();
                {
                    let mut pending = peer.ping.lock().await;
                    *pending = Some(PendingPing {
                        nonce,
                        sent_at: Instant::now(),
                    });
                }
                if peer.send(NetworkMessage::Ping(nonce)).await.is_err() {
                    return;
                }
            }
        }
    }

    /// Final cleanup once the reader loop ends: deregister and tell the
    /// sync manager so in-flight requests reroute.
    async fn teardown(&self, ctx: &PeerContext) {
        self.state.store(STATE_CLOSED, Ordering::Release);
        self.cancel.cancel();
        ctx.peers.write().await.remove(&self.id);
        let _ = ctx.events.send(PeerEvent::Disconnected(self.id)).await;
        tracing::debug!(peer = %self.id, addr = %self.addr, "peer closed");
    }
}

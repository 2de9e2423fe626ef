//! Outbound connection management.
//!
//! Keeps the peer set at its target size: candidates come from the
//! explicit connect list, the address book, and DNS seeds, in that
//! order. Failed addresses back off 1s, 8s, then 60s. Banned addresses
//! are never dialed.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use bisonwire::message::NetworkMessage;
use bisonwire::ChainParams;

use crate::config::ClientConfig;
use crate::error::{NetworkError, NetworkResult};
use crate::network::address_book::AddressBook;
use crate::network::ban::{BanManager, Misbehavior};
use crate::network::connection::Connection;
use crate::network::constants::{DIAL_BACKOFF, MAINTENANCE_INTERVAL};
use crate::network::discovery::DnsDiscovery;
use crate::network::handshake;
use crate::network::peer::{Peer, PeerContext, PeerEvent};
use crate::types::{NetTotals, PeerId, PeerInfo, PeerMap};

struct DialState {
    failures: u32,
    next_attempt: Instant,
}

/// The outbound connection manager.
pub struct NetworkManager {
    params: &'static ChainParams,
    config: ClientConfig,
    peers: Arc<RwLock<PeerMap>>,
    address_book: Arc<AddressBook>,
    bans: Arc<BanManager>,
    events_tx: mpsc::Sender<PeerEvent>,
    totals: Arc<NetTotals>,
    next_peer_id: AtomicU64,
    dial_state: Mutex<HashMap<SocketAddr, DialState>>,
    connecting: Mutex<HashSet<SocketAddr>>,
    discovery: DnsDiscovery,
    cancel: CancellationToken,
}

impl NetworkManager {
    pub fn new(
        config: ClientConfig,
        events_tx: mpsc::Sender<PeerEvent>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let params = config.params();
        let address_book = Arc::new(AddressBook::new(params, config.data_dir.clone()));
        let bans = Arc::new(BanManager::new(config.ban_duration));
        Arc::new(NetworkManager {
            params,
            config,
            peers: Arc::new(RwLock::new(PeerMap::new())),
            address_book,
            bans,
            events_tx,
            totals: Arc::new(NetTotals::new()),
            next_peer_id: AtomicU64::new(1),
            dial_state: Mutex::new(HashMap::new()),
            connecting: Mutex::new(HashSet::new()),
            discovery: DnsDiscovery::new(),
            cancel,
        })
    }

    /// Loads the address book and starts the maintenance loop.
    pub async fn start(manager: &Arc<NetworkManager>) {
        if let Err(e) = manager.address_book.load().await {
            tracing::warn!(error = %e, "address book load failed, starting empty");
        }
        for addr in manager.config.connect_only.iter().chain(manager.config.add_peers.iter()) {
            manager.address_book.add(*addr, 0, 0).await;
        }
        let manager = manager.clone();
        tokio::spawn(async move { manager.maintenance_loop().await });
    }

    async fn maintenance_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(MAINTENANCE_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut ticks_since_save = 0u32;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tick.tick() => {}
            }

            Self::fill_outbound_slots(&self).await;

            ticks_since_save += 1;
            if ticks_since_save >= 12 {
                ticks_since_save = 0;
                if let Err(e) = self.address_book.save().await {
                    tracing::warn!(error = %e, "address book save failed");
                }
            }
        }
        if let Err(e) = self.address_book.save().await {
            tracing::warn!(error = %e, "address book save on shutdown failed");
        }
    }

    /// Dials candidates until the outbound target is met.
    async fn fill_outbound_slots(manager: &Arc<NetworkManager>) {
        let self_ = manager;
        let connected: HashSet<SocketAddr> =
            self_.peers.read().await.values().map(|p| p.addr).collect();
        let connecting = self_.connecting.lock().await.clone();
        let busy: HashSet<SocketAddr> = connected.union(&connecting).copied().collect();

        let want = self_.config.target_outbound.saturating_sub(busy.len());
        if want == 0 {
            return;
        }

        let exclusive = !self_.config.connect_only.is_empty();
        let mut candidates: Vec<SocketAddr> = if exclusive {
            self_.config.connect_only.iter().filter(|a| !busy.contains(a)).copied().collect()
        } else {
            let mut list: Vec<SocketAddr> = self_
                .config
                .add_peers
                .iter()
                .filter(|a| !busy.contains(a))
                .copied()
                .collect();
            list.extend(self_.address_book.select(want * 2, &busy).await);
            list
        };

        // Filter bans and backoff windows.
        let now = Instant::now();
        let mut filtered = Vec::with_capacity(candidates.len());
        {
            let dial_state = self_.dial_state.lock().await;
            for addr in candidates.drain(..) {
                if self_.bans.is_banned(&addr).await {
                    continue;
                }
                if let Some(state) = dial_state.get(&addr) {
                    if state.next_attempt > now {
                        continue;
                    }
                }
                if !filtered.contains(&addr) {
                    filtered.push(addr);
                }
            }
        }

        if filtered.is_empty() && !exclusive && self_.address_book.len().await == 0 {
            // Nothing to dial anywhere: fall back to DNS seeds.
            let seeded = self_.discovery.discover(self_.params).await;
            tracing::info!(count = seeded.len(), "seeding address book from DNS");
            for addr in seeded {
                self_.address_book.add(addr, 0, 0).await;
            }
            return;
        }

        for addr in filtered.into_iter().take(want) {
            Self::spawn_dial(manager, addr).await;
        }
    }

    async fn spawn_dial(manager: &Arc<NetworkManager>, addr: SocketAddr) {
        if !manager.connecting.lock().await.insert(addr) {
            return;
        }
        let manager = manager.clone();
        tokio::spawn(async move {
            match manager.dial(addr).await {
                Ok(peer) => {
                    tracing::info!(peer = %peer.id, %addr, "connected");
                    manager.dial_state.lock().await.remove(&addr);
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "dial failed");
                    if matches!(e, NetworkError::DuplicateHandshake) {
                        manager.bans.record(&addr, Misbehavior::DuplicateHandshake).await;
                    }
                    let mut dial_state = manager.dial_state.lock().await;
                    let state = dial_state.entry(addr).or_insert(DialState {
                        failures: 0,
                        next_attempt: Instant::now(),
                    });
                    let backoff =
                        DIAL_BACKOFF[(state.failures as usize).min(DIAL_BACKOFF.len() - 1)];
                    state.failures = state.failures.saturating_add(1);
                    state.next_attempt = Instant::now() + backoff;
                }
            }
            manager.connecting.lock().await.remove(&addr);
        });
    }

    async fn dial(&self, addr: SocketAddr) -> NetworkResult<Arc<Peer>> {
        self.address_book.note_attempt(&addr).await;
        let mut conn = Connection::dial(addr, self.params, self.totals.clone()).await?;
        let negotiated = handshake::perform(&mut conn, &self.config.user_agent, 0).await?;
        self.address_book.note_success(&addr, negotiated.services).await;

        let id = PeerId(self.next_peer_id.fetch_add(1, Ordering::Relaxed));
        let ctx = PeerContext {
            peers: self.peers.clone(),
            events: self.events_tx.clone(),
            address_book: self.address_book.clone(),
            bans: self.bans.clone(),
        };
        Ok(Peer::spawn(id, conn, negotiated, &self.cancel, ctx).await)
    }

    /// Adds an address to the book and dials it immediately.
    pub async fn add_peer(manager: &Arc<NetworkManager>, addr: SocketAddr) {
        manager.address_book.add(addr, 0, 0).await;
        Self::spawn_dial(manager, addr).await;
    }

    /// All peers currently in the Ready state.
    pub async fn ready_peers(&self) -> Vec<Arc<Peer>> {
        self.peers.read().await.values().filter(|p| p.is_ready()).cloned().collect()
    }

    pub async fn peer(&self, id: PeerId) -> Option<Arc<Peer>> {
        self.peers.read().await.get(&id).cloned()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.values().filter(|p| p.is_ready()).count()
    }

    pub async fn peer_infos(&self) -> Vec<PeerInfo> {
        let peers: Vec<Arc<Peer>> = self.peers.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(peers.len());
        for peer in peers {
            infos.push(peer.info().await);
        }
        infos
    }

    /// Highest block height any ready peer claimed.
    pub async fn best_peer_height(&self) -> i32 {
        let peers = self.ready_peers().await;
        let mut best = 0;
        for peer in peers {
            best = best.max(peer.start_height().await);
        }
        best
    }

    /// Sends to one peer.
    pub async fn send_to(&self, id: PeerId, msg: NetworkMessage) -> NetworkResult<()> {
        let peer = self.peer(id).await.ok_or(NetworkError::PeerClosed)?;
        peer.send(msg).await
    }

    /// Sends to every ready peer, best effort.
    pub async fn broadcast(&self, msg: NetworkMessage) -> usize {
        let peers = self.ready_peers().await;
        let mut sent = 0;
        for peer in peers {
            if peer.send(msg.clone()).await.is_ok() {
                sent += 1;
            }
        }
        sent
    }

    /// Scores misbehavior against a connected peer, disconnecting it if
    /// the ban threshold is crossed.
    pub async fn punish(&self, id: PeerId, misbehavior: Misbehavior) {
        let Some(peer) = self.peer(id).await else {
            return;
        };
        let banned = self.bans.record(&peer.addr, misbehavior).await;
        if banned {
            peer.close();
        }
    }

    /// Operator-initiated ban: immediate, regardless of score.
    pub async fn ban_peer(&self, addr: SocketAddr, reason: &str) {
        self.bans.ban(&addr, reason).await;
        let peers: Vec<Arc<Peer>> = self.peers.read().await.values().cloned().collect();
        for peer in peers {
            if peer.addr.ip() == addr.ip() {
                peer.close();
            }
        }
    }

    pub async fn unban_all(&self) {
        self.bans.unban_all().await;
    }

    pub async fn disconnect(&self, id: PeerId, reason: &str) {
        if let Some(peer) = self.peer(id).await {
            tracing::info!(peer = %id, reason, "disconnecting");
            peer.close();
        }
    }

    pub fn net_totals(&self) -> (u64, u64) {
        self.totals.snapshot()
    }

    pub fn bans(&self) -> &Arc<BanManager> {
        &self.bans
    }

    pub fn address_book(&self) -> &Arc<AddressBook> {
        &self.address_book
    }
}

//! The sync manager: one task owning the authoritative request table.
//!
//! Drives header sync, filter-header sync, on-demand block and filter
//! fetches, rescans, and broadcast acceptance. All chain writes happen
//! here, so header connect events are totally ordered; readers share the
//! chain through a read lock.

mod filter_headers;
mod headers;
#[cfg(test)]
mod integration_test;
mod rescan;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use bisonwire::message::blockdata::Inventory;
use bisonwire::message::NetworkMessage;
use bisonwire::{Block, BlockHash, ChainParams, Transaction};

use crate::broadcast::Broadcaster;
use crate::chain::{ConnectOutcome, HeaderStore};
use crate::config::ClientConfig;
use crate::error::{SpvError, SyncError, SyncResult, ValidationError};
use crate::network::constants::{BLOCK_FETCH_TIMEOUT, MAX_BLOCK_FETCH_ATTEMPTS};
use crate::network::{Misbehavior, NetworkManager, PeerEvent};
use crate::storage::Storage;
use crate::types::{
    BlockMatch, BroadcastHandle, PeerId, SyncPhase, SyncStatus, TipUpdate, WatchSet,
};

pub(crate) use filter_headers::FilterHeaderSyncState;
pub(crate) use headers::HeaderSyncState;
pub(crate) use rescan::RescanJob;

/// Requests from the client API into the sync task.
pub enum Command {
    GetBlock {
        hash: BlockHash,
        reply: oneshot::Sender<SyncResult<Block>>,
    },
    SendTransaction {
        tx: Transaction,
        reply: oneshot::Sender<SyncResult<BroadcastHandle>>,
    },
    Rescan {
        start: u32,
        end: u32,
        watch: WatchSet,
        events: mpsc::Sender<SyncResult<BlockMatch>>,
    },
    Status {
        reply: oneshot::Sender<SyncStatus>,
    },
}

/// Why a block is being fetched; one fetch can serve several.
pub(crate) enum FetchPurpose {
    Caller(oneshot::Sender<SyncResult<Block>>),
    Rescan { job: u64, height: u32 },
    BroadcastCheck { height: u32 },
}

pub(crate) struct BlockFetch {
    pub peer: PeerId,
    pub sent_at: Instant,
    pub attempts: u32,
    pub purposes: Vec<FetchPurpose>,
}

pub struct SyncManager<S: Storage> {
    pub(crate) params: &'static ChainParams,
    pub(crate) network: Arc<NetworkManager>,
    pub(crate) storage: S,
    pub(crate) chain: Arc<RwLock<HeaderStore>>,
    events_rx: mpsc::Receiver<PeerEvent>,
    command_rx: mpsc::Receiver<Command>,
    pub(crate) tip_tx: broadcast::Sender<TipUpdate>,
    pub(crate) phase: SyncPhase,
    pub(crate) header_sync: HeaderSyncState,
    pub(crate) filter_sync: FilterHeaderSyncState,
    pub(crate) block_fetches: HashMap<BlockHash, BlockFetch>,
    pub(crate) rescans: Vec<RescanJob>,
    pub(crate) next_rescan_id: u64,
    pub(crate) broadcaster: Broadcaster,
    /// Blocks whose filters are awaited for broadcast acceptance.
    pub(crate) broadcast_checks: HashMap<BlockHash, u32>,
    cancel: CancellationToken,
}

impl<S: Storage> SyncManager<S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: &ClientConfig,
        network: Arc<NetworkManager>,
        storage: S,
        chain: Arc<RwLock<HeaderStore>>,
        events_rx: mpsc::Receiver<PeerEvent>,
        command_rx: mpsc::Receiver<Command>,
        tip_tx: broadcast::Sender<TipUpdate>,
        cancel: CancellationToken,
    ) -> Self {
        SyncManager {
            params: config.params(),
            network,
            storage,
            chain,
            events_rx,
            command_rx,
            tip_tx,
            phase: SyncPhase::HeaderSync,
            header_sync: HeaderSyncState::new(),
            filter_sync: FilterHeaderSyncState::new(),
            block_fetches: HashMap::new(),
            rescans: Vec::new(),
            next_rescan_id: 1,
            broadcaster: Broadcaster::new(config.broadcast_timeout),
            broadcast_checks: HashMap::new(),
            cancel,
        }
    }

    /// Runs until cancelled. All suspension points observe the
    /// cancellation token and unwind by failing pending work with
    /// `Cancelled`.
    pub async fn run(mut self) -> Result<(), SpvError> {
        self.restore_filter_height().await?;
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.unwind().await;
                    return Ok(());
                }
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle_peer_event(event).await?,
                    None => {
                        self.unwind().await;
                        return Ok(());
                    }
                },
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await?,
                    None => {
                        self.unwind().await;
                        return Ok(());
                    }
                },
                _ = tick.tick() => self.on_tick().await?,
            }
        }
    }

    async fn restore_filter_height(&mut self) -> Result<(), SpvError> {
        if let Some(height) = self.storage.filter_header_tip().await? {
            self.filter_sync.height = height;
        }
        Ok(())
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) -> Result<(), SpvError> {
        match event {
            PeerEvent::Ready(peer) => {
                tracing::debug!(%peer, "peer ready");
                if self.phase == SyncPhase::HeaderSync && self.header_sync.sync_peer.is_none() {
                    self.start_header_sync().await?;
                }
                Ok(())
            }
            PeerEvent::Disconnected(peer) => self.handle_peer_gone(peer).await,
            PeerEvent::Message(peer, msg) => self.handle_message(peer, msg).await,
        }
    }

    async fn handle_message(&mut self, peer: PeerId, msg: NetworkMessage) -> Result<(), SpvError> {
        match msg {
            NetworkMessage::Headers(headers) => self.handle_headers(peer, headers).await,
            NetworkMessage::Inv(inventory) => self.handle_inv(peer, inventory).await,
            NetworkMessage::Block(block) => self.handle_block(peer, block).await,
            NetworkMessage::Tx(_) => Ok(()), // nothing subscribes to loose transactions
            NetworkMessage::CFHeaders(msg) => self.handle_cfheaders(peer, msg).await,
            NetworkMessage::CFCheckpt(msg) => self.handle_cfcheckpt(peer, msg).await,
            NetworkMessage::CFilter(msg) => self.handle_cfilter(peer, msg).await,
            NetworkMessage::NotFound(inventory) => self.handle_notfound(peer, inventory).await,
            NetworkMessage::GetData(inventory) => {
                for response in self.broadcaster.serve_getdata(&inventory) {
                    let _ = self.network.send_to(peer, response).await;
                }
                Ok(())
            }
            NetworkMessage::Reject(reject) => {
                if let Some(txid) = self.broadcaster.handle_reject(&reject) {
                    tracing::info!(%txid, code = %reject.ccode, reason = %reject.reason, "broadcast rejected");
                }
                Ok(())
            }
            other => {
                tracing::trace!(%peer, cmd = other.cmd(), "ignoring message");
                Ok(())
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> Result<(), SpvError> {
        match command {
            Command::GetBlock { hash, reply } => {
                self.request_block(hash, FetchPurpose::Caller(reply)).await;
                Ok(())
            }
            Command::SendTransaction { tx, reply } => {
                let (handle, announce) = self.broadcaster.insert(tx);
                let sent = self.network.broadcast(announce).await;
                if sent == 0 {
                    tracing::warn!("no peers to announce transaction to; will retry");
                }
                let _ = reply.send(Ok(handle));
                Ok(())
            }
            Command::Rescan { start, end, watch, events } => {
                self.start_rescan(start, end, watch, events).await
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status().await);
                Ok(())
            }
        }
    }

    pub(crate) async fn status(&self) -> SyncStatus {
        let tip = {
            let chain = self.chain.read().await;
            let tip = chain.tip();
            TipUpdate {
                hash: tip.block_hash(),
                height: tip.height,
                time: tip.header.time,
            }
        };
        let best_peer_height = self.network.best_peer_height().await;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let tip_fresh = u64::from(tip.time) + 24 * 3600 > now;
        SyncStatus {
            phase: self.phase,
            tip,
            filter_header_height: self.filter_sync.height,
            peer_count: self.network.peer_count().await,
            best_peer_height,
            is_current: self.phase == SyncPhase::Idle
                && (tip_fresh || best_peer_height <= tip.height as i32),
        }
    }

    /// Connects one header, publishing tip updates and reacting to
    /// reorganizations. Returns the outcome for the caller's batch logic.
    pub(crate) async fn connect_header(
        &mut self,
        header: bisonwire::BlockHeader,
    ) -> Result<ConnectOutcome, SpvError> {
        let outcome = {
            let mut chain = self.chain.write().await;
            chain.connect(header, &mut self.storage).await?
        };
        match &outcome {
            ConnectOutcome::Extended(entry) => {
                let update = TipUpdate {
                    hash: entry.block_hash(),
                    height: entry.height,
                    time: entry.header.time,
                };
                let _ = self.tip_tx.send(update);
                self.on_new_tip(update).await?;
            }
            ConnectOutcome::Reorganized { connected, disconnected, .. } => {
                // The filter-header chain above the fork is now invalid.
                let fork_height = connected[0].height - 1;
                if self.filter_sync.height > fork_height {
                    self.storage.truncate_filter_headers_above(fork_height).await?;
                    self.filter_sync.on_reorg(fork_height);
                }
                tracing::info!(
                    disconnected = disconnected.len(),
                    connected = connected.len(),
                    "processed reorganization"
                );
                if let Some(entry) = connected.last() {
                    let update = TipUpdate {
                        hash: entry.block_hash(),
                        height: entry.height,
                        time: entry.header.time,
                    };
                    let _ = self.tip_tx.send(update);
                    self.on_new_tip(update).await?;
                }
            }
            ConnectOutcome::SideBranch(_) | ConnectOutcome::AlreadyKnown(_) => {}
        }
        Ok(outcome)
    }

    /// Work that follows the best tip moving: keep the filter-header
    /// chain in step and start broadcast acceptance checks.
    async fn on_new_tip(&mut self, tip: TipUpdate) -> Result<(), SpvError> {
        if self.phase == SyncPhase::Idle {
            self.advance_filter_headers().await?;
        }
        if !self.broadcaster.is_empty() {
            self.broadcast_checks.insert(tip.hash, tip.height);
            let msg = NetworkMessage::GetCFilters(bisonwire::message::filter::GetCFilters {
                filter_type: bisonwire::bip158::FILTER_TYPE_BASIC,
                start_height: tip.height,
                stop_hash: tip.hash,
            });
            if let Some(peer) = self.pick_filter_peer().await {
                let _ = self.network.send_to(peer, msg).await;
            }
        }
        Ok(())
    }

    /// A random ready peer advertising compact filter service, falling
    /// back to any ready peer.
    pub(crate) async fn pick_filter_peer(&self) -> Option<PeerId> {
        let peers = self.network.ready_peers().await;
        if peers.is_empty() {
            return None;
        }
        let mut candidates = Vec::new();
        for peer in &peers {
            if peer.info().await.services & crate::types::SERVICE_COMPACT_FILTERS != 0 {
                candidates.push(peer.id);
            }
        }
        if candidates.is_empty() {
            candidates = peers.iter().map(|p| p.id).collect();
        }
        let idx = (rand::random::<u32>() as usize) % candidates.len();
        Some(candidates[idx])
    }

    pub(crate) async fn pick_block_peer(&self, exclude: Option<PeerId>) -> Option<PeerId> {
        let peers = self.network.ready_peers().await;
        let candidates: Vec<PeerId> = peers
            .iter()
            .map(|p| p.id)
            .filter(|id| Some(*id) != exclude)
            .collect();
        if candidates.is_empty() {
            return peers.first().map(|p| p.id);
        }
        let idx = (rand::random::<u32>() as usize) % candidates.len();
        Some(candidates[idx])
    }

    /// Requests a block from a random ready peer, or joins an existing
    /// in-flight fetch.
    pub(crate) async fn request_block(&mut self, hash: BlockHash, purpose: FetchPurpose) {
        if let Some(fetch) = self.block_fetches.get_mut(&hash) {
            fetch.purposes.push(purpose);
            return;
        }
        let Some(peer) = self.pick_block_peer(None).await else {
            Self::fail_purpose(purpose, SyncError::NoPeers);
            return;
        };
        let msg = NetworkMessage::GetData(vec![Inventory::WitnessBlock(hash)]);
        if let Err(e) = self.network.send_to(peer, msg).await {
            tracing::debug!(%hash, error = %e, "block request failed to send");
        }
        self.block_fetches.insert(
            hash,
            BlockFetch {
                peer,
                sent_at: Instant::now(),
                attempts: 1,
                purposes: vec![purpose],
            },
        );
    }

    fn fail_purpose(purpose: FetchPurpose, err: SyncError) {
        match purpose {
            FetchPurpose::Caller(reply) => {
                let _ = reply.send(Err(err));
            }
            FetchPurpose::Rescan { .. } | FetchPurpose::BroadcastCheck { .. } => {}
        }
    }

    async fn handle_block(&mut self, peer: PeerId, block: Block) -> Result<(), SpvError> {
        let hash = block.block_hash();
        let Some(fetch) = self.block_fetches.remove(&hash) else {
            tracing::trace!(%peer, %hash, "unsolicited block, ignoring");
            return Ok(());
        };
        for purpose in fetch.purposes {
            match purpose {
                FetchPurpose::Caller(reply) => {
                    let _ = reply.send(Ok(block.clone()));
                }
                FetchPurpose::Rescan { job, height } => {
                    self.rescan_block_arrived(job, height, &block).await;
                }
                FetchPurpose::BroadcastCheck { height } => {
                    for txid in self.broadcaster.confirm_in_block(&block, height) {
                        tracing::info!(%txid, height, "broadcast confirmed");
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_notfound(
        &mut self,
        peer: PeerId,
        inventory: Vec<Inventory>,
    ) -> Result<(), SpvError> {
        for item in inventory {
            let hash = match item {
                Inventory::Block(hash) | Inventory::WitnessBlock(hash) => hash,
                _ => continue,
            };
            if self.block_fetches.get(&hash).is_some_and(|f| f.peer == peer) {
                self.retry_block_fetch(hash).await;
            }
        }
        Ok(())
    }

    /// Moves a block fetch to another peer, or fails it once the retry
    /// budget is spent.
    pub(crate) async fn retry_block_fetch(&mut self, hash: BlockHash) {
        let Some(mut fetch) = self.block_fetches.remove(&hash) else {
            return;
        };
        if fetch.attempts >= MAX_BLOCK_FETCH_ATTEMPTS {
            tracing::warn!(%hash, attempts = fetch.attempts, "block unavailable");
            for purpose in fetch.purposes {
                match purpose {
                    FetchPurpose::Caller(reply) => {
                        let _ = reply.send(Err(SyncError::BlockUnavailable(hash)));
                    }
                    FetchPurpose::Rescan { job, .. } => {
                        self.fail_rescan(job, SyncError::BlockUnavailable(hash)).await;
                    }
                    FetchPurpose::BroadcastCheck { .. } => {}
                }
            }
            return;
        }
        let Some(peer) = self.pick_block_peer(Some(fetch.peer)).await else {
            for purpose in fetch.purposes {
                Self::fail_purpose(purpose, SyncError::NoPeers);
            }
            return;
        };
        fetch.peer = peer;
        fetch.attempts += 1;
        fetch.sent_at = Instant::now();
        let msg = NetworkMessage::GetData(vec![Inventory::WitnessBlock(hash)]);
        let _ = self.network.send_to(peer, msg).await;
        self.block_fetches.insert(hash, fetch);
    }

    async fn handle_peer_gone(&mut self, peer: PeerId) -> Result<(), SpvError> {
        // Everything routed through the departed peer gets rerouted.
        if self.header_sync.sync_peer == Some(peer) {
            self.header_sync.reset();
            self.start_header_sync().await?;
        }
        self.filter_sync.forget_peer(peer);
        let stranded: Vec<BlockHash> = self
            .block_fetches
            .iter()
            .filter(|(_, fetch)| fetch.peer == peer)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in stranded {
            self.retry_block_fetch(hash).await;
        }
        self.rescan_peer_gone(peer).await;
        Ok(())
    }

    async fn on_tick(&mut self) -> Result<(), SpvError> {
        self.check_header_sync_progress().await?;
        self.drive_filter_header_sync().await?;
        self.drive_rescans().await?;

        // Block fetch timeouts.
        let now = Instant::now();
        let timed_out: Vec<BlockHash> = self
            .block_fetches
            .iter()
            .filter(|(_, fetch)| now.duration_since(fetch.sent_at) > BLOCK_FETCH_TIMEOUT)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in timed_out {
            self.retry_block_fetch(hash).await;
        }

        // Broadcast re-announcements and expiry.
        for announcement in self.broadcaster.tick() {
            self.network.broadcast(announcement).await;
        }
        Ok(())
    }

    /// Scores a peer and logs the reason.
    pub(crate) async fn punish(&self, peer: PeerId, misbehavior: Misbehavior) {
        tracing::debug!(%peer, kind = misbehavior.as_str(), "punishing peer");
        self.network.punish(peer, misbehavior).await;
    }

    /// Maps a validation failure on data from `peer` to scoring, and
    /// decides whether the error is recoverable by rotating peers.
    pub(crate) async fn punish_validation(&self, peer: PeerId, err: &ValidationError) {
        if err.is_bannable() {
            let misbehavior = match err {
                ValidationError::FilterInvalid(_) | ValidationError::FilterHeaderChain(_) => {
                    Misbehavior::InvalidFilter
                }
                ValidationError::Header(_) => Misbehavior::InvalidHeader,
            };
            self.punish(peer, misbehavior).await;
        }
    }

    /// Fails all pending work with `Cancelled` and stops.
    async fn unwind(&mut self) {
        tracing::info!("sync manager unwinding");
        for (_, fetch) in self.block_fetches.drain() {
            for purpose in fetch.purposes {
                if let FetchPurpose::Caller(reply) = purpose {
                    let _ = reply.send(Err(SyncError::Cancelled));
                }
            }
        }
        let jobs = std::mem::take(&mut self.rescans);
        for job in jobs {
            let _ = job.events.try_send(Err(SyncError::Cancelled));
        }
        self.broadcaster.drain();
        if let Err(e) = self.storage.flush().await {
            tracing::warn!(error = %e, "storage flush on shutdown failed");
        }
    }
}


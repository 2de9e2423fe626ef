//! Initial and steady-state header download.
//!
//! One sync peer at a time: header ordering matters, so batches pipeline
//! on a single stream. Block announcements (`inv`) from any peer trigger
//! a solicited `getheaders` to that peer.

use std::collections::HashSet;

use tokio::time::Instant;

use bisonwire::message::blockdata::{GetHeadersMessage, Inventory};
use bisonwire::message::NetworkMessage;
use bisonwire::{BlockHash, BlockHeader};

use crate::chain::ConnectOutcome;
use crate::error::{SpvError, ValidationError};
use crate::network::constants::HEADER_BATCH_TIMEOUT;
use crate::network::Misbehavior;
use crate::storage::Storage;
use crate::sync::SyncManager;
use crate::types::{PeerId, SyncPhase};

/// Maximum headers a peer returns per `getheaders`.
pub(crate) const MAX_HEADERS_PER_MSG: usize = 2000;

pub(crate) struct HeaderSyncState {
    /// The single peer serving ordered header batches.
    pub sync_peer: Option<PeerId>,
    /// Whether a `getheaders` is outstanding to the sync peer.
    pub awaiting_batch: bool,
    /// When the outstanding request went out.
    pub requested_at: Instant,
    /// Peers we owe a headers response to because we asked after an inv.
    pub solicited: HashSet<PeerId>,
}

impl HeaderSyncState {
    pub fn new() -> Self {
        HeaderSyncState {
            sync_peer: None,
            awaiting_batch: false,
            requested_at: Instant::now(),
            solicited: HashSet::new(),
        }
    }

    pub fn reset(&mut self) {
        self.sync_peer = None;
        self.awaiting_batch = false;
    }
}

impl<S: Storage> SyncManager<S> {
    /// Picks a sync peer (highest claimed height, lowest latency on ties)
    /// and requests the first batch.
    pub(crate) async fn start_header_sync(&mut self) -> Result<(), SpvError> {
        let peers = self.network.ready_peers().await;
        if peers.is_empty() {
            self.header_sync.reset();
            return Ok(());
        }
        let mut best: Option<(i32, u64, PeerId)> = None;
        for peer in &peers {
            let info = peer.info().await;
            let rtt = if info.ping_rtt_micros == 0 { u64::MAX } else { info.ping_rtt_micros };
            let candidate = (info.start_height, rtt, peer.id);
            best = Some(match best {
                None => candidate,
                Some(current) => {
                    // Higher height wins; lower latency breaks ties.
                    if candidate.0 > current.0 || (candidate.0 == current.0 && candidate.1 < current.1)
                    {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }
        let (height, _, peer) = best.expect("peers checked non-empty");
        tracing::info!(%peer, claimed_height = height, "selected sync peer");
        self.header_sync.sync_peer = Some(peer);
        self.request_next_batch().await
    }

    pub(crate) async fn request_next_batch(&mut self) -> Result<(), SpvError> {
        let Some(peer) = self.header_sync.sync_peer else {
            return Ok(());
        };
        let locator = self.chain.read().await.locator();
        let msg = NetworkMessage::GetHeaders(GetHeadersMessage::new(locator, BlockHash::all_zeros()));
        if let Err(e) = self.network.send_to(peer, msg).await {
            // The peer went away mid-selection; the next tick reselects.
            tracing::debug!(%peer, error = %e, "getheaders send failed");
            self.header_sync.reset();
            return Ok(());
        }
        self.header_sync.awaiting_batch = true;
        self.header_sync.requested_at = Instant::now();
        Ok(())
    }

    pub(crate) async fn handle_headers(
        &mut self,
        peer: PeerId,
        headers: Vec<BlockHeader>,
    ) -> Result<(), SpvError> {
        let from_sync_peer = self.header_sync.sync_peer == Some(peer);
        let solicited = self.header_sync.solicited.remove(&peer);
        if !from_sync_peer && !solicited {
            // The sync manager holds the only subscription to `headers`;
            // anything we did not ask for counts against the sender.
            self.punish(peer, Misbehavior::UnsolicitedMessage).await;
            return Ok(());
        }
        if from_sync_peer {
            self.header_sync.awaiting_batch = false;
        }

        let count = headers.len();
        let mut connected_any = false;
        for header in headers {
            match self.connect_header(header).await {
                Ok(ConnectOutcome::AlreadyKnown(_)) => {}
                Ok(_) => connected_any = true,
                Err(SpvError::Validation(err)) => {
                    return self.handle_invalid_header(peer, from_sync_peer, err).await;
                }
                Err(other) => return Err(other),
            }
        }
        tracing::debug!(%peer, count, connected_any, "processed header batch");

        if self.phase == SyncPhase::HeaderSync && from_sync_peer {
            if count == MAX_HEADERS_PER_MSG {
                // Full batch: pipeline the next request immediately.
                return self.request_next_batch().await;
            }
            let tip_height = self.chain.read().await.height();
            let best_claimed = self.network.best_peer_height().await;
            if count > 0 && best_claimed > tip_height as i32 {
                // Someone claims more and this peer is still producing;
                // keep pulling. An empty batch ends the phase regardless,
                // or a stale height claim would poll forever.
                return self.request_next_batch().await;
            }
            tracing::info!(height = tip_height, "header sync complete");
            self.phase = SyncPhase::FilterHeaderSync;
            self.begin_filter_header_sync().await?;
        }
        Ok(())
    }

    async fn handle_invalid_header(
        &mut self,
        peer: PeerId,
        from_sync_peer: bool,
        err: ValidationError,
    ) -> Result<(), SpvError> {
        tracing::warn!(%peer, %err, "invalid header");
        self.punish_validation(peer, &err).await;
        if from_sync_peer {
            self.header_sync.reset();
            self.start_header_sync().await?;
        }
        Ok(())
    }

    /// Block announcements make us ask the announcer for headers, which
    /// marks its next `headers` as solicited.
    pub(crate) async fn handle_inv(
        &mut self,
        peer: PeerId,
        inventory: Vec<Inventory>,
    ) -> Result<(), SpvError> {
        let mut unknown_block = false;
        {
            let chain = self.chain.read().await;
            for item in &inventory {
                if let Inventory::Block(hash) | Inventory::WitnessBlock(hash) = item {
                    if chain.get_by_hash(hash).is_none() {
                        unknown_block = true;
                    }
                }
            }
        }
        if unknown_block {
            let locator = self.chain.read().await.locator();
            let msg =
                NetworkMessage::GetHeaders(GetHeadersMessage::new(locator, BlockHash::all_zeros()));
            if self.network.send_to(peer, msg).await.is_ok() {
                self.header_sync.solicited.insert(peer);
            }
        }
        Ok(())
    }

    /// Detects a stalled or vanished sync peer and rotates away from it.
    pub(crate) async fn check_header_sync_progress(&mut self) -> Result<(), SpvError> {
        if self.phase != SyncPhase::HeaderSync {
            return Ok(());
        }
        if self.header_sync.sync_peer.is_none() {
            return self.start_header_sync().await;
        }
        if !self.header_sync.awaiting_batch {
            return Ok(());
        }
        if self.header_sync.requested_at.elapsed() <= HEADER_BATCH_TIMEOUT {
            return Ok(());
        }
        if let Some(peer) = self.header_sync.sync_peer {
            tracing::warn!(%peer, "sync peer stalled");
            self.punish(peer, Misbehavior::StalledSync).await;
        }
        self.header_sync.reset();
        self.start_header_sync().await
    }
}

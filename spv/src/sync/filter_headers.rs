//! BIP157 filter-header chain sync.
//!
//! Checkpoint-interval batches are requested from several peers in
//! parallel, re-linked locally, and cross-checked against the majority
//! `cfcheckpt` view. Out-of-order responses buffer until their
//! predecessor lands, because a batch can only be verified once the
//! header chain reaches its start.

use std::collections::{BTreeMap, HashMap};

use tokio::time::Instant;

use bisonwire::bip158::FILTER_TYPE_BASIC;
use bisonwire::message::filter::{
    CFCheckpt, CFHeaders, GetCFCheckpt, GetCFHeaders, CFCHECKPT_INTERVAL,
};
use bisonwire::message::NetworkMessage;
use bisonwire::{FilterHash, FilterHeader};

use crate::error::{SpvError, ValidationError};
use crate::network::constants::{FILTER_CHECKPOINT_TIMEOUT, FILTER_FETCH_TIMEOUT, MAX_CFHEADER_PEERS};
use crate::storage::Storage;
use crate::sync::SyncManager;
use crate::types::{PeerId, SyncPhase};

struct PendingBatch {
    peer: PeerId,
    start: u32,
    stop_height: u32,
    sent_at: Instant,
}

struct DoneBatch {
    peer: PeerId,
    stop_height: u32,
    previous_filter_header: FilterHeader,
    filter_hashes: Vec<FilterHash>,
}

pub(crate) struct FilterHeaderSyncState {
    /// Highest height with a verified, stored filter header.
    pub height: u32,
    /// Whether height zero has been anchored yet.
    pub anchored: bool,
    pending: HashMap<u32, PendingBatch>,
    /// Verified-pending batches keyed by start height, absorbed in order.
    done: BTreeMap<u32, DoneBatch>,
    /// `cfcheckpt` responses per peer, indexed by interval.
    checkpoints: HashMap<PeerId, Vec<FilterHeader>>,
    checkpt_requested_at: Option<Instant>,
}

impl FilterHeaderSyncState {
    pub fn new() -> Self {
        FilterHeaderSyncState {
            height: 0,
            anchored: false,
            pending: HashMap::new(),
            done: BTreeMap::new(),
            checkpoints: HashMap::new(),
            checkpt_requested_at: None,
        }
    }

    pub fn forget_peer(&mut self, peer: PeerId) {
        self.pending.retain(|_, batch| batch.peer != peer);
        self.checkpoints.remove(&peer);
    }

    pub fn on_reorg(&mut self, fork_height: u32) {
        if self.height > fork_height {
            self.height = fork_height;
        }
        self.pending.clear();
        self.done.clear();
    }

    /// The filter header at an interval boundary agreed on by the
    /// majority of responding peers.
    fn majority_checkpoint(&self, interval_index: usize) -> Option<FilterHeader> {
        let mut votes: HashMap<FilterHeader, usize> = HashMap::new();
        for headers in self.checkpoints.values() {
            if let Some(header) = headers.get(interval_index) {
                *votes.entry(*header).or_insert(0) += 1;
            }
        }
        let total: usize = votes.values().sum();
        votes
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .filter(|(_, count)| *count * 2 > total)
            .map(|(header, _)| header)
    }
}

impl<S: Storage> SyncManager<S> {
    /// Kicks off filter-header sync: checkpoints from everyone, batches
    /// to up to eight peers.
    pub(crate) async fn begin_filter_header_sync(&mut self) -> Result<(), SpvError> {
        self.request_filter_checkpoints().await;
        self.dispatch_filter_header_batches().await
    }

    async fn request_filter_checkpoints(&mut self) {
        let stop_hash = {
            let chain = self.chain.read().await;
            chain.tip().block_hash()
        };
        let msg = NetworkMessage::GetCFCheckpt(GetCFCheckpt {
            filter_type: FILTER_TYPE_BASIC,
            stop_hash,
        });
        let sent = self.network.broadcast(msg).await;
        tracing::debug!(peers = sent, "requested filter checkpoints");
        self.filter_sync.checkpt_requested_at = Some(Instant::now());
    }

    pub(crate) async fn handle_cfcheckpt(
        &mut self,
        peer: PeerId,
        msg: CFCheckpt,
    ) -> Result<(), SpvError> {
        if msg.filter_type != FILTER_TYPE_BASIC {
            return Ok(());
        }
        self.filter_sync.checkpoints.insert(peer, msg.filter_headers);
        Ok(())
    }

    /// Fills the parallel request window with checkpoint-interval batches.
    pub(crate) async fn dispatch_filter_header_batches(&mut self) -> Result<(), SpvError> {
        if self.phase == SyncPhase::HeaderSync {
            return Ok(());
        }
        let header_tip = self.chain.read().await.height();
        let peers = self.network.ready_peers().await;
        if peers.is_empty() {
            return Ok(());
        }
        let mut peer_cycle = peers.iter().cycle();

        // Walk forward from the verified height, skipping ranges already
        // in flight or buffered.
        let mut next_start = self.filter_sync.height + 1;
        while self.filter_sync.pending.len() < MAX_CFHEADER_PEERS.min(peers.len())
            && next_start <= header_tip
        {
            let in_flight = self.filter_sync.pending.contains_key(&next_start)
                || self.filter_sync.done.contains_key(&next_start);
            // Stop at the checkpoint interval boundary.
            let stop_height =
                (((next_start - 1) / CFCHECKPT_INTERVAL) + 1) * CFCHECKPT_INTERVAL;
            let stop_height = stop_height.min(header_tip);
            if !in_flight {
                let Some(stop_hash) = self.chain.read().await.hash_at_height(stop_height) else {
                    break;
                };
                let peer = peer_cycle.next().expect("cycle over non-empty").id;
                let msg = NetworkMessage::GetCFHeaders(GetCFHeaders {
                    filter_type: FILTER_TYPE_BASIC,
                    start_height: next_start,
                    stop_hash,
                });
                if self.network.send_to(peer, msg).await.is_ok() {
                    self.filter_sync.pending.insert(
                        next_start,
                        PendingBatch {
                            peer,
                            start: next_start,
                            stop_height,
                            sent_at: Instant::now(),
                        },
                    );
                }
            }
            next_start = stop_height + 1;
        }
        Ok(())
    }

    pub(crate) async fn handle_cfheaders(
        &mut self,
        peer: PeerId,
        msg: CFHeaders,
    ) -> Result<(), SpvError> {
        if msg.filter_type != FILTER_TYPE_BASIC {
            return Ok(());
        }
        let Some(stop_height) = self
            .chain
            .read()
            .await
            .get_by_hash(&msg.stop_hash)
            .map(|entry| entry.height)
        else {
            return Ok(());
        };

        // Match the response to a batch we actually requested from this
        // peer; the sync manager owns the only cfheaders subscription.
        let start = match self
            .filter_sync
            .pending
            .iter()
            .find(|(_, batch)| batch.peer == peer && batch.stop_height == stop_height)
            .map(|(start, _)| *start)
        {
            Some(start) => start,
            None => {
                self.punish(peer, crate::network::Misbehavior::UnsolicitedMessage).await;
                return Ok(());
            }
        };
        let batch = self.filter_sync.pending.remove(&start).expect("found above");

        let expected = (stop_height - batch.start + 1) as usize;
        if msg.filter_hashes.len() != expected {
            tracing::warn!(%peer, got = msg.filter_hashes.len(), expected, "bad cfheaders count");
            self.punish_validation(
                peer,
                &ValidationError::FilterHeaderChain("wrong hash count".into()),
            )
            .await;
            return self.dispatch_filter_header_batches().await;
        }

        self.filter_sync.done.insert(
            batch.start,
            DoneBatch {
                peer,
                stop_height,
                previous_filter_header: msg.previous_filter_header,
                filter_hashes: msg.filter_hashes,
            },
        );
        self.absorb_filter_header_batches().await?;
        self.dispatch_filter_header_batches().await
    }

    /// Verifies and persists buffered batches that extend the verified
    /// chain, in order.
    async fn absorb_filter_header_batches(&mut self) -> Result<(), SpvError> {
        loop {
            let next_start = self.filter_sync.height + 1;
            let Some(batch) = self.filter_sync.done.remove(&next_start) else {
                break;
            };

            // The response's previous header must agree with what we
            // verified up to.
            if self.filter_sync.anchored || next_start > 1 {
                if let Some(stored) = self.storage.filter_header(next_start - 1).await? {
                    if stored != batch.previous_filter_header {
                        tracing::warn!(peer = %batch.peer, "cfheaders previous link mismatch");
                        self.punish_validation(
                            batch.peer,
                            &ValidationError::FilterHeaderChain("previous link mismatch".into()),
                        )
                        .await;
                        continue;
                    }
                }
            }

            // Rebuild the chain and cross-check the interval endpoint
            // against the majority checkpoint.
            let mut prev = batch.previous_filter_header;
            let mut headers = Vec::with_capacity(batch.filter_hashes.len());
            for hash in &batch.filter_hashes {
                prev = hash.filter_header(&prev);
                headers.push(prev);
            }
            if batch.stop_height % CFCHECKPT_INTERVAL == 0 {
                let idx = (batch.stop_height / CFCHECKPT_INTERVAL - 1) as usize;
                if let Some(majority) = self.filter_sync.majority_checkpoint(idx) {
                    if *headers.last().expect("non-empty batch") != majority {
                        tracing::warn!(peer = %batch.peer, stop = batch.stop_height,
                            "cfheaders endpoint disagrees with checkpoint majority");
                        self.punish_validation(
                            batch.peer,
                            &ValidationError::FilterHeaderChain(
                                "disagrees with checkpoint majority".into(),
                            ),
                        )
                        .await;
                        continue;
                    }
                }
            }

            if next_start == 1 && !self.filter_sync.anchored {
                // Anchor the chain start from the first verified batch.
                self.storage.put_filter_header(0, &batch.previous_filter_header).await?;
                self.filter_sync.anchored = true;
            }
            for (offset, header) in headers.iter().enumerate() {
                self.storage.put_filter_header(next_start + offset as u32, header).await?;
            }
            self.filter_sync.height = batch.stop_height;
        }

        if self.phase == SyncPhase::FilterHeaderSync {
            let header_tip = self.chain.read().await.height();
            if self.filter_sync.height >= header_tip {
                tracing::info!(height = self.filter_sync.height, "filter header sync complete");
                self.phase = SyncPhase::Idle;
            }
        }
        Ok(())
    }

    /// Keeps the filter-header chain abreast of the header tip while
    /// idle.
    pub(crate) async fn advance_filter_headers(&mut self) -> Result<(), SpvError> {
        let header_tip = self.chain.read().await.height();
        if self.filter_sync.height < header_tip {
            self.dispatch_filter_header_batches().await?;
        }
        Ok(())
    }

    /// Retries timed-out batches and keeps the pipeline full.
    pub(crate) async fn drive_filter_header_sync(&mut self) -> Result<(), SpvError> {
        if self.phase == SyncPhase::HeaderSync {
            return Ok(());
        }
        // Re-poll checkpoints while few peers have answered; the majority
        // cross-check is only as good as its sample.
        let refresh_checkpoints = match self.filter_sync.checkpt_requested_at {
            Some(at) => {
                self.filter_sync.checkpoints.len() < 2
                    && at.elapsed() > FILTER_CHECKPOINT_TIMEOUT
            }
            None => true,
        };
        if refresh_checkpoints && self.phase == SyncPhase::FilterHeaderSync {
            self.request_filter_checkpoints().await;
        }

        let now = Instant::now();
        let stale: Vec<u32> = self
            .filter_sync
            .pending
            .iter()
            .filter(|(_, batch)| {
                now.duration_since(batch.sent_at)
                    > FILTER_FETCH_TIMEOUT.max(FILTER_CHECKPOINT_TIMEOUT)
            })
            .map(|(start, _)| *start)
            .collect();
        for start in stale {
            if let Some(batch) = self.filter_sync.pending.remove(&start) {
                tracing::debug!(start, peer = %batch.peer, "cfheaders batch timed out");
            }
        }
        self.dispatch_filter_header_batches().await
    }
}

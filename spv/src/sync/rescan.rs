//! Filter-driven rescans.
//!
//! A rescan walks a height range, tests each block's compact filter
//! against the watch set, fetches matching blocks, and emits per-block
//! events in strictly ascending height order regardless of fetch
//! completion order.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tokio::time::Instant;

use bisonwire::bip158::{BlockFilter, FILTER_TYPE_BASIC};
use bisonwire::message::filter::{CFilter, GetCFilters, MAX_GETCFILTERS_SIZE};
use bisonwire::message::NetworkMessage;
use bisonwire::{Block, BlockHash};

use crate::error::{SpvError, SyncError, SyncResult, ValidationError};
use crate::network::constants::FILTER_FETCH_TIMEOUT;
use crate::storage::Storage;
use crate::sync::{FetchPurpose, SyncManager};
use crate::types::{BlockMatch, PeerId, WatchSet};

/// Status of one height inside a rescan window.
enum HeightStatus {
    /// Filter requested, not yet checked.
    AwaitingFilter,
    /// Filter did not match; nothing to emit.
    NoMatch,
    /// Filter matched; the block fetch is in flight.
    AwaitingBlock,
    /// Block arrived; waiting its turn in the reorder window.
    Ready(BlockMatch),
}

struct FilterBatch {
    peer: PeerId,
    start: u32,
    stop_height: u32,
    sent_at: Instant,
    received: u32,
}

pub(crate) struct RescanJob {
    pub id: u64,
    start: u32,
    end: u32,
    watch: WatchSet,
    pub events: mpsc::Sender<SyncResult<BlockMatch>>,
    batch: Option<FilterBatch>,
    /// First height not yet covered by a filter request.
    next_request: u32,
    statuses: BTreeMap<u32, HeightStatus>,
    /// Next height to emit; everything below is done.
    next_emit: u32,
}

impl RescanJob {
    fn finished(&self) -> bool {
        self.next_emit > self.end
    }
}

impl<S: Storage> SyncManager<S> {
    pub(crate) async fn start_rescan(
        &mut self,
        start: u32,
        end: u32,
        watch: WatchSet,
        events: mpsc::Sender<SyncResult<BlockMatch>>,
    ) -> Result<(), SpvError> {
        let tip = self.chain.read().await.height();
        let end = end.min(tip);
        if start > end || watch.is_empty() {
            // Empty range or nothing watched: the stream just ends.
            return Ok(());
        }
        let id = self.next_rescan_id;
        self.next_rescan_id += 1;
        tracing::info!(id, start, end, "rescan started");
        self.rescans.push(RescanJob {
            id,
            start,
            end,
            watch,
            events,
            batch: None,
            next_request: start,
            statuses: BTreeMap::new(),
            next_emit: start,
        });
        self.advance_rescan_requests().await
    }

    /// Issues the next filter batch for any job without one in flight.
    pub(crate) async fn advance_rescan_requests(&mut self) -> Result<(), SpvError> {
        let chain = self.chain.clone();
        let mut requests = Vec::new();
        for job in self.rescans.iter_mut() {
            if job.finished() || job.batch.is_some() || job.next_request > job.end {
                continue;
            }
            let start = job.next_request;
            let stop_height = (start + MAX_GETCFILTERS_SIZE - 1).min(job.end);
            let Some(stop_hash) = chain.read().await.hash_at_height(stop_height) else {
                continue;
            };
            requests.push((job.id, start, stop_height, stop_hash));
        }
        for (job_id, start, stop_height, stop_hash) in requests {
            let Some(peer) = self.pick_filter_peer().await else {
                continue;
            };
            let msg = NetworkMessage::GetCFilters(GetCFilters {
                filter_type: FILTER_TYPE_BASIC,
                start_height: start,
                stop_hash,
            });
            if self.network.send_to(peer, msg).await.is_err() {
                continue;
            }
            if let Some(job) = self.rescans.iter_mut().find(|j| j.id == job_id) {
                for height in start..=stop_height {
                    job.statuses.insert(height, HeightStatus::AwaitingFilter);
                }
                job.batch = Some(FilterBatch {
                    peer,
                    start,
                    stop_height,
                    sent_at: Instant::now(),
                    received: 0,
                });
                job.next_request = stop_height + 1;
            }
        }
        Ok(())
    }

    /// Routes an incoming `cfilter` to the rescan that requested it or to
    /// a broadcast acceptance check.
    pub(crate) async fn handle_cfilter(
        &mut self,
        peer: PeerId,
        msg: CFilter,
    ) -> Result<(), SpvError> {
        if msg.filter_type != FILTER_TYPE_BASIC {
            return Ok(());
        }
        let Some(entry) = self.chain.read().await.get_by_hash(&msg.block_hash) else {
            return Ok(());
        };
        let height = entry.height;
        let filter = BlockFilter::new(&msg.filter);

        // Verify against the stored filter-header chain before trusting
        // the content.
        if let Err(err) = self.verify_filter(height, &msg.block_hash, &filter).await? {
            self.punish_validation(peer, &err).await;
            self.reassign_filter_batches(peer).await;
            return Ok(());
        }

        let mut consumed = false;
        if let Some(height) = self.broadcast_checks.remove(&msg.block_hash) {
            consumed = true;
            let queries = self.broadcaster.watch_queries();
            let matched = filter
                .match_any(&msg.block_hash, queries.iter().map(|q| q.as_slice()))
                .unwrap_or(false);
            if matched {
                self.request_block(msg.block_hash, FetchPurpose::BroadcastCheck { height }).await;
            }
        }

        // Find the job whose in-flight batch covers this height.
        let mut matched_job = None;
        for job in self.rescans.iter_mut() {
            let Some(batch) = job.batch.as_mut() else { continue };
            if batch.peer != peer || height < batch.start || height > batch.stop_height {
                continue;
            }
            batch.received += 1;
            let complete = batch.received >= batch.stop_height - batch.start + 1;
            let hit = filter
                .match_any(&msg.block_hash, job.watch.filter_queries())
                .unwrap_or(false);
            job.statuses.insert(
                height,
                if hit { HeightStatus::AwaitingBlock } else { HeightStatus::NoMatch },
            );
            if complete {
                job.batch = None;
            }
            matched_job = Some((job.id, hit));
            break;
        }

        if let Some((job_id, hit)) = matched_job {
            if hit {
                self.request_block(
                    msg.block_hash,
                    FetchPurpose::Rescan {
                        job: job_id,
                        height,
                    },
                )
                .await;
            }
            self.emit_ready(job_id).await;
            self.advance_rescan_requests().await?;
        } else if !consumed {
            // The sync manager holds the only cfilter subscription; a
            // filter nobody asked for counts against the sender. A height
            // inside an active rescan window is exempt, since a reassigned
            // batch can leave an honest peer's late responses in flight.
            let in_any_window =
                self.rescans.iter().any(|job| height >= job.start && height <= job.end);
            if !in_any_window {
                self.punish(peer, crate::network::Misbehavior::UnsolicitedMessage).await;
            }
        }
        Ok(())
    }

    /// Checks a filter against the verified header chain. `Ok(Err(_))`
    /// means the filter is bad (peer's fault); outer errors are ours.
    async fn verify_filter(
        &mut self,
        height: u32,
        block_hash: &BlockHash,
        filter: &BlockFilter,
    ) -> Result<Result<(), ValidationError>, SpvError> {
        let Some(expected) = self.storage.filter_header(height).await? else {
            // Chain not verified this far; accept on faith of the
            // majority-checked sync that will catch up.
            return Ok(Ok(()));
        };
        let Some(previous) = self.storage.filter_header(height.saturating_sub(1)).await? else {
            return Ok(Ok(()));
        };
        if filter.filter_header(&previous) != expected {
            tracing::warn!(%block_hash, height, "filter does not match committed header");
            return Ok(Err(ValidationError::FilterInvalid(format!(
                "filter for {block_hash} contradicts header chain"
            ))));
        }
        Ok(Ok(()))
    }

    /// Stores an arrived block's relevant transactions in its rescan slot.
    pub(crate) async fn rescan_block_arrived(&mut self, job_id: u64, height: u32, block: &Block) {
        let Some(job) = self.rescans.iter_mut().find(|j| j.id == job_id) else {
            return;
        };
        let transactions: Vec<_> =
            block.txdata.iter().filter(|tx| job.watch.matches_tx(tx)).cloned().collect();
        job.statuses.insert(
            height,
            HeightStatus::Ready(BlockMatch {
                height,
                hash: block.block_hash(),
                transactions,
            }),
        );
        self.emit_ready(job_id).await;
    }

    /// Emits finished heights in order. A full event channel pauses
    /// emission (retried on tick); a closed one cancels the job, which is
    /// how dropping the rescan stream cancels its outstanding fetches.
    pub(crate) async fn emit_ready(&mut self, job_id: u64) {
        let Some(pos) = self.rescans.iter().position(|j| j.id == job_id) else {
            return;
        };
        let job = &mut self.rescans[pos];
        let mut closed = false;
        while job.next_emit <= job.end {
            match job.statuses.get(&job.next_emit) {
                Some(HeightStatus::NoMatch) => {
                    job.statuses.remove(&job.next_emit);
                    job.next_emit += 1;
                }
                Some(HeightStatus::Ready(_)) => {
                    // A false-positive filter match still emits, with an
                    // empty transaction list; each matched height appears
                    // exactly once.
                    let ready = match job.statuses.remove(&job.next_emit) {
                        Some(HeightStatus::Ready(m)) => m,
                        _ => unreachable!("checked above"),
                    };
                    match job.events.try_send(Ok(ready)) {
                        Ok(()) => {
                            job.next_emit += 1;
                        }
                        Err(mpsc::error::TrySendError::Full(Ok(back))) => {
                            // Receiver is slow: put it back and retry on a
                            // later tick.
                            job.statuses.insert(job.next_emit, HeightStatus::Ready(back));
                            break;
                        }
                        Err(_) => {
                            closed = true;
                            break;
                        }
                    }
                }
                _ => break,
            }
        }

        let finished = job.finished();
        if closed {
            let id = job.id;
            tracing::debug!(id, "rescan receiver dropped, cancelling");
            self.rescans.remove(pos);
            self.drop_rescan_fetches(id);
        } else if finished {
            tracing::info!(id = job.id, "rescan complete");
            self.rescans.remove(pos);
        }
    }

    /// Cancels block fetches that only served a dead rescan.
    fn drop_rescan_fetches(&mut self, job_id: u64) {
        self.block_fetches.retain(|_, fetch| {
            fetch.purposes.retain(
                |p| !matches!(p, FetchPurpose::Rescan { job, .. } if *job == job_id),
            );
            !fetch.purposes.is_empty()
        });
    }

    /// Fails a rescan out to its consumer.
    pub(crate) async fn fail_rescan(&mut self, job_id: u64, err: SyncError) {
        let Some(pos) = self.rescans.iter().position(|j| j.id == job_id) else {
            return;
        };
        let job = self.rescans.remove(pos);
        tracing::warn!(id = job.id, %err, "rescan failed");
        let _ = job.events.try_send(Err(err));
        self.drop_rescan_fetches(job_id);
    }

    /// Reassigns in-flight filter batches away from a bad or vanished
    /// peer.
    pub(crate) async fn reassign_filter_batches(&mut self, peer: PeerId) {
        for job in self.rescans.iter_mut() {
            if let Some(batch) = &job.batch {
                if batch.peer == peer {
                    // Roll the window back to re-request the whole batch.
                    for height in batch.start..=batch.stop_height {
                        job.statuses.remove(&height);
                    }
                    job.next_request = batch.start;
                    job.batch = None;
                }
            }
        }
    }

    pub(crate) async fn rescan_peer_gone(&mut self, peer: PeerId) {
        self.reassign_filter_batches(peer).await;
        let _ = self.advance_rescan_requests().await;
    }

    /// Tick driver: filter batch timeouts, stalled emissions, and request
    /// top-up.
    pub(crate) async fn drive_rescans(&mut self) -> Result<(), SpvError> {
        let now = Instant::now();
        let mut stale_peers = Vec::new();
        for job in self.rescans.iter() {
            if let Some(batch) = &job.batch {
                if now.duration_since(batch.sent_at) > FILTER_FETCH_TIMEOUT {
                    stale_peers.push(batch.peer);
                }
            }
        }
        for peer in stale_peers {
            self.reassign_filter_batches(peer).await;
        }

        let ids: Vec<u64> = self.rescans.iter().map(|j| j.id).collect();
        for id in ids {
            self.emit_ready(id).await;
        }
        self.advance_rescan_requests().await
    }
}

//! Outgoing transaction broadcast tracking.
//!
//! A sent transaction is announced by `inv`, served on `getdata`, and
//! re-announced periodically until a peer rejects it or a block whose
//! filter matches its outputs turns out to contain it.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use bisonwire::message::blockdata::Inventory;
use bisonwire::message::network::Reject;
use bisonwire::message::NetworkMessage;
use bisonwire::{Block, BlockHash, Transaction, Txid};

use crate::network::constants::REBROADCAST_INTERVAL;
use crate::types::{BroadcastHandle, BroadcastOutcome};

struct PendingBroadcast {
    tx: Transaction,
    deadline: Instant,
    last_announce: Instant,
    reply: Option<oneshot::Sender<BroadcastOutcome>>,
}

/// Tracks transactions we are trying to get mined.
pub struct Broadcaster {
    pending: HashMap<Txid, PendingBroadcast>,
    timeout: Duration,
}

impl Broadcaster {
    pub fn new(timeout: Duration) -> Self {
        Broadcaster {
            pending: HashMap::new(),
            timeout,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Registers a transaction and returns the caller's handle. The
    /// returned inventory announcement should go to every ready peer.
    pub fn insert(&mut self, tx: Transaction) -> (BroadcastHandle, NetworkMessage) {
        let txid = tx.txid();
        let (reply_tx, reply_rx) = oneshot::channel();
        let now = Instant::now();
        self.pending.insert(
            txid,
            PendingBroadcast {
                tx,
                deadline: now + self.timeout,
                last_announce: now,
                reply: Some(reply_tx),
            },
        );
        let announce = NetworkMessage::Inv(vec![Inventory::Tx(txid)]);
        (
            BroadcastHandle {
                txid,
                outcome: reply_rx,
            },
            announce,
        )
    }

    /// Serves a peer's `getdata` for our announced transactions.
    pub fn serve_getdata(&self, inventory: &[Inventory]) -> Vec<NetworkMessage> {
        inventory
            .iter()
            .filter_map(|item| match item {
                Inventory::Tx(txid) | Inventory::WitnessTx(txid) => self
                    .pending
                    .get(txid)
                    .map(|pending| NetworkMessage::Tx(pending.tx.clone())),
                _ => None,
            })
            .collect()
    }

    /// Applies a `reject` message. Returns the rejected txid when it was
    /// one of ours.
    pub fn handle_reject(&mut self, reject: &Reject) -> Option<Txid> {
        if reject.message != "tx" {
            return None;
        }
        let txid = Txid::from_byte_array(reject.hash?);
        let mut pending = self.pending.remove(&txid)?;
        if let Some(reply) = pending.reply.take() {
            let _ = reply.send(BroadcastOutcome::Rejected {
                code: reject.ccode,
                reason: reject.reason.clone(),
            });
        }
        Some(txid)
    }

    /// Output scripts of all pending transactions, the filter queries for
    /// acceptance checks on new blocks.
    pub fn watch_queries(&self) -> Vec<Vec<u8>> {
        self.pending
            .values()
            .flat_map(|p| p.tx.output.iter().map(|o| o.script_pubkey.as_bytes().to_vec()))
            .collect()
    }

    /// Resolves any pending transactions found in a connected block.
    pub fn confirm_in_block(&mut self, block: &Block, height: u32) -> Vec<Txid> {
        let block_hash = block.block_hash();
        let mut confirmed = Vec::new();
        for tx in &block.txdata {
            let txid = tx.txid();
            if let Some(mut pending) = self.pending.remove(&txid) {
                if let Some(reply) = pending.reply.take() {
                    let _ = reply.send(BroadcastOutcome::Accepted { block_hash, height });
                }
                confirmed.push(txid);
            }
        }
        confirmed
    }

    /// Re-announcements that are due, and expiry of transactions past
    /// their deadline.
    pub fn tick(&mut self) -> Vec<NetworkMessage> {
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut announcements = Vec::new();
        for (txid, pending) in self.pending.iter_mut() {
            if now >= pending.deadline {
                expired.push(*txid);
                continue;
            }
            if now.duration_since(pending.last_announce) >= REBROADCAST_INTERVAL {
                pending.last_announce = now;
                announcements.push(NetworkMessage::Inv(vec![Inventory::Tx(*txid)]));
            }
        }
        for txid in expired {
            if let Some(mut pending) = self.pending.remove(&txid) {
                if let Some(reply) = pending.reply.take() {
                    let _ = reply.send(BroadcastOutcome::TimedOut);
                }
            }
        }
        announcements
    }

    /// Fails everything out, for shutdown.
    pub fn drain(&mut self) {
        for (_, mut pending) in self.pending.drain() {
            if let Some(reply) = pending.reply.take() {
                let _ = reply.send(BroadcastOutcome::TimedOut);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bisonwire::message::network::RejectCode;
    use bisonwire::{BlockHeader, ScriptBuf, TxOut};

    fn sample_tx(tag: u8) -> Transaction {
        Transaction {
            version: 2,
            input: vec![],
            output: vec![TxOut {
                value: 5_000,
                script_pubkey: ScriptBuf::from_bytes(vec![0x00, 0x14, tag]),
            }],
            lock_time: 0,
            mweb: None,
        }
    }

    #[tokio::test]
    async fn reject_resolves_handle() {
        let mut broadcaster = Broadcaster::new(Duration::from_secs(60));
        let (handle, announce) = broadcaster.insert(sample_tx(1));
        assert!(matches!(announce, NetworkMessage::Inv(ref inv) if inv.len() == 1));

        let reject = Reject {
            message: "tx".into(),
            ccode: RejectCode::InsufficientFee,
            reason: "fee too low".into(),
            hash: Some(handle.txid.to_byte_array()),
        };
        assert_eq!(broadcaster.handle_reject(&reject), Some(handle.txid));
        match handle.outcome.await.unwrap() {
            BroadcastOutcome::Rejected { code, .. } => {
                assert_eq!(code, RejectCode::InsufficientFee)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(broadcaster.is_empty());
    }

    #[tokio::test]
    async fn confirmation_resolves_handle() {
        let mut broadcaster = Broadcaster::new(Duration::from_secs(60));
        let tx = sample_tx(2);
        let (handle, _) = broadcaster.insert(tx.clone());

        let params = bisonwire::chain_params(bisonwire::ChainKind::Bitcoin, bisonwire::Network::Regtest);
        let block = Block {
            header: BlockHeader {
                version: 1,
                prev_blockhash: params.genesis_hash,
                merkle_root: bisonwire::TxMerkleNode::all_zeros(),
                time: 0,
                bits: params.pow_limit_bits,
                nonce: 0,
            },
            txdata: vec![tx],
        };
        let confirmed = broadcaster.confirm_in_block(&block, 1);
        assert_eq!(confirmed, vec![handle.txid]);
        match handle.outcome.await.unwrap() {
            BroadcastOutcome::Accepted { height, .. } => assert_eq!(height, 1),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn getdata_served_for_pending_only() {
        let mut broadcaster = Broadcaster::new(Duration::from_secs(60));
        let tx = sample_tx(3);
        let txid = tx.txid();
        broadcaster.insert(tx);

        let served = broadcaster.serve_getdata(&[
            Inventory::Tx(txid),
            Inventory::Tx(Txid::from_byte_array([0xFF; 32])),
        ]);
        assert_eq!(served.len(), 1);
        assert!(matches!(&served[0], NetworkMessage::Tx(tx) if tx.txid() == txid));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_resolves_timed_out() {
        let mut broadcaster = Broadcaster::new(Duration::from_secs(10));
        let (handle, _) = broadcaster.insert(sample_tx(4));
        tokio::time::advance(Duration::from_secs(11)).await;
        let announcements = broadcaster.tick();
        assert!(announcements.is_empty());
        assert!(broadcaster.is_empty());
        assert!(matches!(handle.outcome.await.unwrap(), BroadcastOutcome::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn rebroadcast_due_after_interval() {
        let mut broadcaster = Broadcaster::new(Duration::from_secs(24 * 3600));
        broadcaster.insert(sample_tx(5));
        assert!(broadcaster.tick().is_empty());
        tokio::time::advance(REBROADCAST_INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(broadcaster.tick().len(), 1);
    }

    #[test]
    fn watch_queries_cover_outputs() {
        let mut broadcaster = Broadcaster::new(Duration::from_secs(60));
        broadcaster.insert(sample_tx(6));
        let queries = broadcaster.watch_queries();
        assert_eq!(queries, vec![vec![0x00, 0x14, 6]]);
    }
}

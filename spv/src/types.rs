//! Shared types for the SPV client.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use bisonwire::{BlockHash, OutPoint, ScriptBuf, Transaction, Txid};

/// Identifies one peer connection for its lifetime. Never reused within a
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Connection lifecycle of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Handshaking,
    Ready,
    Closing,
    Closed,
}

/// A snapshot of what we know about a peer.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub id: PeerId,
    pub address: SocketAddr,
    pub state: PeerState,
    pub version: u32,
    pub services: u64,
    pub user_agent: String,
    /// Best height the peer claimed in its version message.
    pub start_height: i32,
    pub connected_at: SystemTime,
    /// Smoothed ping round-trip, microseconds. Zero until measured.
    pub ping_rtt_micros: u64,
    pub wants_addrv2: bool,
}

/// Service bit: node can serve the full chain.
pub const SERVICE_NETWORK: u64 = 1 << 0;
/// Service bit: node serves BIP157/158 compact filters.
pub const SERVICE_COMPACT_FILTERS: u64 = 1 << 6;
/// Service bit: node supports segwit.
pub const SERVICE_WITNESS: u64 = 1 << 3;

/// Running totals of bytes moved on the wire, shared across all peers.
#[derive(Debug, Default)]
pub struct NetTotals {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl NetTotals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_in(&self, n: u64) {
        self.bytes_in.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_out(&self, n: u64) {
        self.bytes_out.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (u64, u64) {
        (self.bytes_in.load(Ordering::Relaxed), self.bytes_out.load(Ordering::Relaxed))
    }
}

/// A new best-chain tip, published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipUpdate {
    pub hash: BlockHash,
    pub height: u32,
    pub time: u32,
}

/// Something the wallet wants the chain scanned for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchItem {
    /// An output script, the unit BIP158 filters index.
    Script(ScriptBuf),
    /// An outpoint whose spend we want to see. Spends are detected in
    /// fetched blocks; to have the *filter* flag the spending block, also
    /// watch the outpoint's script, which the filter of the spending
    /// block contains.
    Outpoint(OutPoint),
}

/// An immutable snapshot of watched scripts and outpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSet {
    scripts: HashSet<ScriptBuf>,
    outpoints: HashSet<OutPoint>,
}

impl WatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items<I: IntoIterator<Item = WatchItem>>(items: I) -> Self {
        let mut set = WatchSet::new();
        for item in items {
            set.insert(item);
        }
        set
    }

    pub fn insert(&mut self, item: WatchItem) {
        match item {
            WatchItem::Script(script) => {
                self.scripts.insert(script);
            }
            WatchItem::Outpoint(outpoint) => {
                self.outpoints.insert(outpoint);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty() && self.outpoints.is_empty()
    }

    /// The raw script elements to test against a block filter.
    pub fn filter_queries(&self) -> impl Iterator<Item = &[u8]> {
        self.scripts.iter().map(|s| s.as_bytes())
    }

    /// Whether a transaction pays a watched script or spends a watched
    /// outpoint.
    pub fn matches_tx(&self, tx: &Transaction) -> bool {
        tx.output.iter().any(|out| self.scripts.contains(&out.script_pubkey))
            || tx.input.iter().any(|txin| self.outpoints.contains(&txin.previous_output))
    }
}

/// A block the rescan matched, with its wallet-relevant transactions.
#[derive(Debug, Clone)]
pub struct BlockMatch {
    pub height: u32,
    pub hash: BlockHash,
    /// Transactions paying a watched script or spending a watched
    /// outpoint, in block order.
    pub transactions: Vec<Transaction>,
}

/// Final outcome of a transaction broadcast.
#[derive(Debug, Clone)]
pub enum BroadcastOutcome {
    /// Seen in a block whose filter matched the transaction's outputs.
    Accepted { block_hash: BlockHash, height: u32 },
    /// A peer rejected it with the given code.
    Rejected {
        code: bisonwire::message::network::RejectCode,
        reason: String,
    },
    /// Not confirmed nor rejected within the broadcast deadline.
    TimedOut,
}

/// Handle returned by `send_transaction`.
pub struct BroadcastHandle {
    pub txid: Txid,
    /// Resolves once with the final outcome.
    pub outcome: tokio::sync::oneshot::Receiver<BroadcastOutcome>,
}

/// Phase of the sync pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Downloading headers from the sync peer.
    HeaderSync,
    /// Catching the filter-header chain up to the header tip.
    FilterHeaderSync,
    /// Synced; serving on-demand fetches and rescans.
    Idle,
}

/// Client-facing sync status snapshot.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub tip: TipUpdate,
    pub filter_header_height: u32,
    pub peer_count: usize,
    /// Best height claimed by any connected peer.
    pub best_peer_height: i32,
    pub is_current: bool,
}

/// Map of peers keyed by id, the shape the connection manager shares.
pub type PeerMap = HashMap<PeerId, std::sync::Arc<crate::network::Peer>>;

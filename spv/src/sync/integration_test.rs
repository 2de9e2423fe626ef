//! End-to-end sync tests against a scripted in-process peer.
//!
//! The fake peer owns a synthetic regtest chain (headers, blocks,
//! filters) and answers the protocol honestly: headers after the
//! locator, cfheaders/cfilters from its filter chain, blocks on getdata,
//! and the inv/getdata/tx dance for broadcasts. It can be told to serve
//! blocks out of request order to exercise the rescan reorder window.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Mutex;

use bisonwire::bip158::{BlockFilter, GcsFilterWriter, FILTER_TYPE_BASIC};
use bisonwire::message::address::Address;
use bisonwire::message::filter::{CFCheckpt, CFHeaders, CFilter};
use bisonwire::message::blockdata::Inventory;
use bisonwire::message::network::VersionMessage;
use bisonwire::message::NetworkMessage;
use bisonwire::{
    chain_params, Block, BlockHash, BlockHeader, ChainKind, FilterHeader, Network, OutPoint,
    ScriptBuf, Transaction, TxIn, TxMerkleNode, TxOut,
};

use crate::client::SpvClient;
use crate::config::ClientConfig;
use crate::network::connection::Connection;
use crate::storage::MemoryStorage;
use crate::types::{BroadcastOutcome, NetTotals, WatchItem, WatchSet};

const WATCHED_SCRIPT: &[u8] = &[0x00, 0x14, 0xAB, 0xCD];

fn coinbase_like(height: u32, script: &[u8]) -> Transaction {
    Transaction {
        version: 2,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::from_bytes(height.to_le_bytes().to_vec()),
            sequence: u32::MAX,
            witness: vec![],
        }],
        output: vec![TxOut {
            value: 50_0000_0000,
            script_pubkey: ScriptBuf::from_bytes(script.to_vec()),
        }],
        lock_time: 0,
        mweb: None,
    }
}

/// One fake block with its filter.
struct FakeBlock {
    header: BlockHeader,
    block: Block,
    filter: Vec<u8>,
}

/// A synthetic regtest chain the fake peer serves from.
struct FakeChain {
    blocks: Vec<FakeBlock>, // height 1.. (genesis implicit)
    filter_headers: Vec<FilterHeader>, // index = height, [0] anchors
    by_hash: HashMap<BlockHash, u32>,
}

impl FakeChain {
    fn new() -> FakeChain {
        let params = chain_params(ChainKind::Bitcoin, Network::Regtest);
        let genesis_filter = GcsFilterWriter::new(&params.genesis_hash).finish();
        let anchor = BlockFilter::new(&genesis_filter).filter_header(&FilterHeader::all_zeros());
        let mut by_hash = HashMap::new();
        by_hash.insert(params.genesis_hash, 0);
        FakeChain {
            blocks: Vec::new(),
            filter_headers: vec![anchor],
            by_hash,
        }
    }

    fn params(&self) -> &'static bisonwire::ChainParams {
        chain_params(ChainKind::Bitcoin, Network::Regtest)
    }

    fn tip_height(&self) -> u32 {
        self.blocks.len() as u32
    }

    fn tip_hash(&self) -> BlockHash {
        self.blocks
            .last()
            .map(|b| b.header.block_hash())
            .unwrap_or(self.params().genesis_hash)
    }

    fn header_at(&self, height: u32) -> BlockHeader {
        if height == 0 {
            self.params().genesis
        } else {
            self.blocks[height as usize - 1].header
        }
    }

    /// Mines one block containing `txs` (plus a coinbase-ish filler).
    fn mine(&mut self, txs: Vec<Transaction>) -> BlockHash {
        let params = self.params();
        let height = self.tip_height() + 1;
        let prev = self.header_at(height - 1);
        let mut txdata = vec![coinbase_like(height, &[0x51])];
        txdata.extend(txs);

        let mut merkle = [0u8; 32];
        merkle[..4].copy_from_slice(&height.to_le_bytes());
        merkle[4] = 0xFA;
        let mut header = BlockHeader {
            version: 1,
            prev_blockhash: prev.block_hash(),
            merkle_root: TxMerkleNode::from_byte_array(merkle),
            time: prev.time + 60,
            bits: prev.bits,
            nonce: 0,
        };
        while !params.header_pow_valid(&header) {
            header.nonce += 1;
        }
        let hash = header.block_hash();

        let mut writer = GcsFilterWriter::new(&hash);
        for tx in &txdata {
            for out in &tx.output {
                writer.add_element(out.script_pubkey.as_bytes());
            }
        }
        let filter = writer.finish();
        let prev_fh = *self.filter_headers.last().expect("anchor always present");
        self.filter_headers.push(BlockFilter::new(&filter).filter_header(&prev_fh));

        self.by_hash.insert(hash, height);
        self.blocks.push(FakeBlock {
            header,
            block: Block { header, txdata },
            filter,
        });
        hash
    }

    fn headers_after(&self, locator: &[BlockHash]) -> Vec<BlockHeader> {
        let from = locator
            .iter()
            .find_map(|hash| self.by_hash.get(hash).copied())
            .unwrap_or(0);
        ((from + 1)..=self.tip_height()).map(|h| self.header_at(h)).collect()
    }
}

/// Serves the wire protocol for one inbound connection.
struct FakePeer {
    chain: Arc<Mutex<FakeChain>>,
    /// Buffer block getdata and serve them newest-first once this many
    /// are queued, to test out-of-order arrival.
    reverse_blocks_after: Option<usize>,
}

impl FakePeer {
    async fn run(self, mut conn: Connection) {
        // Server side of the handshake.
        let start_height = self.chain.lock().await.tip_height() as i32;
        loop {
            match conn.recv().await {
                Ok(NetworkMessage::Version(_)) => {
                    let addr = conn.addr;
                    let services = crate::types::SERVICE_NETWORK
                        | crate::types::SERVICE_COMPACT_FILTERS
                        | crate::types::SERVICE_WITNESS;
                    conn.send(&NetworkMessage::Version(VersionMessage {
                        version: 70016,
                        services,
                        timestamp: 0,
                        receiver: Address::new(&addr, 0),
                        sender: Address::new(&addr, services),
                        nonce: rand::random(),
                        user_agent: "/fake-node:0.1/".into(),
                        start_height,
                        relay: true,
                    }))
                    .await
                    .unwrap();
                    conn.send(&NetworkMessage::Verack).await.unwrap();
                }
                Ok(NetworkMessage::Verack) => break,
                Ok(_) => {}
                Err(e) => panic!("fake peer handshake failed: {e}"),
            }
        }

        let mut deferred_blocks: Vec<BlockHash> = Vec::new();
        loop {
            let msg = match conn.recv().await {
                Ok(msg) => msg,
                Err(_) => return,
            };
            match msg {
                NetworkMessage::Ping(nonce) => {
                    conn.send(&NetworkMessage::Pong(nonce)).await.unwrap();
                }
                NetworkMessage::GetHeaders(req) => {
                    let headers = self.chain.lock().await.headers_after(&req.locator_hashes);
                    conn.send(&NetworkMessage::Headers(headers)).await.unwrap();
                }
                NetworkMessage::GetCFCheckpt(req) => {
                    let chain = self.chain.lock().await;
                    let mut checkpoints = Vec::new();
                    let mut interval = 1000usize;
                    while interval <= chain.tip_height() as usize {
                        checkpoints.push(chain.filter_headers[interval]);
                        interval += 1000;
                    }
                    conn.send(&NetworkMessage::CFCheckpt(CFCheckpt {
                        filter_type: FILTER_TYPE_BASIC,
                        stop_hash: req.stop_hash,
                        filter_headers: checkpoints,
                    }))
                    .await
                    .unwrap();
                }
                NetworkMessage::GetCFHeaders(req) => {
                    let chain = self.chain.lock().await;
                    let stop = chain.by_hash[&req.stop_hash];
                    let previous = chain.filter_headers[req.start_height as usize - 1];
                    let hashes = (req.start_height..=stop)
                        .map(|h| BlockFilter::new(&chain.blocks[h as usize - 1].filter).filter_hash())
                        .collect();
                    conn.send(&NetworkMessage::CFHeaders(CFHeaders {
                        filter_type: FILTER_TYPE_BASIC,
                        stop_hash: req.stop_hash,
                        previous_filter_header: previous,
                        filter_hashes: hashes,
                    }))
                    .await
                    .unwrap();
                }
                NetworkMessage::GetCFilters(req) => {
                    let chain = self.chain.lock().await;
                    let stop = chain.by_hash[&req.stop_hash];
                    for height in req.start_height..=stop {
                        let fake = &chain.blocks[height as usize - 1];
                        conn.send(&NetworkMessage::CFilter(CFilter {
                            filter_type: FILTER_TYPE_BASIC,
                            block_hash: fake.header.block_hash(),
                            filter: fake.filter.clone(),
                        }))
                        .await
                        .unwrap();
                    }
                }
                NetworkMessage::GetData(items) => {
                    for item in items {
                        match item {
                            Inventory::Block(hash) | Inventory::WitnessBlock(hash) => {
                                deferred_blocks.push(hash);
                            }
                            _ => {}
                        }
                    }
                    let flush = match self.reverse_blocks_after {
                        Some(n) => deferred_blocks.len() >= n,
                        None => true,
                    };
                    if flush {
                        // Serve newest-first when reversal is on.
                        if self.reverse_blocks_after.is_some() {
                            let chain = self.chain.lock().await;
                            deferred_blocks
                                .sort_by_key(|hash| std::cmp::Reverse(chain.by_hash[hash]));
                        }
                        for hash in deferred_blocks.drain(..) {
                            let block = {
                                let chain = self.chain.lock().await;
                                let height = chain.by_hash[&hash];
                                chain.blocks[height as usize - 1].block.clone()
                            };
                            conn.send(&NetworkMessage::Block(block)).await.unwrap();
                        }
                    }
                }
                NetworkMessage::Inv(items) => {
                    // The client is announcing a transaction; ask for it.
                    let wanted: Vec<Inventory> = items
                        .iter()
                        .filter(|i| matches!(i, Inventory::Tx(_)))
                        .copied()
                        .collect();
                    if !wanted.is_empty() {
                        conn.send(&NetworkMessage::GetData(wanted)).await.unwrap();
                    }
                }
                NetworkMessage::Tx(tx) => {
                    // Mine it and announce the block.
                    let hash = self.chain.lock().await.mine(vec![tx]);
                    conn.send(&NetworkMessage::Inv(vec![Inventory::Block(hash)]))
                        .await
                        .unwrap();
                }
                _ => {}
            }
        }
    }
}

/// Boots a fake peer listener, returning its address.
async fn spawn_fake_peer(
    chain: Arc<Mutex<FakeChain>>,
    reverse_blocks_after: Option<usize>,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, peer_addr)) = listener.accept().await else {
                return;
            };
            let params = chain_params(ChainKind::Bitcoin, Network::Regtest);
            let conn = Connection::from_stream(
                stream,
                peer_addr,
                params,
                Arc::new(NetTotals::new()),
            );
            let peer = FakePeer {
                chain: chain.clone(),
                reverse_blocks_after,
            };
            tokio::spawn(peer.run(conn));
        }
    });
    addr
}

async fn synced_client(
    chain: Arc<Mutex<FakeChain>>,
    reverse_blocks_after: Option<usize>,
) -> SpvClient<MemoryStorage> {
    let addr = spawn_fake_peer(chain.clone(), reverse_blocks_after).await;
    let config = ClientConfig::new(ChainKind::Bitcoin, Network::Regtest)
        .with_connect_only(vec![addr])
        .with_target_outbound(1);
    let mut client = SpvClient::new(config, MemoryStorage::new()).await.unwrap();
    client.start().await.unwrap();

    let expected = chain.lock().await.tip_height();
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            if let Some(status) = client.status().await {
                if status.tip.height == expected
                    && status.filter_header_height == expected
                    && status.is_current
                {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("client must sync the fake chain");
    client
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn header_and_filter_header_sync() {
    let chain = Arc::new(Mutex::new(FakeChain::new()));
    {
        let mut chain = chain.lock().await;
        for _ in 0..5 {
            chain.mine(vec![]);
        }
    }
    let mut client = synced_client(chain.clone(), None).await;

    let (tip_hash, tip_height) = client.best_block().await;
    assert_eq!(tip_height, 5);
    assert_eq!(tip_hash, chain.lock().await.tip_hash());
    let (bytes_in, bytes_out) = client.net_totals();
    assert!(bytes_in > 0 && bytes_out > 0);

    client.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rescan_emits_matches_in_ascending_order() {
    let chain = Arc::new(Mutex::new(FakeChain::new()));
    {
        let mut chain = chain.lock().await;
        // Watched outputs land at heights 2 and 4 of a 6-block chain.
        chain.mine(vec![]);
        chain.mine(vec![coinbase_like(100, WATCHED_SCRIPT)]);
        chain.mine(vec![]);
        chain.mine(vec![coinbase_like(101, WATCHED_SCRIPT)]);
        chain.mine(vec![]);
        chain.mine(vec![]);
    }
    // Serve blocks newest-first so the reorder window has to work.
    let mut client = synced_client(chain.clone(), Some(2)).await;

    let watch = WatchSet::from_items([WatchItem::Script(ScriptBuf::from_bytes(
        WATCHED_SCRIPT.to_vec(),
    ))]);
    let mut events = client.rescan(1, 6, watch).await.unwrap();

    let mut matched_heights = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while let Ok(Some(event)) =
        tokio::time::timeout_at(deadline, events.recv()).await
    {
        let event = event.expect("rescan events must be matches");
        assert_eq!(event.transactions.len(), 1, "one watched tx per match");
        matched_heights.push(event.height);
    }
    assert_eq!(matched_heights, vec![2, 4]);

    client.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broadcast_resolves_accepted_when_mined() {
    let chain = Arc::new(Mutex::new(FakeChain::new()));
    {
        let mut chain = chain.lock().await;
        for _ in 0..3 {
            chain.mine(vec![]);
        }
    }
    let mut client = synced_client(chain.clone(), None).await;

    // A fresh "wallet" transaction.
    let tx = Transaction {
        version: 2,
        input: vec![TxIn {
            previous_output: OutPoint::new(bisonwire::Txid::from_byte_array([0x77; 32]), 0),
            script_sig: ScriptBuf::from_bytes(vec![0x51]),
            sequence: u32::MAX,
            witness: vec![],
        }],
        output: vec![TxOut {
            value: 10_000,
            script_pubkey: ScriptBuf::from_bytes(vec![0x00, 0x14, 0x99]),
        }],
        lock_time: 0,
        mweb: None,
    };
    let txid = tx.txid();

    let mut tips = client.subscribe_tip();
    let handle = client.send_transaction(tx).await.unwrap();
    assert_eq!(handle.txid, txid);

    // The fake mines it into block 4 and announces; the client follows
    // the filter-match path to confirmation.
    let outcome = tokio::time::timeout(Duration::from_secs(30), handle.outcome)
        .await
        .expect("broadcast must resolve")
        .expect("sender not dropped");
    match outcome {
        BroadcastOutcome::Accepted { height, .. } => assert_eq!(height, 4),
        other => panic!("unexpected outcome {:?}", other),
    }

    // The tip subscription saw the new block too.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let tip = tokio::time::timeout_at(deadline, tips.recv())
            .await
            .expect("tip update expected")
            .expect("subscription live");
        if tip.height == 4 {
            break;
        }
    }

    client.stop().await.unwrap();
}

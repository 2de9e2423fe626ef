//! The client facade the wallet collaborator drives.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bisonwire::{Block, BlockHash, BlockHeader, ChainParams, Transaction};

use crate::chain::HeaderStore;
use crate::config::ClientConfig;
use crate::error::{Result, SpvError, SyncResult};
use crate::network::constants::{BLOCK_RESULT_CHANNEL_DEPTH, INBOUND_CHANNEL_DEPTH};
use crate::network::NetworkManager;
use crate::storage::Storage;
use crate::sync::{Command, SyncManager};
use crate::types::{
    BlockMatch, BroadcastHandle, PeerInfo, SyncStatus, TipUpdate, WatchSet,
};

/// A multi-asset SPV client.
///
/// Construction wires the pieces together; [`SpvClient::start`] brings
/// the network up and spawns the sync task. All methods are safe to call
/// from any task.
pub struct SpvClient<S: Storage> {
    config: ClientConfig,
    params: &'static ChainParams,
    network: Arc<NetworkManager>,
    chain: Arc<RwLock<HeaderStore>>,
    command_tx: mpsc::Sender<Command>,
    tip_tx: broadcast::Sender<TipUpdate>,
    cancel: CancellationToken,
    sync: Option<SyncManager<S>>,
    sync_task: Option<JoinHandle<std::result::Result<(), SpvError>>>,
}

impl<S: Storage> SpvClient<S> {
    /// Builds a client over the given storage, loading any persisted
    /// chain state.
    pub async fn new(config: ClientConfig, mut storage: S) -> Result<SpvClient<S>> {
        config.validate()?;
        let params = config.params();
        let chain = Arc::new(RwLock::new(HeaderStore::load(params, &mut storage).await?));

        let (events_tx, events_rx) = mpsc::channel(INBOUND_CHANNEL_DEPTH);
        let (command_tx, command_rx) = mpsc::channel(64);
        let (tip_tx, _) = broadcast::channel(64);
        let cancel = CancellationToken::new();

        let network = NetworkManager::new(config.clone(), events_tx, cancel.child_token());
        let sync = SyncManager::new(
            &config,
            network.clone(),
            storage,
            chain.clone(),
            events_rx,
            command_rx,
            tip_tx.clone(),
            cancel.child_token(),
        );

        Ok(SpvClient {
            config,
            params,
            network,
            chain,
            command_tx,
            tip_tx,
            cancel,
            sync: Some(sync),
            sync_task: None,
        })
    }

    /// Starts dialing peers and syncing. Idempotent once running.
    pub async fn start(&mut self) -> Result<()> {
        let Some(sync) = self.sync.take() else {
            return Ok(());
        };
        tracing::info!(
            chain = %self.params.chain,
            network = %self.params.network,
            "starting SPV client"
        );
        NetworkManager::start(&self.network).await;
        self.sync_task = Some(tokio::spawn(sync.run()));
        Ok(())
    }

    /// Cancels everything and waits for the sync task to unwind.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(task) = self.sync_task.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "sync task ended with error"),
                Err(e) => tracing::warn!(error = %e, "sync task join failed"),
            }
        }
        tracing::info!("SPV client stopped");
        Ok(())
    }

    /// The best-chain tip.
    pub async fn best_block(&self) -> (BlockHash, u32) {
        let chain = self.chain.read().await;
        let tip = chain.tip();
        (tip.block_hash(), tip.height)
    }

    /// A header by block hash, on any known branch.
    pub async fn get_block_header(&self, hash: &BlockHash) -> Option<BlockHeader> {
        self.chain.read().await.get_by_hash(hash).map(|entry| entry.header)
    }

    /// The best-chain hash at a height.
    pub async fn get_block_hash(&self, height: u32) -> Option<BlockHash> {
        self.chain.read().await.hash_at_height(height)
    }

    /// Fetches a full block from the network.
    pub async fn get_block(&self, hash: BlockHash) -> Result<Block> {
        let (reply, rx) = oneshot::channel();
        self.send_command(Command::GetBlock { hash, reply }).await?;
        let block = rx.await.map_err(|_| SpvError::BackendShuttingDown)??;
        Ok(block)
    }

    /// Hands a signed transaction to the broadcaster. The returned handle
    /// resolves with the final outcome.
    pub async fn send_transaction(&self, tx: Transaction) -> Result<BroadcastHandle> {
        let (reply, rx) = oneshot::channel();
        self.send_command(Command::SendTransaction { tx, reply }).await?;
        let handle = rx.await.map_err(|_| SpvError::BackendShuttingDown)??;
        Ok(handle)
    }

    /// Streams filter-matched blocks over `[start, end]` for the watch
    /// set, in ascending height order. Dropping the receiver cancels the
    /// rescan and its outstanding fetches.
    pub async fn rescan(
        &self,
        start: u32,
        end: u32,
        watch: WatchSet,
    ) -> Result<mpsc::Receiver<SyncResult<BlockMatch>>> {
        let (events, rx) = mpsc::channel(BLOCK_RESULT_CHANNEL_DEPTH);
        self.send_command(Command::Rescan {
            start,
            end,
            watch,
            events,
        })
        .await?;
        Ok(rx)
    }

    /// Subscribes to best-tip updates.
    pub fn subscribe_tip(&self) -> broadcast::Receiver<TipUpdate> {
        self.tip_tx.subscribe()
    }

    /// Adds an address to the book and dials it.
    pub async fn add_peer(&self, addr: SocketAddr) {
        NetworkManager::add_peer(&self.network, addr).await;
    }

    /// Bans an address and disconnects any matching peer.
    pub async fn ban_peer(&self, addr: SocketAddr, reason: &str) {
        self.network.ban_peer(addr, reason).await;
    }

    /// Lifts all bans and forgets accumulated misbehavior.
    pub async fn unban_all(&self) {
        self.network.unban_all().await;
    }

    /// Whether the client believes it is caught up with the network.
    pub async fn is_current(&self) -> bool {
        self.status().await.map(|s| s.is_current).unwrap_or(false)
    }

    /// A full sync status snapshot.
    pub async fn status(&self) -> Option<SyncStatus> {
        let (reply, rx) = oneshot::channel();
        self.send_command(Command::Status { reply }).await.ok()?;
        rx.await.ok()
    }

    /// Total bytes received and sent since startup.
    pub fn net_totals(&self) -> (u64, u64) {
        self.network.net_totals()
    }

    /// Snapshot of all peer connections.
    pub async fn peer_info(&self) -> Vec<PeerInfo> {
        self.network.peer_infos().await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn params(&self) -> &'static ChainParams {
        self.params
    }

    async fn send_command(&self, command: Command) -> Result<()> {
        if self.sync.is_some() {
            // Not started yet; nothing is servicing the channel.
            return Err(SpvError::BackendShuttingDown);
        }
        self.command_tx.send(command).await.map_err(|_| SpvError::BackendShuttingDown)
    }
}

impl<S: Storage> Drop for SpvClient<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use bisonwire::{ChainKind, Network};

    #[tokio::test]
    async fn fresh_client_exposes_genesis() {
        let config = ClientConfig::new(ChainKind::Litecoin, Network::Mainnet);
        let params = config.params();
        let client = SpvClient::new(config, MemoryStorage::new()).await.unwrap();
        let (hash, height) = client.best_block().await;
        assert_eq!(height, 0);
        assert_eq!(hash, params.genesis_hash);
        assert_eq!(client.get_block_hash(0).await, Some(params.genesis_hash));
        assert_eq!(client.get_block_header(&hash).await, Some(params.genesis));
        assert_eq!(client.net_totals(), (0, 0));
    }

    #[tokio::test]
    async fn commands_fail_before_start() {
        let config = ClientConfig::new(ChainKind::Bitcoin, Network::Regtest);
        let client = SpvClient::new(config, MemoryStorage::new()).await.unwrap();
        assert!(client
            .get_block(bisonwire::BlockHash::all_zeros())
            .await
            .is_err());
        assert!(!client.is_current().await);
    }

    #[tokio::test]
    async fn start_and_stop() {
        let config = ClientConfig::new(ChainKind::Bitcoin, Network::Regtest)
            .with_connect_only(vec!["127.0.0.1:1".parse().unwrap()]);
        let mut client = SpvClient::new(config, MemoryStorage::new()).await.unwrap();
        client.start().await.unwrap();
        // The sync task is alive and answering.
        assert!(client.status().await.is_some());
        client.stop().await.unwrap();
    }
}

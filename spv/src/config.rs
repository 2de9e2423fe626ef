//! Client configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use bisonwire::{chain_params, ChainKind, ChainParams, Network};

use crate::error::SpvError;

/// Hard ceiling on the outbound connection target.
pub const MAX_TARGET_OUTBOUND: usize = 125;

/// Configuration for an [`crate::client::SpvClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub chain: ChainKind,
    pub network: Network,
    /// Dial ONLY these addresses; disables discovery and the address book
    /// scheduler.
    pub connect_only: Vec<SocketAddr>,
    /// Dial these in addition to whatever the address book yields.
    pub add_peers: Vec<SocketAddr>,
    /// How many outbound peers to maintain.
    pub target_outbound: usize,
    /// Directory for the address-book file. `None` keeps it in memory.
    pub data_dir: Option<PathBuf>,
    pub user_agent: String,
    /// How long a misbehaving peer stays banned.
    pub ban_duration: Duration,
    /// How long a broadcast keeps retrying before giving up.
    pub broadcast_timeout: Duration,
}

impl ClientConfig {
    pub fn new(chain: ChainKind, network: Network) -> Self {
        ClientConfig {
            chain,
            network,
            connect_only: Vec::new(),
            add_peers: Vec::new(),
            target_outbound: 8,
            data_dir: None,
            user_agent: format!("/utxo-spv:{}/", env!("CARGO_PKG_VERSION")),
            ban_duration: Duration::from_secs(24 * 60 * 60),
            broadcast_timeout: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn with_data_dir(mut self, dir: PathBuf) -> Self {
        self.data_dir = Some(dir);
        self
    }

    pub fn with_connect_only(mut self, peers: Vec<SocketAddr>) -> Self {
        self.connect_only = peers;
        self
    }

    pub fn with_add_peers(mut self, peers: Vec<SocketAddr>) -> Self {
        self.add_peers = peers;
        self
    }

    pub fn with_target_outbound(mut self, target: usize) -> Self {
        self.target_outbound = target;
        self
    }

    /// The chain parameters this configuration selects.
    pub fn params(&self) -> &'static ChainParams {
        chain_params(self.chain, self.network)
    }

    pub fn validate(&self) -> Result<(), SpvError> {
        if self.target_outbound == 0 {
            return Err(SpvError::Config("target_outbound must be at least 1".into()));
        }
        if self.target_outbound > MAX_TARGET_OUTBOUND {
            return Err(SpvError::Config(format!(
                "target_outbound {} exceeds maximum {}",
                self.target_outbound, MAX_TARGET_OUTBOUND
            )));
        }
        if self.user_agent.len() > 256 {
            return Err(SpvError::Config("user agent too long".into()));
        }
        Ok(())
    }
}

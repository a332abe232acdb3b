//! Node orchestration: one chain, one miner, one sync peer

use crate::chain::{Blockchain, SharedChain};
use crate::config::Config;
use crate::error::Result;
use crate::events::ChainEvent;
use crate::miner::{Miner, MinerStats};
use crate::network::{connect_peer, PeerLink, PortAllocator};
use crate::shutdown::ShutdownSignal;
use crate::sync::{ChainSynchronizer, SyncStats};
use crossbeam_channel::Receiver;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Idle,
    Running,
    Stopping,
}

/// Owns the chain and drives the mining and sync loops for one process.
pub struct Node {
    config: Config,
    chain: SharedChain,
    ports: PortAllocator,
    shutdown: ShutdownSignal,
    state: NodeState,
}

/// Join handles for the loops started by [`Node::start`].
pub struct NodeTasks {
    pub miner: Option<JoinHandle<MinerStats>>,
    pub sync: JoinHandle<Result<SyncStats>>,
}

impl Node {
    pub fn new(config: Config) -> Self {
        let chain = Blockchain::with_params(config.chain).into_shared();
        let ports = PortAllocator::new(config.network.port_range());
        Self {
            config,
            chain,
            ports,
            shutdown: ShutdownSignal::new(),
            state: NodeState::Idle,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn chain(&self) -> SharedChain {
        self.chain.clone()
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Chain-changed events for a presentation layer.
    pub fn subscribe(&self) -> Receiver<ChainEvent> {
        self.chain.read().subscribe()
    }

    /// Bind a listener on a fresh random port from the configured range.
    pub async fn listen(&mut self) -> Result<(u16, TcpListener)> {
        self.ports.bind(self.config.network.host).await
    }

    /// Dial a peer on the configured host.
    pub async fn connect(&self, port: u16) -> Result<TcpStream> {
        connect_peer(self.config.network.host, port).await
    }

    pub fn outbound_link(&self, port: u16) -> PeerLink {
        PeerLink::outbound(self.config.network.host, port)
    }

    pub fn spawn_miner(&self) -> JoinHandle<MinerStats> {
        let miner = Miner::new(self.chain.clone());
        let shutdown = self.shutdown.listener();
        tokio::task::spawn_blocking(move || miner.run(shutdown))
    }

    pub fn spawn_sync(&self, link: PeerLink) -> JoinHandle<Result<SyncStats>> {
        let synchronizer = ChainSynchronizer::new(self.chain.clone(), self.config.sync.clone());
        let shutdown = self.shutdown.listener();
        tokio::spawn(async move {
            let result = synchronizer.run(link, shutdown).await;
            if let Err(e) = &result {
                error!("Sync loop failed: {}", e);
            }
            result
        })
    }

    /// Start syncing over `link`, plus mining when enabled in the config.
    pub fn start(&mut self, link: PeerLink) -> NodeTasks {
        info!(
            "Starting node ({}, mining {})",
            link.describe(),
            if self.config.miner.enabled { "on" } else { "off" }
        );
        let miner = self.config.miner.enabled.then(|| self.spawn_miner());
        let sync = self.spawn_sync(link);
        self.state = NodeState::Running;
        NodeTasks { miner, sync }
    }

    /// Ask both loops to stop. They finish their current step first.
    pub fn shutdown(&mut self) {
        if self.state != NodeState::Stopping {
            info!("Shutting down node");
            self.state = NodeState::Stopping;
        }
        self.shutdown.trigger();
    }
}

impl NodeTasks {
    /// Wait for both loops. Task panics surface as `None` stats.
    pub async fn join(self) -> (Option<MinerStats>, Option<Result<SyncStats>>) {
        let miner = match self.miner {
            Some(handle) => handle.await.ok(),
            None => None,
        };
        let sync = self.sync.await.ok();
        (miner, sync)
    }
}

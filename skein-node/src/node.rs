use libp2p::identity::Keypair;
use libp2p::{Multiaddr, PeerId};
use std::sync::Arc;
use tracing::{info, warn};

use skein_p2p::config::StaticRepo;
use skein_p2p::dht::DhtConstructor;
use skein_p2p::factory::{HostFactory, HostOut, HostParams};
use skein_p2p::gate::ConnectionGate;
use skein_p2p::host::Host;
use skein_p2p::lifecycle::Lifecycle;
use skein_p2p::options::OptionGroups;
use skein_p2p::peerstore::Peerstore;
use skein_p2p::swarm::SwarmHostBuilder;
use skein_p2p::validator::NamespacedValidator;
use skein_storage::memory::MemoryDatastore;
use skein_storage::sqlite::SqliteDatastore;
use skein_storage::traits::Datastore;

use crate::config::{IdentityConfig, NodeConfig, StorageConfig};
use crate::error::NodeError;

/// A running skein host plus the lifecycle that shuts it down.
pub struct Node {
    config: NodeConfig,
    lifecycle: Lifecycle,
    gate: Arc<ConnectionGate>,
    out: HostOut,
}

/// Create a datastore backend from the storage configuration.
fn create_datastore(config: &StorageConfig) -> Result<Arc<dyn Datastore>, NodeError> {
    match config.db_type.as_str() {
        "memory" => Ok(Arc::new(MemoryDatastore::new())),
        "sqlite" => {
            let data_dir = std::path::Path::new(&config.data_dir);
            std::fs::create_dir_all(data_dir)?;
            let db_path = data_dir.join("skein.db");
            let store = SqliteDatastore::open(db_path.to_str().unwrap_or("skein.db"))?;
            Ok(Arc::new(store))
        }
        other => Err(NodeError::ConfigError {
            reason: format!(
                "unknown storage backend '{}', expected 'memory' or 'sqlite'",
                other
            ),
        }),
    }
}

/// Derive the host identity from the configured seed, or generate one.
pub fn load_identity(config: &IdentityConfig) -> Result<Keypair, NodeError> {
    let Some(seed_hex) = &config.keypair_seed else {
        return Ok(Keypair::generate_ed25519());
    };
    let mut seed = hex::decode(seed_hex).map_err(|e| NodeError::ConfigError {
        reason: format!("invalid keypair seed hex: {}", e),
    })?;
    if seed.len() != 32 {
        return Err(NodeError::ConfigError {
            reason: format!("keypair seed must be 32 bytes, got {}", seed.len()),
        });
    }
    Keypair::ed25519_from_bytes(&mut seed).map_err(|e| NodeError::ConfigError {
        reason: format!("invalid keypair seed: {}", e),
    })
}

impl Node {
    /// Create a new node from the given configuration.
    pub async fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let identity = load_identity(&config.identity)?;
        let datastore = create_datastore(&config.storage)?;

        let factory = HostFactory::new(Arc::new(SwarmHostBuilder), Arc::new(DhtConstructor));
        let gate = Arc::clone(factory.gate());
        if config.debug.block_all_connections {
            warn!("blocking all connections");
            gate.set_block_all(true);
        }

        let mut options = OptionGroups::new();
        options.register("swarm-config", config.p2p.swarm.options()?);

        let lifecycle = Lifecycle::new();
        let params = HostParams {
            repo: Arc::new(StaticRepo::new(config.p2p.clone(), datastore)),
            validator: Arc::new(NamespacedValidator::with_defaults()),
            identity,
            peerstore: Arc::new(Peerstore::new()),
            options,
        };
        let out = factory.build(&lifecycle, params).await?;

        info!(
            peer_id = %out.host.peer_id(),
            storage = %config.storage.db_type,
            "node created"
        );

        Ok(Self {
            config,
            lifecycle,
            gate,
            out,
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.out.host.peer_id()
    }

    pub fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.out.host.listen_addrs()
    }

    /// Toggle for refusing all connections at runtime.
    pub fn gate(&self) -> &Arc<ConnectionGate> {
        &self.gate
    }

    pub fn host(&self) -> &HostOut {
        &self.out
    }

    /// Bootstrap routing and dial the bootstrap peers.
    pub async fn start(&self) -> Result<(), NodeError> {
        self.out.routing.bootstrap().await?;
        for peer in self.config.p2p.bootstrap_peers()? {
            let peer_id = peer.peer_id;
            match self.out.host.connect(peer).await {
                Ok(()) => info!(%peer_id, "connected to bootstrap peer"),
                Err(e) => warn!(%peer_id, error = %e, "failed to connect to bootstrap peer"),
            }
        }
        Ok(())
    }

    /// Start, then run until Ctrl+C.
    pub async fn run(&self) -> Result<(), NodeError> {
        self.start().await?;
        info!(peer_id = %self.peer_id(), "node running");
        tokio::signal::ctrl_c().await?;
        info!("Received shutdown signal");
        self.shutdown().await
    }

    /// Gracefully shut down the node.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        info!("Shutting down node...");
        self.lifecycle.stop().await?;
        info!("Node shutdown complete");
        Ok(())
    }
}

use clap::{Args, Parser, Subcommand};
use libp2p::identity::Keypair;
use rand::RngCore;
use tracing::info;

use crate::config::{NodeConfig, CONFIG_FILE_NAME};
use crate::error::NodeError;
use crate::node::Node;

#[derive(Parser)]
#[command(name = "skein", about = "skein p2p node", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the node
    Run {
        /// Path to config file
        #[arg(short, long, default_value = CONFIG_FILE_NAME)]
        config: String,
        #[command(flatten)]
        overrides: RunOverrides,
    },
    /// Initialize a new node configuration
    Init {
        /// Output directory
        #[arg(short, long, default_value = ".")]
        dir: String,
    },
    /// Generate a new identity seed
    Keygen,
}

/// Command-line overrides applied on top of the config file.
#[derive(Args, Debug, Default, Clone)]
pub struct RunOverrides {
    /// Listen multiaddr (can be specified multiple times; replaces the config's list)
    #[arg(long = "listen")]
    pub listen: Vec<String>,
    /// Bootstrap peer multiaddr with /p2p/<peer-id> (can be specified multiple times)
    #[arg(long = "bootstrap")]
    pub bootstrap: Vec<String>,
    /// Refuse every connection attempt (debugging aid)
    #[arg(long)]
    pub block_all: bool,
    /// Storage backend: "memory" or "sqlite"
    #[arg(long)]
    pub storage: Option<String>,
    /// Override data directory path
    #[arg(long)]
    pub data_dir: Option<String>,
    /// Hex-encoded 32-byte seed for a deterministic identity
    #[arg(long)]
    pub keypair_seed: Option<String>,
}

impl RunOverrides {
    pub fn apply(self, config: &mut NodeConfig) {
        if !self.listen.is_empty() {
            config.p2p.swarm.listen_addrs = self.listen;
        }
        config.p2p.bootstrap.extend(self.bootstrap);
        if self.block_all {
            config.debug.block_all_connections = true;
        }
        if let Some(db) = self.storage {
            config.storage.db_type = db;
        }
        if let Some(dir) = self.data_dir {
            config.storage.data_dir = dir;
        }
        if let Some(seed) = self.keypair_seed {
            config.identity.keypair_seed = Some(seed);
        }
    }
}

impl Cli {
    /// Log level from the config file `run` will use, or "info".
    pub fn log_level(&self) -> String {
        match &self.command {
            Command::Run { config, .. } => NodeConfig::load(config)
                .map(|c| c.logging.level)
                .unwrap_or_else(|_| "info".to_string()),
            _ => "info".to_string(),
        }
    }
}

pub async fn run(cli: Cli) -> Result<(), NodeError> {
    match cli.command {
        Command::Run { config, overrides } => {
            let mut config = NodeConfig::load(&config)?;
            overrides.apply(&mut config);
            let node = Node::new(config).await?;
            node.run().await
        }
        Command::Init { dir } => {
            NodeConfig::init(&dir)?;
            info!(%dir, "wrote {}", CONFIG_FILE_NAME);
            println!("Initialized {}/{}", dir, CONFIG_FILE_NAME);
            Ok(())
        }
        Command::Keygen => {
            let mut seed = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut seed);
            let seed_hex = hex::encode(seed);
            let keypair =
                Keypair::ed25519_from_bytes(seed).map_err(|e| NodeError::ConfigError {
                    reason: e.to_string(),
                })?;
            println!("Seed: {}", seed_hex);
            println!("Peer ID: {}", keypair.public().to_peer_id());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_overrides() {
        let cli = Cli::try_parse_from([
            "skein",
            "run",
            "--config",
            "node.toml",
            "--listen",
            "/ip4/127.0.0.1/tcp/5001",
            "--listen",
            "/ip4/127.0.0.1/tcp/5002",
            "--block-all",
            "--storage",
            "memory",
        ])
        .unwrap();

        let Command::Run { config, overrides } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(config, "node.toml");
        assert_eq!(overrides.listen.len(), 2);
        assert!(overrides.block_all);

        let mut node_config = NodeConfig::default();
        node_config.p2p.bootstrap = vec!["/dnsaddr/existing".to_string()];
        RunOverrides {
            bootstrap: vec!["/dnsaddr/extra".to_string()],
            ..overrides
        }
        .apply(&mut node_config);

        assert_eq!(
            node_config.p2p.swarm.listen_addrs,
            vec!["/ip4/127.0.0.1/tcp/5001", "/ip4/127.0.0.1/tcp/5002"]
        );
        assert_eq!(
            node_config.p2p.bootstrap,
            vec!["/dnsaddr/existing", "/dnsaddr/extra"]
        );
        assert!(node_config.debug.block_all_connections);
        assert_eq!(node_config.storage.db_type, "memory");
    }

    #[test]
    fn test_empty_overrides_keep_config() {
        let mut config = NodeConfig::default();
        RunOverrides::default().apply(&mut config);
        assert_eq!(config.p2p.swarm.listen_addrs, vec!["/ip4/0.0.0.0/tcp/4001"]);
        assert!(!config.debug.block_all_connections);
    }

    #[test]
    fn test_log_level_defaults_to_info() {
        let cli = Cli::try_parse_from(["skein", "run", "--config", "/nonexistent/skein.toml"]).unwrap();
        assert_eq!(cli.log_level(), "info");
        let cli = Cli::try_parse_from(["skein", "keygen"]).unwrap();
        assert_eq!(cli.log_level(), "info");
    }

    #[test]
    fn test_log_level_from_config() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = NodeConfig::default();
        config.logging.level = "debug".to_string();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let cli = Cli::try_parse_from(["skein", "run", "--config", path.to_str().unwrap()]).unwrap();
        assert_eq!(cli.log_level(), "debug");
    }
}

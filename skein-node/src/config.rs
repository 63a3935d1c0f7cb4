use serde::{Deserialize, Serialize};
use skein_p2p::config::P2pConfig;
use std::path::Path;

use crate::error::NodeError;

/// File name written by `skein init`.
pub const CONFIG_FILE_NAME: &str = "skein.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub p2p: P2pConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Storage backend: "memory" or "sqlite"
    pub db_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Hex-encoded 32-byte ed25519 seed. A fresh identity is generated when unset.
    pub keypair_seed: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Refuse every connection attempt, inbound and outbound.
    pub block_all_connections: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let mut p2p = P2pConfig::default();
        p2p.swarm.listen_addrs = vec!["/ip4/0.0.0.0/tcp/4001".to_string()];
        Self {
            p2p,
            storage: StorageConfig {
                data_dir: dirs::home_dir()
                    .map(|h| h.join(".skein").join("data").to_string_lossy().into_owned())
                    .unwrap_or_else(|| "./skein-data".to_string()),
                db_type: "sqlite".to_string(),
            },
            identity: IdentityConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            debug: DebugConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, NodeError> {
        let contents = std::fs::read_to_string(path).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to read config file '{}': {}", path, e),
        })?;
        let config: NodeConfig = toml::from_str(&contents).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to parse config file '{}': {}", path, e),
        })?;
        Ok(config)
    }

    /// Initialize a default configuration file in the given directory.
    pub fn init(dir: &str) -> Result<(), NodeError> {
        let dir_path = Path::new(dir);
        if !dir_path.exists() {
            std::fs::create_dir_all(dir_path)?;
        }

        let config = NodeConfig::default();
        let toml_str = toml::to_string_pretty(&config).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to serialize default config: {}", e),
        })?;

        let config_path = dir_path.join(CONFIG_FILE_NAME);
        std::fs::write(&config_path, toml_str)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.p2p.swarm.listen_addrs, vec!["/ip4/0.0.0.0/tcp/4001"]);
        assert!(config.p2p.bootstrap.is_empty());
        assert_eq!(config.storage.db_type, "sqlite");
        assert!(config.identity.keypair_seed.is_none());
        assert!(!config.debug.block_all_connections);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_init_creates_config_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_str().unwrap();
        NodeConfig::init(dir).unwrap();

        let config_path = tmp.path().join(CONFIG_FILE_NAME);
        assert!(config_path.exists());

        let config = NodeConfig::load(config_path.to_str().unwrap()).unwrap();
        assert_eq!(config.p2p.swarm.listen_addrs, vec!["/ip4/0.0.0.0/tcp/4001"]);
        assert_eq!(config.storage.db_type, "sqlite");
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = NodeConfig::load("/nonexistent/path/skein.toml");
        assert!(matches!(result, Err(NodeError::ConfigError { .. })));
    }

    #[test]
    fn test_load_minimal_config() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"
[storage]
data_dir = "/tmp/skein"
db_type = "memory"

[logging]
level = "debug"

[p2p]
bootstrap = ["/ip4/1.2.3.4/tcp/4001/p2p/12D3KooWD3eckifWpRn9wQpMG9R9hX3sD158z7EqHWmweQAJU5SA"]

[p2p.experimental]
optimistic_provide = true

[p2p.routing]
loopback_addresses_on_lan_dht = true
"#,
        )
        .unwrap();

        let config = NodeConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.p2p.bootstrap.len(), 1);
        assert!(config.p2p.experimental.optimistic_provide);
        assert_eq!(config.p2p.experimental.optimistic_provide_jobs_pool_size, 0);
        assert!(config.p2p.routing.loopback_addresses_on_lan_dht());
        assert!(config.p2p.swarm.listen_addrs.is_empty());
        assert!(!config.debug.block_all_connections);
    }

    #[test]
    fn test_load_invalid_toml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "not = [valid").unwrap();
        assert!(NodeConfig::load(path.to_str().unwrap()).is_err());
    }
}

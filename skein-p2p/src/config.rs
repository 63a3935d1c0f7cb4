use libp2p::Multiaddr;
use serde::{Deserialize, Serialize};
use skein_storage::traits::Datastore;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::options::HostOption;
use crate::peerstore::AddrInfo;
use crate::protocol::DEFAULT_LOOPBACK_ADDRESSES_ON_LAN_DHT;

/// Network configuration consumed by the host factory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    /// Bootstrap peers as `/…/p2p/<peer-id>` multiaddr strings.
    pub bootstrap: Vec<String>,
    pub experimental: ExperimentalConfig,
    pub routing: RoutingConfig,
    pub swarm: SwarmConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentalConfig {
    /// Return from `provide` before the record is written.
    pub optimistic_provide: bool,
    /// Concurrent background provides; zero means the built-in default.
    pub optimistic_provide_jobs_pool_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Unset means [`DEFAULT_LOOPBACK_ADDRESSES_ON_LAN_DHT`].
    pub loopback_addresses_on_lan_dht: Option<bool>,
}

impl RoutingConfig {
    pub fn loopback_addresses_on_lan_dht(&self) -> bool {
        self.loopback_addresses_on_lan_dht
            .unwrap_or(DEFAULT_LOOPBACK_ADDRESSES_ON_LAN_DHT)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Addresses to listen on. Empty keeps the host dial-only.
    pub listen_addrs: Vec<String>,
    pub user_agent: Option<String>,
    pub idle_connection_timeout_secs: Option<u64>,
}

impl SwarmConfig {
    /// Translate the swarm section into host options, in a fixed order.
    pub fn options(&self) -> Result<Vec<HostOption>, ConfigError> {
        let mut opts = Vec::new();
        if !self.listen_addrs.is_empty() {
            let addrs = self
                .listen_addrs
                .iter()
                .map(|s| {
                    s.parse::<Multiaddr>()
                        .map_err(|e| ConfigError::InvalidListenAddr {
                            addr: s.clone(),
                            reason: e.to_string(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            opts.push(HostOption::ListenAddrs(addrs));
        }
        if let Some(agent) = &self.user_agent {
            opts.push(HostOption::UserAgent(agent.clone()));
        }
        if let Some(secs) = self.idle_connection_timeout_secs {
            opts.push(HostOption::IdleConnectionTimeout(Duration::from_secs(secs)));
        }
        Ok(opts)
    }
}

impl P2pConfig {
    /// Resolve the bootstrap list into peers, merging entries that name the
    /// same peer. Any unparsable entry fails the whole resolution.
    pub fn bootstrap_peers(&self) -> Result<Vec<AddrInfo>, ConfigError> {
        let mut peers: Vec<AddrInfo> = Vec::new();
        for entry in &self.bootstrap {
            let addr = entry
                .parse::<Multiaddr>()
                .map_err(|e| ConfigError::InvalidBootstrapPeer {
                    addr: entry.clone(),
                    reason: e.to_string(),
                })?;
            let info =
                AddrInfo::from_multiaddr(&addr).ok_or_else(|| ConfigError::InvalidBootstrapPeer {
                    addr: entry.clone(),
                    reason: "missing /p2p/<peer-id> component".to_string(),
                })?;
            match peers.iter_mut().find(|p| p.peer_id == info.peer_id) {
                Some(existing) => {
                    for a in info.addrs {
                        if !existing.addrs.contains(&a) {
                            existing.addrs.push(a);
                        }
                    }
                }
                None => peers.push(info),
            }
        }
        Ok(peers)
    }
}

/// Source of configuration and the datastore, as a node repository provides them.
pub trait Repo: Send + Sync {
    fn config(&self) -> Result<P2pConfig, ConfigError>;
    fn datastore(&self) -> Arc<dyn Datastore>;
}

/// A repository whose configuration is already materialized in memory.
pub struct StaticRepo {
    config: P2pConfig,
    datastore: Arc<dyn Datastore>,
}

impl StaticRepo {
    pub fn new(config: P2pConfig, datastore: Arc<dyn Datastore>) -> Self {
        Self { config, datastore }
    }
}

impl Repo for StaticRepo {
    fn config(&self) -> Result<P2pConfig, ConfigError> {
        Ok(self.config.clone())
    }

    fn datastore(&self) -> Arc<dyn Datastore> {
        Arc::clone(&self.datastore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libp2p::PeerId;

    fn bootstrap_entry(peer: &PeerId, ip: &str) -> String {
        format!("/ip4/{}/tcp/4001/p2p/{}", ip, peer)
    }

    #[test]
    fn test_default_config() {
        let config = P2pConfig::default();
        assert!(config.bootstrap.is_empty());
        assert!(!config.experimental.optimistic_provide);
        assert_eq!(
            config.routing.loopback_addresses_on_lan_dht(),
            DEFAULT_LOOPBACK_ADDRESSES_ON_LAN_DHT
        );
    }

    #[test]
    fn test_loopback_flag_explicit_value_wins() {
        let routing = RoutingConfig {
            loopback_addresses_on_lan_dht: Some(true),
        };
        assert!(routing.loopback_addresses_on_lan_dht());
    }

    #[test]
    fn test_bootstrap_peers_parse() {
        let peer = PeerId::random();
        let config = P2pConfig {
            bootstrap: vec![bootstrap_entry(&peer, "1.2.3.4")],
            ..Default::default()
        };
        let peers = config.bootstrap_peers().unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].peer_id, peer);
    }

    #[test]
    fn test_bootstrap_peers_merge_same_peer() {
        let peer = PeerId::random();
        let other = PeerId::random();
        let config = P2pConfig {
            bootstrap: vec![
                bootstrap_entry(&peer, "1.2.3.4"),
                bootstrap_entry(&other, "5.6.7.8"),
                bootstrap_entry(&peer, "9.9.9.9"),
            ],
            ..Default::default()
        };
        let peers = config.bootstrap_peers().unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].peer_id, peer);
        assert_eq!(peers[0].addrs.len(), 2);
        assert_eq!(peers[1].peer_id, other);
    }

    #[test]
    fn test_bootstrap_peers_invalid_multiaddr() {
        let config = P2pConfig {
            bootstrap: vec!["not-a-multiaddr".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            config.bootstrap_peers(),
            Err(ConfigError::InvalidBootstrapPeer { .. })
        ));
    }

    #[test]
    fn test_bootstrap_peers_missing_peer_id() {
        let config = P2pConfig {
            bootstrap: vec!["/ip4/1.2.3.4/tcp/4001".to_string()],
            ..Default::default()
        };
        let err = config.bootstrap_peers().unwrap_err();
        assert!(err.to_string().contains("/p2p"));
    }

    #[test]
    fn test_swarm_options_order() {
        let swarm = SwarmConfig {
            listen_addrs: vec!["/ip4/0.0.0.0/tcp/4001".to_string()],
            user_agent: Some("custom/1.0".to_string()),
            idle_connection_timeout_secs: Some(5),
        };
        let opts = swarm.options().unwrap();
        assert_eq!(opts.len(), 3);
        assert!(matches!(opts[0], HostOption::ListenAddrs(_)));
        assert!(matches!(opts[1], HostOption::UserAgent(_)));
        assert!(matches!(opts[2], HostOption::IdleConnectionTimeout(_)));
    }

    #[test]
    fn test_swarm_options_invalid_listen_addr() {
        let swarm = SwarmConfig {
            listen_addrs: vec!["nope".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            swarm.options(),
            Err(ConfigError::InvalidListenAddr { addr, .. }) if addr == "nope"
        ));
    }
}

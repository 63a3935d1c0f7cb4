use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

/// A peer together with the addresses it can be reached on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrInfo {
    pub peer_id: PeerId,
    pub addrs: Vec<Multiaddr>,
}

impl AddrInfo {
    pub fn new(peer_id: PeerId, addrs: Vec<Multiaddr>) -> Self {
        Self { peer_id, addrs }
    }

    /// Split a `/…/p2p/<peer-id>` multiaddr into its peer id and transport
    /// address. Returns `None` when the address does not end in `/p2p`.
    pub fn from_multiaddr(addr: &Multiaddr) -> Option<Self> {
        let mut transport = addr.clone();
        match transport.pop() {
            Some(Protocol::P2p(peer_id)) => {
                let addrs = if transport.is_empty() {
                    Vec::new()
                } else {
                    vec![transport]
                };
                Some(Self { peer_id, addrs })
            }
            _ => None,
        }
    }
}

/// Everything the peerstore knows about one peer.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    /// Known dialable addresses, without `/p2p` suffix.
    pub addrs: Vec<Multiaddr>,
    /// Protocol version reported via identify.
    pub protocol_version: Option<String>,
    /// Agent version reported via identify.
    pub agent_version: Option<String>,
    /// When the peer was first recorded.
    pub first_seen: Instant,
}

/// Shared address book used by the host and its routing.
#[derive(Debug, Default)]
pub struct Peerstore {
    peers: RwLock<HashMap<PeerId, PeerRecord>>,
}

impl Peerstore {
    /// Create an empty peerstore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record addresses for a peer, skipping ones already known.
    pub fn add_addrs(&self, peer_id: PeerId, addrs: impl IntoIterator<Item = Multiaddr>) {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        let record = peers.entry(peer_id).or_insert_with(|| PeerRecord {
            addrs: Vec::new(),
            protocol_version: None,
            agent_version: None,
            first_seen: Instant::now(),
        });
        for addr in addrs {
            if !record.addrs.contains(&addr) {
                record.addrs.push(addr);
            }
        }
    }

    /// Known addresses for a peer (empty if unknown).
    pub fn addrs(&self, peer_id: &PeerId) -> Vec<Multiaddr> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer_id)
            .map(|r| r.addrs.clone())
            .unwrap_or_default()
    }

    /// The peer and its addresses, if the peer has any.
    pub fn addr_info(&self, peer_id: &PeerId) -> Option<AddrInfo> {
        let addrs = self.addrs(peer_id);
        if addrs.is_empty() {
            None
        } else {
            Some(AddrInfo::new(*peer_id, addrs))
        }
    }

    /// Forget a peer entirely.
    pub fn remove_peer(&self, peer_id: &PeerId) -> bool {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer_id)
            .is_some()
    }

    /// Store identify metadata for a known peer. No-op for unknown peers.
    pub fn set_identify(&self, peer_id: &PeerId, protocol_version: String, agent_version: String) {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = peers.get_mut(peer_id) {
            record.protocol_version = Some(protocol_version);
            record.agent_version = Some(agent_version);
        }
    }

    /// Agent version reported by a peer.
    pub fn agent_version(&self, peer_id: &PeerId) -> Option<String> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer_id)
            .and_then(|r| r.agent_version.clone())
    }

    /// All known peer ids.
    pub fn peers(&self) -> Vec<PeerId> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_add_and_get_addrs() {
        let ps = Peerstore::new();
        let peer = PeerId::random();
        ps.add_addrs(peer, [addr("/ip4/10.0.0.1/tcp/4001")]);
        assert_eq!(ps.addrs(&peer), vec![addr("/ip4/10.0.0.1/tcp/4001")]);
        assert_eq!(ps.peer_count(), 1);
    }

    #[test]
    fn test_add_addrs_dedups() {
        let ps = Peerstore::new();
        let peer = PeerId::random();
        ps.add_addrs(peer, [addr("/ip4/10.0.0.1/tcp/4001")]);
        ps.add_addrs(
            peer,
            [addr("/ip4/10.0.0.1/tcp/4001"), addr("/ip4/10.0.0.2/tcp/4001")],
        );
        assert_eq!(ps.addrs(&peer).len(), 2);
    }

    #[test]
    fn test_unknown_peer_has_no_addrs() {
        let ps = Peerstore::new();
        let peer = PeerId::random();
        assert!(ps.addrs(&peer).is_empty());
        assert!(ps.addr_info(&peer).is_none());
    }

    #[test]
    fn test_remove_peer() {
        let ps = Peerstore::new();
        let peer = PeerId::random();
        ps.add_addrs(peer, [addr("/ip4/10.0.0.1/tcp/4001")]);
        assert!(ps.remove_peer(&peer));
        assert!(!ps.remove_peer(&peer));
        assert_eq!(ps.peer_count(), 0);
    }

    #[test]
    fn test_set_identify() {
        let ps = Peerstore::new();
        let peer = PeerId::random();
        ps.add_addrs(peer, []);
        ps.set_identify(&peer, "/skein/id/1.0.0".into(), "skein/0.1.0".into());
        assert_eq!(ps.agent_version(&peer).as_deref(), Some("skein/0.1.0"));
    }

    #[test]
    fn test_set_identify_unknown_peer_is_noop() {
        let ps = Peerstore::new();
        let peer = PeerId::random();
        ps.set_identify(&peer, "p".into(), "a".into());
        assert_eq!(ps.agent_version(&peer), None);
        assert_eq!(ps.peer_count(), 0);
    }

    #[test]
    fn test_addr_info_from_multiaddr() {
        let peer = PeerId::random();
        let full = addr(&format!("/ip4/1.2.3.4/tcp/4001/p2p/{}", peer));
        let info = AddrInfo::from_multiaddr(&full).unwrap();
        assert_eq!(info.peer_id, peer);
        assert_eq!(info.addrs, vec![addr("/ip4/1.2.3.4/tcp/4001")]);
    }

    #[test]
    fn test_addr_info_requires_p2p_suffix() {
        assert!(AddrInfo::from_multiaddr(&addr("/ip4/1.2.3.4/tcp/4001")).is_none());
    }
}

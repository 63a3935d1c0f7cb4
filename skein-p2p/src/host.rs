use async_trait::async_trait;
use libp2p::identity::Keypair;
use libp2p::{Multiaddr, PeerId};
use std::sync::Arc;
use tracing::debug;

use crate::error::HostError;
use crate::options::HostOption;
use crate::peerstore::{AddrInfo, Peerstore};
use crate::routing::Routing;

/// The local node's network-facing entity.
#[async_trait]
pub trait Host: Send + Sync {
    fn peer_id(&self) -> PeerId;

    fn peerstore(&self) -> &Arc<Peerstore>;

    /// Addresses the host is listening on.
    fn listen_addrs(&self) -> Vec<Multiaddr>;

    /// Dial a peer on the given addresses (or the peerstore's, if none).
    async fn connect(&self, peer: AddrInfo) -> Result<(), HostError>;

    /// Shut the host down. Closing twice is not an error.
    async fn close(&self) -> Result<(), HostError>;

    fn is_closed(&self) -> bool;
}

/// Builds hosts from an identity, a peerstore and an ordered option list.
#[async_trait]
pub trait HostBuilder: Send + Sync {
    async fn build(
        &self,
        identity: Keypair,
        peerstore: Arc<Peerstore>,
        options: Vec<HostOption>,
    ) -> Result<Arc<dyn Host>, HostError>;
}

/// What routing gets to see of a host: identity and address book.
#[derive(Debug, Clone)]
pub struct HostView {
    pub peer_id: PeerId,
    pub peerstore: Arc<Peerstore>,
}

impl HostView {
    pub fn new(peer_id: PeerId, peerstore: Arc<Peerstore>) -> Self {
        Self { peer_id, peerstore }
    }

    pub fn of(host: &dyn Host) -> Self {
        Self {
            peer_id: host.peer_id(),
            peerstore: Arc::clone(host.peerstore()),
        }
    }
}

/// A host paired with its routing. Dials to peers without known addresses
/// are resolved through routing first.
pub struct RoutedHost {
    inner: Arc<dyn Host>,
    routing: Arc<dyn Routing>,
}

impl RoutedHost {
    /// Attach routing to a built host.
    pub fn attach(inner: Arc<dyn Host>, routing: Arc<dyn Routing>) -> Self {
        Self { inner, routing }
    }

    pub fn routing(&self) -> &Arc<dyn Routing> {
        &self.routing
    }

    pub fn inner(&self) -> &Arc<dyn Host> {
        &self.inner
    }
}

#[async_trait]
impl Host for RoutedHost {
    fn peer_id(&self) -> PeerId {
        self.inner.peer_id()
    }

    fn peerstore(&self) -> &Arc<Peerstore> {
        self.inner.peerstore()
    }

    fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.inner.listen_addrs()
    }

    async fn connect(&self, peer: AddrInfo) -> Result<(), HostError> {
        if !peer.addrs.is_empty() {
            self.peerstore().add_addrs(peer.peer_id, peer.addrs.iter().cloned());
        }
        let known = self.peerstore().addrs(&peer.peer_id);
        let addrs = if known.is_empty() {
            debug!(peer_id = %peer.peer_id, "no known addresses, asking routing");
            let found = self.routing.find_peer(peer.peer_id).await?;
            self.peerstore().add_addrs(found.peer_id, found.addrs.iter().cloned());
            found.addrs
        } else {
            known
        };
        self.inner.connect(AddrInfo::new(peer.peer_id, addrs)).await
    }

    async fn close(&self) -> Result<(), HostError> {
        self.inner.close().await
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

//! In-memory host for tests and tooling.
//!
//! A mock host never touches the network. By default its builder ignores the
//! routing option, which is what drives the factory's fallback path.

use async_trait::async_trait;
use libp2p::identity::Keypair;
use libp2p::{Multiaddr, PeerId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::error::HostError;
use crate::gate::ConnectionGater;
use crate::host::{Host, HostBuilder, HostView};
use crate::options::{HostOption, HostSettings};
use crate::peerstore::{AddrInfo, Peerstore};

/// Builds [`MockHost`]s and keeps a handle to each one.
#[derive(Default)]
pub struct MockHostBuilder {
    invoke_routing: bool,
    failure: Option<String>,
    built: Mutex<Vec<Arc<MockHost>>>,
}

impl MockHostBuilder {
    /// A builder that ignores the routing option.
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder that invokes the routing option during build.
    pub fn invoking_routing() -> Self {
        Self {
            invoke_routing: true,
            ..Self::default()
        }
    }

    /// A builder whose every build fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::default()
        }
    }

    /// A builder that invokes the routing option, then fails with `reason`.
    pub fn failing_after_routing(reason: impl Into<String>) -> Self {
        Self {
            invoke_routing: true,
            failure: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Hosts built so far, oldest first.
    pub fn hosts(&self) -> Vec<Arc<MockHost>> {
        self.built
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl HostBuilder for MockHostBuilder {
    async fn build(
        &self,
        identity: Keypair,
        peerstore: Arc<Peerstore>,
        options: Vec<HostOption>,
    ) -> Result<Arc<dyn Host>, HostError> {
        let settings = HostSettings::from_options(&options);
        let peer_id = identity.public().to_peer_id();

        if self.invoke_routing {
            if let Some(hook) = &settings.routing {
                hook.invoke(HostView::new(peer_id, Arc::clone(&peerstore)))
                    .await?;
            }
        }
        if let Some(reason) = &self.failure {
            return Err(HostError::Build {
                reason: reason.clone(),
            });
        }

        let host = Arc::new(MockHost {
            peer_id,
            peerstore,
            listen_addrs: settings.listen_addrs,
            gater: settings.gater,
            options,
            connected: Mutex::new(HashSet::new()),
            closes: AtomicUsize::new(0),
        });
        debug!(%peer_id, "mock host built");
        self.built
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&host));
        Ok(host)
    }
}

pub struct MockHost {
    peer_id: PeerId,
    peerstore: Arc<Peerstore>,
    listen_addrs: Vec<Multiaddr>,
    gater: Option<Arc<dyn ConnectionGater>>,
    options: Vec<HostOption>,
    connected: Mutex<HashSet<PeerId>>,
    closes: AtomicUsize,
}

impl MockHost {
    /// The option list the host was built with, in order.
    pub fn options(&self) -> &[HostOption] {
        &self.options
    }

    /// Number of times `close` actually shut the host down.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(peer)
    }

    fn admit(&self, peer: &PeerId, addrs: &[Multiaddr]) -> bool {
        let Some(gater) = &self.gater else {
            return true;
        };
        gater.intercept_peer_dial(peer)
            && addrs.iter().all(|a| gater.intercept_addr_dial(Some(peer), a))
    }
}

#[async_trait]
impl Host for MockHost {
    fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn peerstore(&self) -> &Arc<Peerstore> {
        &self.peerstore
    }

    fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.listen_addrs.clone()
    }

    async fn connect(&self, peer: AddrInfo) -> Result<(), HostError> {
        if self.is_closed() {
            return Err(HostError::Closed);
        }
        let addrs = if peer.addrs.is_empty() {
            self.peerstore.addrs(&peer.peer_id)
        } else {
            peer.addrs
        };
        if addrs.is_empty() {
            return Err(HostError::NoAddresses {
                peer: peer.peer_id.to_string(),
            });
        }
        if !self.admit(&peer.peer_id, &addrs) {
            return Err(HostError::Dial {
                peer: peer.peer_id.to_string(),
                reason: "blocked by connection gater".to_string(),
            });
        }
        self.connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer.peer_id);
        Ok(())
    }

    async fn close(&self) -> Result<(), HostError> {
        // Only the first close counts.
        let _ = self
            .closes
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst);
        self.connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.close_count() > 0
    }
}

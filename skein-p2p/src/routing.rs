//! Routing construction.
//!
//! [`RoutingResolver`] assembles everything a routing implementation needs
//! except the host, and [`RoutingHook`] is the handle a host builder calls
//! once it has a host to offer.

use async_trait::async_trait;
use libp2p::PeerId;
use skein_storage::traits::Datastore;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::config::P2pConfig;
use crate::error::{ConfigError, RoutingError};
use crate::host::HostView;
use crate::lifecycle::LifecycleContext;
use crate::peerstore::AddrInfo;
use crate::validator::Validator;

/// Peer and content routing.
#[async_trait]
pub trait Routing: Send + Sync {
    /// Seed the routing table from the bootstrap peers.
    async fn bootstrap(&self) -> Result<(), RoutingError>;

    async fn find_peer(&self, peer: PeerId) -> Result<AddrInfo, RoutingError>;

    /// Announce that this host can provide `key`.
    async fn provide(&self, key: &[u8]) -> Result<(), RoutingError>;

    async fn find_providers(&self, key: &[u8], limit: usize) -> Result<Vec<AddrInfo>, RoutingError>;

    async fn put_value(&self, key: &str, value: Vec<u8>) -> Result<(), RoutingError>;

    async fn get_value(&self, key: &str) -> Result<Vec<u8>, RoutingError>;
}

/// Everything a routing constructor receives.
#[derive(Clone)]
pub struct RoutingOptionArgs {
    pub ctx: LifecycleContext,
    pub datastore: Arc<dyn Datastore>,
    pub validator: Arc<dyn Validator>,
    pub bootstrap_peers: Vec<AddrInfo>,
    pub optimistic_provide: bool,
    pub optimistic_provide_jobs_pool_size: usize,
    pub loopback_addresses_on_lan_dht: bool,
    /// Set per call; `None` only in the resolver's template.
    pub host: Option<HostView>,
}

impl fmt::Debug for RoutingOptionArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingOptionArgs")
            .field("bootstrap_peers", &self.bootstrap_peers.len())
            .field("optimistic_provide", &self.optimistic_provide)
            .field(
                "optimistic_provide_jobs_pool_size",
                &self.optimistic_provide_jobs_pool_size,
            )
            .field(
                "loopback_addresses_on_lan_dht",
                &self.loopback_addresses_on_lan_dht,
            )
            .field("host", &self.host.as_ref().map(|h| h.peer_id))
            .finish()
    }
}

/// Builds a routing implementation from its arguments.
#[async_trait]
pub trait RoutingConstructor: Send + Sync {
    async fn construct(&self, args: RoutingOptionArgs) -> Result<Arc<dyn Routing>, RoutingError>;
}

/// Holds the routing arguments and the constructor that consumes them.
pub struct RoutingResolver {
    template: RoutingOptionArgs,
    constructor: Arc<dyn RoutingConstructor>,
}

impl RoutingResolver {
    /// Resolve bootstrap peers and flags from `config`. Fails if any
    /// bootstrap entry is invalid.
    pub fn new(
        config: &P2pConfig,
        datastore: Arc<dyn Datastore>,
        validator: Arc<dyn Validator>,
        ctx: LifecycleContext,
        constructor: Arc<dyn RoutingConstructor>,
    ) -> Result<Self, ConfigError> {
        let bootstrap_peers = config.bootstrap_peers()?;
        let template = RoutingOptionArgs {
            ctx,
            datastore,
            validator,
            bootstrap_peers,
            optimistic_provide: config.experimental.optimistic_provide,
            optimistic_provide_jobs_pool_size: config
                .experimental
                .optimistic_provide_jobs_pool_size,
            loopback_addresses_on_lan_dht: config.routing.loopback_addresses_on_lan_dht(),
            host: None,
        };
        Ok(Self {
            template,
            constructor,
        })
    }

    /// Arguments shared by every construction (host unset).
    pub fn args(&self) -> &RoutingOptionArgs {
        &self.template
    }

    /// Construct routing for `host`. Only the host differs between calls.
    pub async fn construct(&self, host: HostView) -> Result<Arc<dyn Routing>, RoutingError> {
        let mut args = self.template.clone();
        debug!(peer_id = %host.peer_id, "constructing routing");
        args.host = Some(host);
        self.constructor.construct(args).await
    }
}

/// Routing constructor handed to host builders through `HostOption::Routing`.
///
/// Records what it built so the caller can tell afterwards whether the
/// builder used it.
#[derive(Clone)]
pub struct RoutingHook {
    resolver: Arc<RoutingResolver>,
    produced: Arc<Mutex<Option<Arc<dyn Routing>>>>,
    invocations: Arc<AtomicUsize>,
}

impl RoutingHook {
    pub fn new(resolver: Arc<RoutingResolver>) -> Self {
        Self {
            resolver,
            produced: Arc::new(Mutex::new(None)),
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Build routing for a partially-built host and record it.
    pub async fn invoke(&self, host: HostView) -> Result<Arc<dyn Routing>, RoutingError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let routing = self.resolver.construct(host).await?;
        *self.produced.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&routing));
        Ok(routing)
    }

    /// Take the recorded routing, if the hook ran successfully.
    pub fn take(&self) -> Option<Arc<dyn Routing>> {
        self.produced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// How many times a builder invoked the hook.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn resolver(&self) -> &Arc<RoutingResolver> {
        &self.resolver
    }
}

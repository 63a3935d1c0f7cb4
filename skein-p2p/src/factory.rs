//! Host construction entry point.
//!
//! [`HostFactory::build`] composes the host options, builds the host, makes
//! sure routing exists (constructed by the builder through the routing hook,
//! or directly afterwards), attaches it, and registers the host's shutdown
//! with the lifecycle. It either returns a complete host or registers
//! nothing.

use libp2p::identity::Keypair;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Repo;
use crate::error::HostError;
use crate::gate::ConnectionGate;
use crate::host::{Host, HostBuilder, HostView, RoutedHost};
use crate::lifecycle::{Hook, Lifecycle};
use crate::options::{HostOption, OptionGroups};
use crate::peerstore::Peerstore;
use crate::routing::{Routing, RoutingConstructor, RoutingHook, RoutingResolver};
use crate::validator::Validator;

/// Name of the lifecycle hook that closes the host.
pub const HOST_STOP_HOOK: &str = "p2p-host";

/// Inputs for one host build.
pub struct HostParams {
    pub repo: Arc<dyn Repo>,
    pub validator: Arc<dyn Validator>,
    pub identity: Keypair,
    pub peerstore: Arc<Peerstore>,
    /// Extra options, applied after the factory's own defaults.
    pub options: OptionGroups,
}

/// A built host and the routing attached to it.
#[derive(Clone)]
pub struct HostOut {
    pub host: Arc<RoutedHost>,
    pub routing: Arc<dyn Routing>,
}

pub struct HostFactory {
    builder: Arc<dyn HostBuilder>,
    constructor: Arc<dyn RoutingConstructor>,
    gate: Arc<ConnectionGate>,
}

impl HostFactory {
    /// A factory with its own connection gate, initially allowing everything.
    pub fn new(builder: Arc<dyn HostBuilder>, constructor: Arc<dyn RoutingConstructor>) -> Self {
        Self::with_gate(builder, constructor, Arc::new(ConnectionGate::new()))
    }

    pub fn with_gate(
        builder: Arc<dyn HostBuilder>,
        constructor: Arc<dyn RoutingConstructor>,
        gate: Arc<ConnectionGate>,
    ) -> Self {
        Self {
            builder,
            constructor,
            gate,
        }
    }

    /// The gate installed on every host this factory builds.
    pub fn gate(&self) -> &Arc<ConnectionGate> {
        &self.gate
    }

    pub async fn build(&self, lifecycle: &Lifecycle, params: HostParams) -> Result<HostOut, HostError> {
        let HostParams {
            repo,
            validator,
            identity,
            peerstore,
            options,
        } = params;

        let mut opts = vec![
            HostOption::NoListenAddrs,
            HostOption::ConnectionGater(Arc::clone(&self.gate) as _),
        ];
        debug!(contributors = ?options.contributors(), extra = options.len(), "composing host options");
        opts.extend(options.flatten());

        let config = repo.config()?;
        let resolver = Arc::new(RoutingResolver::new(
            &config,
            repo.datastore(),
            validator,
            lifecycle.context(),
            Arc::clone(&self.constructor),
        )?);
        let hook = RoutingHook::new(Arc::clone(&resolver));
        opts.push(HostOption::Routing(hook.clone()));

        let host = match self.builder.build(identity, peerstore, opts).await {
            Ok(host) => host,
            Err(e) => {
                if hook.take().is_some() {
                    debug!("discarding routing built for a host that failed to build");
                }
                return Err(e);
            }
        };

        let routing = match hook.take() {
            Some(routing) => routing,
            None => {
                debug!(peer_id = %host.peer_id(), "builder did not construct routing, constructing directly");
                match resolver.construct(HostView::of(host.as_ref())).await {
                    Ok(routing) => routing,
                    Err(e) => {
                        if let Err(close_err) = host.close().await {
                            warn!(error = %close_err, "failed to close host after routing failure");
                        }
                        return Err(e.into());
                    }
                }
            }
        };

        let routed = Arc::new(RoutedHost::attach(host, Arc::clone(&routing)));
        let closing = Arc::clone(&routed);
        let registered = lifecycle.append(Hook::on_stop(HOST_STOP_HOOK, move || async move {
            closing.close().await
        }));
        if registered.is_err() {
            if let Err(close_err) = routed.close().await {
                warn!(error = %close_err, "failed to close host after lifecycle stopped");
            }
            return Err(HostError::LifecycleStopped);
        }

        info!(
            peer_id = %routed.peer_id(),
            bootstrap_peers = resolver.args().bootstrap_peers.len(),
            "p2p host ready"
        );
        Ok(HostOut {
            host: routed,
            routing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{P2pConfig, StaticRepo};
    use crate::dht::DhtConstructor;
    use crate::gate::ConnectionGater;
    use crate::mock::MockHostBuilder;
    use crate::validator::NamespacedValidator;
    use skein_storage::memory::MemoryDatastore;

    fn params(options: OptionGroups) -> HostParams {
        HostParams {
            repo: Arc::new(StaticRepo::new(
                P2pConfig::default(),
                Arc::new(MemoryDatastore::new()),
            )),
            validator: Arc::new(NamespacedValidator::with_defaults()),
            identity: Keypair::generate_ed25519(),
            peerstore: Arc::new(Peerstore::new()),
            options,
        }
    }

    #[tokio::test]
    async fn test_option_composition_order() {
        let builder = Arc::new(MockHostBuilder::new());
        let factory = HostFactory::new(builder.clone(), Arc::new(DhtConstructor));
        let mut groups = OptionGroups::new();
        groups
            .register("swarm", vec![HostOption::UserAgent("a".into())])
            .register("extra", vec![HostOption::UserAgent("b".into())]);

        let lc = Lifecycle::new();
        factory.build(&lc, params(groups)).await.unwrap();

        let hosts = builder.hosts();
        let opts = hosts[0].options();
        assert_eq!(opts.len(), 5);
        assert!(matches!(opts[0], HostOption::NoListenAddrs));
        assert!(matches!(opts[1], HostOption::ConnectionGater(_)));
        assert!(matches!(&opts[2], HostOption::UserAgent(a) if a == "a"));
        assert!(matches!(&opts[3], HostOption::UserAgent(b) if b == "b"));
        assert!(matches!(opts[4], HostOption::Routing(_)));
    }

    #[tokio::test]
    async fn test_registers_single_stop_hook() {
        let factory = HostFactory::new(Arc::new(MockHostBuilder::new()), Arc::new(DhtConstructor));
        let lc = Lifecycle::new();
        let out = factory.build(&lc, params(OptionGroups::new())).await.unwrap();
        assert_eq!(lc.hook_names(), vec![HOST_STOP_HOOK]);
        assert_eq!(out.host.peer_id(), out.host.inner().peer_id());
    }

    #[tokio::test]
    async fn test_gate_shared_with_host() {
        let builder = Arc::new(MockHostBuilder::new());
        let factory = HostFactory::new(builder.clone(), Arc::new(DhtConstructor));
        let lc = Lifecycle::new();
        factory.build(&lc, params(OptionGroups::new())).await.unwrap();

        let hosts = builder.hosts();
        let HostOption::ConnectionGater(gater) = &hosts[0].options()[1] else {
            panic!("expected the gater option second");
        };
        let peer = libp2p::PeerId::random();
        assert!(gater.intercept_peer_dial(&peer));
        factory.gate().set_block_all(true);
        assert!(!gater.intercept_peer_dial(&peer));
    }
}

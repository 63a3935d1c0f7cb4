//! In-process routing engine backed by the peerstore and the datastore.
//!
//! Peer lookups are answered from the shared peerstore, seeded by the
//! bootstrap list and fed by the host. Value and provider records live in the
//! datastore. There is no network query path.

use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use skein_storage::traits::Datastore;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::RoutingError;
use crate::host::HostView;
use crate::lifecycle::LifecycleContext;
use crate::peerstore::AddrInfo;
use crate::protocol::{providers_prefix, value_key, DEFAULT_OPTIMISTIC_PROVIDE_JOBS_POOL_SIZE};
use crate::routing::{Routing, RoutingConstructor, RoutingOptionArgs};
use crate::validator::Validator;

/// Provider record as stored in the datastore.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
struct ProviderRecord {
    peer_id: Vec<u8>,
    addrs: Vec<String>,
}

/// Builds a [`DhtRouting`] for each host.
#[derive(Debug, Clone, Copy, Default)]
pub struct DhtConstructor;

#[async_trait]
impl RoutingConstructor for DhtConstructor {
    async fn construct(&self, args: RoutingOptionArgs) -> Result<Arc<dyn Routing>, RoutingError> {
        Ok(Arc::new(DhtRouting::new(args)?))
    }
}

pub struct DhtRouting {
    host: HostView,
    ctx: LifecycleContext,
    datastore: Arc<dyn Datastore>,
    validator: Arc<dyn Validator>,
    bootstrap_peers: Vec<AddrInfo>,
    allow_loopback: bool,
    /// Present when optimistic provide is on; bounds background writes.
    provide_jobs: Option<Arc<Semaphore>>,
}

impl DhtRouting {
    pub fn new(args: RoutingOptionArgs) -> Result<Self, RoutingError> {
        let host = args.host.ok_or_else(|| RoutingError::Construction {
            reason: "routing constructed without a host".to_string(),
        })?;
        let provide_jobs = args.optimistic_provide.then(|| {
            let permits = match args.optimistic_provide_jobs_pool_size {
                0 => DEFAULT_OPTIMISTIC_PROVIDE_JOBS_POOL_SIZE,
                n => n,
            };
            Arc::new(Semaphore::new(permits))
        });
        info!(
            peer_id = %host.peer_id,
            bootstrap_peers = args.bootstrap_peers.len(),
            optimistic_provide = args.optimistic_provide,
            loopback_on_lan = args.loopback_addresses_on_lan_dht,
            "routing constructed"
        );
        Ok(Self {
            host,
            ctx: args.ctx,
            datastore: args.datastore,
            validator: args.validator,
            bootstrap_peers: args.bootstrap_peers,
            allow_loopback: args.loopback_addresses_on_lan_dht,
            provide_jobs,
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.host.peer_id
    }

    pub fn is_optimistic(&self) -> bool {
        self.provide_jobs.is_some()
    }

    fn ensure_open(&self) -> Result<(), RoutingError> {
        if self.ctx.is_stopped() {
            return Err(RoutingError::Closed);
        }
        Ok(())
    }

    fn admit_addrs(&self, addrs: &[Multiaddr]) -> Vec<Multiaddr> {
        addrs
            .iter()
            .filter(|a| self.allow_loopback || !is_loopback(a))
            .cloned()
            .collect()
    }
}

fn is_loopback(addr: &Multiaddr) -> bool {
    match addr.iter().next() {
        Some(Protocol::Ip4(ip)) => ip.is_loopback(),
        Some(Protocol::Ip6(ip)) => ip.is_loopback(),
        _ => false,
    }
}

fn write_provider(
    datastore: &dyn Datastore,
    key: &str,
    record: &ProviderRecord,
) -> Result<(), RoutingError> {
    let bytes = borsh::to_vec(record).map_err(|e| RoutingError::Codec {
        reason: e.to_string(),
    })?;
    datastore.put(key, &bytes)?;
    Ok(())
}

#[async_trait]
impl Routing for DhtRouting {
    async fn bootstrap(&self) -> Result<(), RoutingError> {
        self.ensure_open()?;
        if self.bootstrap_peers.is_empty() {
            warn!("no bootstrap peers configured");
            return Ok(());
        }
        let mut seeded = 0;
        for peer in &self.bootstrap_peers {
            if peer.peer_id == self.host.peer_id {
                continue;
            }
            let addrs = self.admit_addrs(&peer.addrs);
            if addrs.is_empty() {
                debug!(peer_id = %peer.peer_id, "bootstrap peer has no admissible addresses");
                continue;
            }
            self.host.peerstore.add_addrs(peer.peer_id, addrs);
            seeded += 1;
        }
        info!(seeded, total = self.bootstrap_peers.len(), "routing bootstrapped");
        Ok(())
    }

    async fn find_peer(&self, peer: PeerId) -> Result<AddrInfo, RoutingError> {
        self.ensure_open()?;
        self.host
            .peerstore
            .addr_info(&peer)
            .ok_or_else(|| RoutingError::NotFound {
                key: peer.to_string(),
            })
    }

    /// With optimistic provide the write happens on a background task and
    /// `Ok` means it was queued. Queued writes are best-effort: a write that
    /// has not started when the lifecycle stops is skipped.
    async fn provide(&self, key: &[u8]) -> Result<(), RoutingError> {
        self.ensure_open()?;
        let record = ProviderRecord {
            peer_id: self.host.peer_id.to_bytes(),
            addrs: self
                .host
                .peerstore
                .addrs(&self.host.peer_id)
                .iter()
                .map(ToString::to_string)
                .collect(),
        };
        let ds_key = format!("{}{}", providers_prefix(key), self.host.peer_id);

        match &self.provide_jobs {
            None => write_provider(self.datastore.as_ref(), &ds_key, &record),
            Some(jobs) => {
                let permit = Arc::clone(jobs)
                    .acquire_owned()
                    .await
                    .map_err(|_| RoutingError::Closed)?;
                let datastore = Arc::clone(&self.datastore);
                let ctx = self.ctx.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if ctx.is_stopped() {
                        debug!(key = %ds_key, "lifecycle stopped, skipping queued provide");
                        return;
                    }
                    if let Err(e) = write_provider(datastore.as_ref(), &ds_key, &record) {
                        warn!(key = %ds_key, error = %e, "background provide failed");
                    }
                });
                Ok(())
            }
        }
    }

    async fn find_providers(&self, key: &[u8], limit: usize) -> Result<Vec<AddrInfo>, RoutingError> {
        self.ensure_open()?;
        let mut found = Vec::new();
        for (ds_key, bytes) in self.datastore.query_prefix(&providers_prefix(key))? {
            if found.len() >= limit {
                break;
            }
            let record = match ProviderRecord::try_from_slice(&bytes) {
                Ok(r) => r,
                Err(e) => {
                    warn!(key = %ds_key, error = %e, "skipping undecodable provider record");
                    continue;
                }
            };
            let Ok(peer_id) = PeerId::from_bytes(&record.peer_id) else {
                warn!(key = %ds_key, "skipping provider record with bad peer id");
                continue;
            };
            let addrs: Vec<Multiaddr> = record
                .addrs
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect();
            if !addrs.is_empty() && peer_id != self.host.peer_id {
                self.host.peerstore.add_addrs(peer_id, addrs.iter().cloned());
            }
            found.push(AddrInfo::new(peer_id, addrs));
        }
        Ok(found)
    }

    async fn put_value(&self, key: &str, value: Vec<u8>) -> Result<(), RoutingError> {
        self.ensure_open()?;
        self.validator.validate(key, &value)?;
        let ds_key = value_key(key);
        if let Some(existing) = self.datastore.get(&ds_key)? {
            if existing != value {
                let best = self.validator.select(key, &[existing, value.clone()])?;
                if best == 0 {
                    debug!(%key, "keeping existing record");
                    return Ok(());
                }
            }
        }
        self.datastore.put(&ds_key, &value)?;
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Vec<u8>, RoutingError> {
        self.ensure_open()?;
        self.datastore
            .get(&value_key(key))?
            .ok_or_else(|| RoutingError::NotFound {
                key: key.to_string(),
            })
    }
}

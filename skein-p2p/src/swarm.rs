//! libp2p-backed host.
//!
//! The swarm is owned by a driver task; the [`SwarmHost`] handle talks to it
//! over a command channel.

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::core::ConnectedPoint;
use libp2p::identify;
use libp2p::identity::Keypair;
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{Multiaddr, PeerId, Swarm, SwarmBuilder};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::HostError;
use crate::gate::{ConnectionGate, ConnectionGater, GateBehaviour};
use crate::host::{Host, HostBuilder, HostView};
use crate::options::{HostOption, HostSettings};
use crate::peerstore::{AddrInfo, Peerstore};
use crate::protocol::IDENTIFY_PROTOCOL;

const COMMAND_BUFFER: usize = 64;

/// Behaviours run by every swarm host.
#[derive(NetworkBehaviour)]
pub struct HostBehaviour {
    /// Connection gating.
    pub gate: GateBehaviour,
    /// Identify protocol for peer identification.
    pub identify: identify::Behaviour,
}

fn build_behaviour(
    keypair: &Keypair,
    gater: Arc<dyn ConnectionGater>,
    user_agent: String,
) -> HostBehaviour {
    let identify = identify::Behaviour::new(
        identify::Config::new(IDENTIFY_PROTOCOL.to_string(), keypair.public())
            .with_agent_version(user_agent),
    );
    HostBehaviour {
        gate: GateBehaviour::new(gater),
        identify,
    }
}

type DialReply = oneshot::Sender<Result<(), HostError>>;

enum Command {
    Dial { peer: AddrInfo, reply: DialReply },
    Close { reply: oneshot::Sender<()> },
}

/// State shared between the handle and the driver task.
struct Shared {
    peer_id: PeerId,
    peerstore: Arc<Peerstore>,
    listen_addrs: RwLock<Vec<Multiaddr>>,
}

/// Builds [`SwarmHost`]s over TCP with noise and yamux.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwarmHostBuilder;

#[async_trait]
impl HostBuilder for SwarmHostBuilder {
    async fn build(
        &self,
        identity: Keypair,
        peerstore: Arc<Peerstore>,
        options: Vec<HostOption>,
    ) -> Result<Arc<dyn Host>, HostError> {
        let settings = HostSettings::from_options(&options);
        let peer_id = identity.public().to_peer_id();

        let gater: Arc<dyn ConnectionGater> = match &settings.gater {
            Some(g) => Arc::clone(g),
            None => Arc::new(ConnectionGate::new()),
        };
        let user_agent = settings.user_agent.clone();
        let idle_timeout = settings.idle_connection_timeout;

        let mut swarm = SwarmBuilder::with_existing_identity(identity)
            .with_tokio()
            .with_tcp(
                libp2p::tcp::Config::default(),
                libp2p::noise::Config::new,
                libp2p::yamux::Config::default,
            )
            .map_err(|e| HostError::Build {
                reason: format!("tcp transport: {}", e),
            })?
            .with_behaviour(|key| build_behaviour(key, gater, user_agent))
            .map_err(|e| HostError::Build {
                reason: format!("behaviour: {}", e),
            })?
            .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(idle_timeout))
            .build();

        for addr in &settings.listen_addrs {
            swarm
                .listen_on(addr.clone())
                .map_err(|e| HostError::Build {
                    reason: format!("listen on {}: {}", addr, e),
                })?;
        }

        // Routing is built last so a transport or listen failure leaves none behind.
        if let Some(hook) = &settings.routing {
            hook.invoke(HostView::new(peer_id, Arc::clone(&peerstore)))
                .await?;
        }

        let shared = Arc::new(Shared {
            peer_id,
            peerstore,
            listen_addrs: RwLock::new(Vec::new()),
        });
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(drive(swarm, rx, Arc::clone(&shared)));

        info!(
            %peer_id,
            listen = settings.listen_addrs.len(),
            agent = %settings.user_agent,
            "swarm host started"
        );

        Ok(Arc::new(SwarmHost {
            shared,
            commands,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Handle to a running libp2p swarm.
pub struct SwarmHost {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
    closed: AtomicBool,
}

#[async_trait]
impl Host for SwarmHost {
    fn peer_id(&self) -> PeerId {
        self.shared.peer_id
    }

    fn peerstore(&self) -> &Arc<Peerstore> {
        &self.shared.peerstore
    }

    fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.shared
            .listen_addrs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn connect(&self, peer: AddrInfo) -> Result<(), HostError> {
        if self.is_closed() {
            return Err(HostError::Closed);
        }
        let addrs = if peer.addrs.is_empty() {
            self.shared.peerstore.addrs(&peer.peer_id)
        } else {
            peer.addrs
        };
        if addrs.is_empty() {
            return Err(HostError::NoAddresses {
                peer: peer.peer_id.to_string(),
            });
        }

        let (reply, rx) = oneshot::channel();
        let cmd = Command::Dial {
            peer: AddrInfo::new(peer.peer_id, addrs),
            reply,
        };
        self.commands.send(cmd).await.map_err(|_| HostError::Closed)?;
        rx.await.map_err(|_| HostError::Closed)?
    }

    async fn close(&self) -> Result<(), HostError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Close { reply }).await.is_ok() {
            let _ = rx.await;
        }
        info!(peer_id = %self.shared.peer_id, "swarm host closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Driver loop: owns the swarm until closed or the handle is dropped.
async fn drive(
    mut swarm: Swarm<HostBehaviour>,
    mut commands: mpsc::Receiver<Command>,
    shared: Arc<Shared>,
) {
    let mut pending: HashMap<PeerId, Vec<DialReply>> = HashMap::new();
    let close_reply = loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Dial { peer, reply }) => dial(&mut swarm, &mut pending, peer, reply),
                Some(Command::Close { reply }) => break Some(reply),
                None => break None,
            },
            event = swarm.select_next_some() => handle_event(event, &shared, &mut pending),
        }
    };

    for (_, replies) in pending.drain() {
        for reply in replies {
            let _ = reply.send(Err(HostError::Closed));
        }
    }
    drop(swarm);
    debug!(peer_id = %shared.peer_id, "swarm driver stopped");
    if let Some(reply) = close_reply {
        let _ = reply.send(());
    }
}

fn dial(
    swarm: &mut Swarm<HostBehaviour>,
    pending: &mut HashMap<PeerId, Vec<DialReply>>,
    peer: AddrInfo,
    reply: DialReply,
) {
    if swarm.is_connected(&peer.peer_id) {
        let _ = reply.send(Ok(()));
        return;
    }
    let opts = DialOpts::peer_id(peer.peer_id)
        .addresses(peer.addrs)
        .build();
    match swarm.dial(opts) {
        Ok(()) => pending.entry(peer.peer_id).or_default().push(reply),
        Err(e) => {
            debug!(peer_id = %peer.peer_id, error = %e, "dial rejected");
            let _ = reply.send(Err(HostError::Dial {
                peer: peer.peer_id.to_string(),
                reason: e.to_string(),
            }));
        }
    }
}

fn handle_event(
    event: SwarmEvent<HostBehaviourEvent>,
    shared: &Shared,
    pending: &mut HashMap<PeerId, Vec<DialReply>>,
) {
    match event {
        SwarmEvent::Behaviour(HostBehaviourEvent::Identify(identify::Event::Received {
            peer_id,
            info,
            ..
        })) => {
            debug!(%peer_id, agent = %info.agent_version, "identified peer");
            shared.peerstore.add_addrs(peer_id, info.listen_addrs);
            shared
                .peerstore
                .set_identify(&peer_id, info.protocol_version, info.agent_version);
        }
        SwarmEvent::Behaviour(HostBehaviourEvent::Identify(other)) => {
            debug!(?other, "identify event");
        }
        SwarmEvent::Behaviour(HostBehaviourEvent::Gate(never)) => match never {},
        SwarmEvent::ConnectionEstablished {
            peer_id, endpoint, ..
        } => {
            debug!(%peer_id, ?endpoint, "connection established");
            if let ConnectedPoint::Dialer { address, .. } = &endpoint {
                shared.peerstore.add_addrs(peer_id, [address.clone()]);
            }
            for reply in pending.remove(&peer_id).unwrap_or_default() {
                let _ = reply.send(Ok(()));
            }
        }
        SwarmEvent::OutgoingConnectionError {
            peer_id: Some(peer_id),
            error,
            ..
        } => {
            warn!(%peer_id, %error, "outgoing connection failed");
            let reason = error.to_string();
            for reply in pending.remove(&peer_id).unwrap_or_default() {
                let _ = reply.send(Err(HostError::Dial {
                    peer: peer_id.to_string(),
                    reason: reason.clone(),
                }));
            }
        }
        SwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
            debug!(%peer_id, ?cause, "connection closed");
        }
        SwarmEvent::NewListenAddr { address, .. } => {
            info!(%address, "listening on new address");
            shared.peerstore.add_addrs(shared.peer_id, [address.clone()]);
            shared
                .listen_addrs
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(address);
        }
        SwarmEvent::ExpiredListenAddr { address, .. } => {
            debug!(%address, "listen address expired");
            shared
                .listen_addrs
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|a| a != &address);
        }
        other => {
            debug!(?other, "other swarm event");
        }
    }
}

//! Connection gating.
//!
//! A [`ConnectionGater`] is consulted at five points of a connection's life:
//! inbound accept, dial by address, dial by peer, after the security
//! handshake, and after the full upgrade. [`ConnectionGate`] is the coarse
//! "block everything" switch installed on every host the factory builds, and
//! [`GateBehaviour`] plugs any gater into a libp2p swarm.

use libp2p::core::transport::PortUse;
use libp2p::core::Endpoint;
use libp2p::swarm::{
    dummy, ConnectionDenied, ConnectionId, FromSwarm, NetworkBehaviour, THandler,
    THandlerInEvent, THandlerOutEvent, ToSwarm,
};
use libp2p::{Multiaddr, PeerId};
use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use thiserror::Error;
use tracing::debug;

/// Which side opened a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Local and remote address of a connection. `local` is empty when the
/// transport does not report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnAddrs {
    pub local: Multiaddr,
    pub remote: Multiaddr,
}

/// A fully upgraded connection as presented to [`ConnectionGater::intercept_upgraded`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnInfo {
    pub peer_id: PeerId,
    pub direction: Direction,
    pub addrs: ConnAddrs,
}

/// Reason code attached to an upgraded-connection decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum DisconnectReason {
    #[default]
    Unspecified = 0,
}

/// The stage at which a gater denied a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptStage {
    Accept,
    AddrDial,
    PeerDial,
    Secured,
    Upgraded,
}

impl fmt::Display for InterceptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InterceptStage::Accept => "accept",
            InterceptStage::AddrDial => "addr-dial",
            InterceptStage::PeerDial => "peer-dial",
            InterceptStage::Secured => "secured",
            InterceptStage::Upgraded => "upgraded",
        };
        f.write_str(s)
    }
}

/// Cause carried by [`ConnectionDenied`] when a gater says no.
#[derive(Debug, Error)]
#[error("connection blocked by gater at {stage}")]
pub struct Blocked {
    pub stage: InterceptStage,
    pub reason: DisconnectReason,
}

/// Admission policy consulted by the host at each connection stage.
///
/// Implementations are called from the swarm task and from any host handle,
/// so every hook must be cheap and must not block on I/O.
pub trait ConnectionGater: Send + Sync {
    fn intercept_accept(&self, addrs: &ConnAddrs) -> bool;
    fn intercept_addr_dial(&self, peer: Option<&PeerId>, addr: &Multiaddr) -> bool;
    fn intercept_peer_dial(&self, peer: &PeerId) -> bool;
    fn intercept_secured(&self, direction: Direction, peer: &PeerId, addrs: &ConnAddrs) -> bool;
    fn intercept_upgraded(&self, conn: &ConnInfo) -> (bool, DisconnectReason);
}

/// All-or-nothing gate: while `block_all` is set, every hook denies.
///
/// Meant for tests and debugging, not for access control. Share it as
/// `Arc<ConnectionGate>` and flip it with [`ConnectionGate::set_block_all`].
#[derive(Debug, Default)]
pub struct ConnectionGate {
    block_all: Mutex<bool>,
}

impl ConnectionGate {
    /// A gate that allows everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block or unblock all new connections. Existing connections are untouched.
    pub fn set_block_all(&self, block_all: bool) {
        *self.flag() = block_all;
    }

    /// Current value of the block flag.
    pub fn is_blocking(&self) -> bool {
        *self.flag()
    }

    fn allow(&self) -> bool {
        !*self.flag()
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        // A bool cannot be left half-written, so a poisoned lock is still usable.
        self.block_all.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConnectionGater for ConnectionGate {
    fn intercept_accept(&self, _addrs: &ConnAddrs) -> bool {
        self.allow()
    }

    fn intercept_addr_dial(&self, _peer: Option<&PeerId>, _addr: &Multiaddr) -> bool {
        self.allow()
    }

    fn intercept_peer_dial(&self, _peer: &PeerId) -> bool {
        self.allow()
    }

    fn intercept_secured(&self, _direction: Direction, _peer: &PeerId, _addrs: &ConnAddrs) -> bool {
        self.allow()
    }

    fn intercept_upgraded(&self, _conn: &ConnInfo) -> (bool, DisconnectReason) {
        (self.allow(), DisconnectReason::Unspecified)
    }
}

/// Swarm behaviour that routes libp2p's connection callbacks through a gater.
///
/// libp2p reports an established connection once security and muxing are both
/// done, so both the secured and the upgraded hooks run at that point, in
/// that order.
pub struct GateBehaviour {
    gater: Arc<dyn ConnectionGater>,
}

impl GateBehaviour {
    pub fn new(gater: Arc<dyn ConnectionGater>) -> Self {
        Self { gater }
    }

    fn deny(stage: InterceptStage, reason: DisconnectReason) -> ConnectionDenied {
        debug!(%stage, ?reason, "connection denied by gater");
        ConnectionDenied::new(Blocked { stage, reason })
    }

    fn admit_established(
        &self,
        peer: PeerId,
        direction: Direction,
        addrs: ConnAddrs,
    ) -> Result<(), ConnectionDenied> {
        if !self.gater.intercept_secured(direction, &peer, &addrs) {
            return Err(Self::deny(
                InterceptStage::Secured,
                DisconnectReason::Unspecified,
            ));
        }
        let conn = ConnInfo {
            peer_id: peer,
            direction,
            addrs,
        };
        let (allow, reason) = self.gater.intercept_upgraded(&conn);
        if !allow {
            return Err(Self::deny(InterceptStage::Upgraded, reason));
        }
        Ok(())
    }
}

impl NetworkBehaviour for GateBehaviour {
    type ConnectionHandler = dummy::ConnectionHandler;
    type ToSwarm = Infallible;

    fn handle_pending_inbound_connection(
        &mut self,
        _connection_id: ConnectionId,
        local_addr: &Multiaddr,
        remote_addr: &Multiaddr,
    ) -> Result<(), ConnectionDenied> {
        let addrs = ConnAddrs {
            local: local_addr.clone(),
            remote: remote_addr.clone(),
        };
        if !self.gater.intercept_accept(&addrs) {
            return Err(Self::deny(
                InterceptStage::Accept,
                DisconnectReason::Unspecified,
            ));
        }
        Ok(())
    }

    fn handle_established_inbound_connection(
        &mut self,
        _connection_id: ConnectionId,
        peer: PeerId,
        local_addr: &Multiaddr,
        remote_addr: &Multiaddr,
    ) -> Result<THandler<Self>, ConnectionDenied> {
        let addrs = ConnAddrs {
            local: local_addr.clone(),
            remote: remote_addr.clone(),
        };
        self.admit_established(peer, Direction::Inbound, addrs)?;
        Ok(dummy::ConnectionHandler)
    }

    fn handle_pending_outbound_connection(
        &mut self,
        _connection_id: ConnectionId,
        maybe_peer: Option<PeerId>,
        addresses: &[Multiaddr],
        _effective_role: Endpoint,
    ) -> Result<Vec<Multiaddr>, ConnectionDenied> {
        if let Some(peer) = &maybe_peer {
            if !self.gater.intercept_peer_dial(peer) {
                return Err(Self::deny(
                    InterceptStage::PeerDial,
                    DisconnectReason::Unspecified,
                ));
            }
        }
        for addr in addresses {
            if !self.gater.intercept_addr_dial(maybe_peer.as_ref(), addr) {
                return Err(Self::deny(
                    InterceptStage::AddrDial,
                    DisconnectReason::Unspecified,
                ));
            }
        }
        Ok(Vec::new())
    }

    fn handle_established_outbound_connection(
        &mut self,
        _connection_id: ConnectionId,
        peer: PeerId,
        addr: &Multiaddr,
        _role_override: Endpoint,
        _port_use: PortUse,
    ) -> Result<THandler<Self>, ConnectionDenied> {
        let addrs = ConnAddrs {
            local: Multiaddr::empty(),
            remote: addr.clone(),
        };
        self.admit_established(peer, Direction::Outbound, addrs)?;
        Ok(dummy::ConnectionHandler)
    }

    fn on_swarm_event(&mut self, _event: FromSwarm) {}

    fn on_connection_handler_event(
        &mut self,
        _peer_id: PeerId,
        _connection_id: ConnectionId,
        event: THandlerOutEvent<Self>,
    ) {
        match event {}
    }

    fn poll(&mut self, _cx: &mut Context<'_>) -> Poll<ToSwarm<Self::ToSwarm, THandlerInEvent<Self>>> {
        Poll::Pending
    }
}

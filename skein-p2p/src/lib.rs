//! P2P host construction for skein.
//!
//! Builds a libp2p host with a connection gate installed, attaches a routing
//! implementation to it (constructed during the host build when the builder
//! supports it, directly afterwards when it does not), and ties the host's
//! shutdown to the application lifecycle.

pub mod config;
pub mod dht;
pub mod error;
pub mod factory;
pub mod gate;
pub mod host;
pub mod lifecycle;
pub mod mock;
pub mod options;
pub mod peerstore;
pub mod protocol;
pub mod routing;
pub mod swarm;
pub mod validator;

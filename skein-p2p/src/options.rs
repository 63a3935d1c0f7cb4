//! Host options and their ordered composition.
//!
//! Options arrive in groups from independent contributors. Groups are kept
//! in registration order and items within a group keep their order, so a
//! flattened list is always "group by group, item by item". Builders apply
//! the flattened list front to back; a later option overrides an earlier one
//! that sets the same thing.

use libp2p::Multiaddr;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::gate::ConnectionGater;
use crate::protocol::{DEFAULT_IDLE_CONNECTION_TIMEOUT, DEFAULT_USER_AGENT};
use crate::routing::RoutingHook;

/// One unit of host configuration.
#[derive(Clone)]
pub enum HostOption {
    /// Do not listen on any address.
    NoListenAddrs,
    /// Listen on these addresses (replaces any earlier listen setting).
    ListenAddrs(Vec<Multiaddr>),
    /// Install a connection gater.
    ConnectionGater(Arc<dyn ConnectionGater>),
    /// Agent version advertised over identify.
    UserAgent(String),
    /// Close connections idle for longer than this.
    IdleConnectionTimeout(Duration),
    /// Routing constructor hook; builders that support routing invoke it
    /// with the partially-built host.
    Routing(RoutingHook),
}

impl fmt::Debug for HostOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostOption::NoListenAddrs => f.write_str("NoListenAddrs"),
            HostOption::ListenAddrs(addrs) => f.debug_tuple("ListenAddrs").field(addrs).finish(),
            HostOption::ConnectionGater(_) => f.write_str("ConnectionGater(..)"),
            HostOption::UserAgent(agent) => f.debug_tuple("UserAgent").field(agent).finish(),
            HostOption::IdleConnectionTimeout(d) => {
                f.debug_tuple("IdleConnectionTimeout").field(d).finish()
            }
            HostOption::Routing(_) => f.write_str("Routing(..)"),
        }
    }
}

/// Options contributed by one named party.
#[derive(Debug, Clone)]
pub struct OptionGroup {
    pub contributor: String,
    pub options: Vec<HostOption>,
}

/// Ordered collection of option groups.
#[derive(Debug, Clone, Default)]
pub struct OptionGroups {
    groups: Vec<OptionGroup>,
}

impl OptionGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a group. Groups are flattened in the order they are registered.
    pub fn register(
        &mut self,
        contributor: impl Into<String>,
        options: Vec<HostOption>,
    ) -> &mut Self {
        self.groups.push(OptionGroup {
            contributor: contributor.into(),
            options,
        });
        self
    }

    /// Contributor names in registration order.
    pub fn contributors(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.contributor.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.options.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All options, group by group, item by item.
    pub fn flatten(self) -> Vec<HostOption> {
        self.groups.into_iter().flat_map(|g| g.options).collect()
    }
}

/// The result of applying an option list in order.
#[derive(Clone)]
pub struct HostSettings {
    pub listen_addrs: Vec<Multiaddr>,
    pub gater: Option<Arc<dyn ConnectionGater>>,
    pub user_agent: String,
    pub idle_connection_timeout: Duration,
    pub routing: Option<RoutingHook>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            listen_addrs: Vec::new(),
            gater: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            idle_connection_timeout: DEFAULT_IDLE_CONNECTION_TIMEOUT,
            routing: None,
        }
    }
}

impl HostSettings {
    /// Fold options front to back; the last option touching a setting wins.
    pub fn from_options(options: &[HostOption]) -> Self {
        let mut settings = Self::default();
        for opt in options {
            match opt {
                HostOption::NoListenAddrs => settings.listen_addrs.clear(),
                HostOption::ListenAddrs(addrs) => settings.listen_addrs = addrs.clone(),
                HostOption::ConnectionGater(g) => settings.gater = Some(Arc::clone(g)),
                HostOption::UserAgent(agent) => settings.user_agent = agent.clone(),
                HostOption::IdleConnectionTimeout(d) => settings.idle_connection_timeout = *d,
                HostOption::Routing(hook) => settings.routing = Some(hook.clone()),
            }
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::ConnectionGate;

    fn listen(s: &str) -> HostOption {
        HostOption::ListenAddrs(vec![s.parse().unwrap()])
    }

    #[test]
    fn test_flatten_preserves_group_then_item_order() {
        let mut groups = OptionGroups::new();
        groups
            .register("first", vec![HostOption::UserAgent("a".into()), HostOption::UserAgent("b".into())])
            .register("second", vec![HostOption::UserAgent("c".into())]);
        assert_eq!(groups.contributors(), vec!["first", "second"]);
        assert_eq!(groups.len(), 3);

        let agents: Vec<String> = groups
            .flatten()
            .into_iter()
            .map(|o| match o {
                HostOption::UserAgent(a) => a,
                other => panic!("unexpected option {other:?}"),
            })
            .collect();
        assert_eq!(agents, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_groups() {
        let mut groups = OptionGroups::new();
        groups.register("nobody", vec![]);
        assert!(groups.is_empty());
        assert!(groups.flatten().is_empty());
    }

    #[test]
    fn test_settings_defaults() {
        let settings = HostSettings::from_options(&[]);
        assert!(settings.listen_addrs.is_empty());
        assert!(settings.gater.is_none());
        assert!(settings.routing.is_none());
        assert_eq!(settings.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(settings.idle_connection_timeout, DEFAULT_IDLE_CONNECTION_TIMEOUT);
    }

    #[test]
    fn test_later_listen_overrides_no_listen() {
        let settings = HostSettings::from_options(&[
            HostOption::NoListenAddrs,
            listen("/ip4/127.0.0.1/tcp/0"),
        ]);
        assert_eq!(settings.listen_addrs.len(), 1);
    }

    #[test]
    fn test_later_no_listen_overrides_listen() {
        let settings = HostSettings::from_options(&[
            listen("/ip4/127.0.0.1/tcp/0"),
            HostOption::NoListenAddrs,
        ]);
        assert!(settings.listen_addrs.is_empty());
    }

    #[test]
    fn test_last_gater_wins() {
        let first = Arc::new(ConnectionGate::new());
        let second = Arc::new(ConnectionGate::new());
        second.set_block_all(true);
        let settings = HostSettings::from_options(&[
            HostOption::ConnectionGater(first),
            HostOption::ConnectionGater(second),
        ]);
        let gater = settings.gater.unwrap();
        assert!(!gater.intercept_peer_dial(&libp2p::PeerId::random()));
    }

    #[test]
    fn test_debug_hides_trait_objects() {
        let opt = HostOption::ConnectionGater(Arc::new(ConnectionGate::new()));
        assert_eq!(format!("{:?}", opt), "ConnectionGater(..)");
    }
}

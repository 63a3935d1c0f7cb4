use skein_storage::error::StorageError;
use thiserror::Error;

/// Errors raised while reading or resolving host configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The repository could not produce its configuration.
    #[error("config unavailable: {reason}")]
    Unavailable { reason: String },

    /// A bootstrap entry is not a usable `/…/p2p/<peer-id>` multiaddr.
    #[error("invalid bootstrap peer '{addr}': {reason}")]
    InvalidBootstrapPeer { addr: String, reason: String },

    #[error("invalid listen address '{addr}': {reason}")]
    InvalidListenAddr { addr: String, reason: String },
}

/// Errors raised by record validators.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("malformed record key '{key}'")]
    InvalidKey { key: String },

    #[error("no validator registered for namespace '{namespace}'")]
    UnknownNamespace { namespace: String },

    #[error("invalid record for '{key}': {reason}")]
    InvalidRecord { key: String, reason: String },

    #[error("no records to select from")]
    NoRecords,
}

/// Errors raised by routing construction and routing queries.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// The routing constructor refused to build an instance.
    #[error("routing construction failed: {reason}")]
    Construction { reason: String },

    /// Nothing is known for the requested key or peer.
    #[error("not found: {key}")]
    NotFound { key: String },

    /// The enclosing lifecycle has stopped.
    #[error("routing closed")]
    Closed,

    #[error("record rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error("datastore error: {0}")]
    Storage(#[from] StorageError),

    #[error("record codec error: {reason}")]
    Codec { reason: String },
}

/// Errors surfaced by host construction and host operations.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The host builder failed; no host exists.
    #[error("host build failed: {reason}")]
    Build { reason: String },

    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("dial {peer} failed: {reason}")]
    Dial { peer: String, reason: String },

    #[error("no known addresses for peer {peer}")]
    NoAddresses { peer: String },

    #[error("host is closed")]
    Closed,

    /// The lifecycle stopped before the host's shutdown could be registered.
    #[error("lifecycle already stopped")]
    LifecycleStopped,
}

/// Errors from running lifecycle stop hooks.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("stop hook '{hook}' failed: {source}")]
    Hook {
        hook: String,
        #[source]
        source: HostError,
    },

    #[error("lifecycle stopped, hook '{hook}' not registered")]
    Stopped { hook: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_wraps_into_host_error() {
        let err: HostError = ConfigError::InvalidBootstrapPeer {
            addr: "/ip4/1.2.3.4".to_string(),
            reason: "missing /p2p".to_string(),
        }
        .into();
        assert!(matches!(err, HostError::Config(_)));
        assert!(err.to_string().contains("/ip4/1.2.3.4"));
    }

    #[test]
    fn test_routing_error_keeps_source() {
        let err: HostError = RoutingError::Construction {
            reason: "datastore offline".to_string(),
        }
        .into();
        match err {
            HostError::Routing(RoutingError::Construction { reason }) => {
                assert_eq!(reason, "datastore offline");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_storage_error_into_routing_error() {
        let err: RoutingError = StorageError::ReadError {
            reason: "poisoned".to_string(),
        }
        .into();
        assert!(matches!(err, RoutingError::Storage(_)));
    }

    #[test]
    fn test_lifecycle_error_display() {
        let err = LifecycleError::Hook {
            hook: "p2p-host".to_string(),
            source: HostError::Closed,
        };
        assert!(err.to_string().contains("p2p-host"));
    }
}

use thiserror::Error;

/// Errors that can occur in the node.
#[derive(Debug, Error)]
#[allow(clippy::enum_variant_names)]
pub enum NodeError {
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    #[error("p2p config error: {0}")]
    P2pConfigError(#[from] skein_p2p::error::ConfigError),

    #[error("storage error: {0}")]
    StorageError(#[from] skein_storage::error::StorageError),

    #[error("host error: {0}")]
    HostError(#[from] skein_p2p::error::HostError),

    #[error("routing error: {0}")]
    RoutingError(#[from] skein_p2p::error::RoutingError),

    #[error("shutdown error: {0}")]
    LifecycleError(#[from] skein_p2p::error::LifecycleError),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

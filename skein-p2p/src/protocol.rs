use std::time::Duration;

/// Identify protocol version advertised by skein hosts.
pub const IDENTIFY_PROTOCOL: &str = "/skein/id/1.0.0";

/// Agent version advertised when no `UserAgent` option is given.
pub const DEFAULT_USER_AGENT: &str = concat!("skein/", env!("CARGO_PKG_VERSION"));

/// Idle connection timeout used when no option overrides it.
pub const DEFAULT_IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Whether the LAN-scoped routing table accepts loopback addresses when the
/// config leaves it unset.
pub const DEFAULT_LOOPBACK_ADDRESSES_ON_LAN_DHT: bool = false;

/// Background provide workers used when optimistic provide is on and the pool
/// size is left at zero.
pub const DEFAULT_OPTIMISTIC_PROVIDE_JOBS_POOL_SIZE: usize = 60;

/// Datastore namespace for value records.
pub const VALUES_NAMESPACE: &str = "/values";

/// Datastore namespace for provider records.
pub const PROVIDERS_NAMESPACE: &str = "/providers";

/// Record namespace for public keys (`/pk/<peer-id>`).
pub const PK_NAMESPACE: &str = "pk";

/// Datastore key for a value record.
pub fn value_key(record_key: &str) -> String {
    format!("{}/{}", VALUES_NAMESPACE, record_key.trim_start_matches('/'))
}

/// Datastore prefix under which all providers of `content` live.
pub fn providers_prefix(content: &[u8]) -> String {
    format!("{}/{}/", PROVIDERS_NAMESPACE, blake3::hash(content).to_hex())
}

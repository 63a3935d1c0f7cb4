use std::sync::Arc;

use crate::error::StorageError;

/// Result type for prefix queries: key/value pairs in key order.
pub type Entries = Vec<(String, Vec<u8>)>;

/// Key-value datastore addressed by slash-separated keys such as
/// `/providers/<hash>/<peer>`.
pub trait Datastore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;
    fn delete(&self, key: &str) -> Result<(), StorageError>;
    fn has(&self, key: &str) -> Result<bool, StorageError>;
    fn query_prefix(&self, prefix: &str) -> Result<Entries, StorageError>;
}

/// Check that a key is absolute and has no empty segments.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if !key.starts_with('/') {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason: "must start with '/'".to_string(),
        });
    }
    if key.len() > 1 && key[1..].split('/').any(str::is_empty) {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason: "empty path segment".to_string(),
        });
    }
    Ok(())
}

/// Lets a single datastore be shared between the host, routing and the node.
impl<D: Datastore + ?Sized> Datastore for Arc<D> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        (**self).delete(key)
    }

    fn has(&self, key: &str) -> Result<bool, StorageError> {
        (**self).has(key)
    }

    fn query_prefix(&self, prefix: &str) -> Result<Entries, StorageError> {
        (**self).query_prefix(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key_accepts_absolute() {
        assert!(validate_key("/").is_ok());
        assert!(validate_key("/values/pk").is_ok());
        assert!(validate_key("/providers/abc/12D3").is_ok());
    }

    #[test]
    fn test_validate_key_rejects_relative() {
        assert!(matches!(
            validate_key("values/pk"),
            Err(StorageError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_validate_key_rejects_empty_segment() {
        assert!(validate_key("/values//pk").is_err());
        assert!(validate_key("/values/").is_err());
    }
}

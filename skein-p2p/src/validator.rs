use libp2p::identity::PublicKey;
use libp2p::PeerId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ValidationError;
use crate::protocol::PK_NAMESPACE;

/// Validates routing records and picks the best among competing ones.
pub trait Validator: Send + Sync {
    /// Check that `value` is acceptable for `key`.
    fn validate(&self, key: &str, value: &[u8]) -> Result<(), ValidationError>;

    /// Index of the best record in `values`.
    fn select(&self, key: &str, values: &[Vec<u8>]) -> Result<usize, ValidationError>;
}

/// Split `/ns/rest` into `("ns", "rest")`.
pub fn split_key(key: &str) -> Result<(&str, &str), ValidationError> {
    let invalid = || ValidationError::InvalidKey {
        key: key.to_string(),
    };
    let trimmed = key.strip_prefix('/').ok_or_else(invalid)?;
    let (namespace, rest) = trimmed.split_once('/').ok_or_else(invalid)?;
    if namespace.is_empty() || rest.is_empty() {
        return Err(invalid());
    }
    Ok((namespace, rest))
}

/// Dispatches to a validator chosen by the key's first path segment.
#[derive(Default, Clone)]
pub struct NamespacedValidator {
    validators: HashMap<String, Arc<dyn Validator>>,
}

impl NamespacedValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The validator every host starts with: public keys under `/pk/`.
    pub fn with_defaults() -> Self {
        let mut v = Self::new();
        v.insert(PK_NAMESPACE, Arc::new(PublicKeyValidator));
        v
    }

    pub fn insert(&mut self, namespace: impl Into<String>, validator: Arc<dyn Validator>) {
        self.validators.insert(namespace.into(), validator);
    }

    fn lookup(&self, key: &str) -> Result<&Arc<dyn Validator>, ValidationError> {
        let (namespace, _) = split_key(key)?;
        self.validators
            .get(namespace)
            .ok_or_else(|| ValidationError::UnknownNamespace {
                namespace: namespace.to_string(),
            })
    }
}

impl Validator for NamespacedValidator {
    fn validate(&self, key: &str, value: &[u8]) -> Result<(), ValidationError> {
        self.lookup(key)?.validate(key, value)
    }

    fn select(&self, key: &str, values: &[Vec<u8>]) -> Result<usize, ValidationError> {
        self.lookup(key)?.select(key, values)
    }
}

/// `/pk/<peer-id>` records hold the protobuf-encoded public key of that peer.
pub struct PublicKeyValidator;

impl Validator for PublicKeyValidator {
    fn validate(&self, key: &str, value: &[u8]) -> Result<(), ValidationError> {
        let (_, id) = split_key(key)?;
        let peer_id: PeerId = id.parse().map_err(|_| ValidationError::InvalidKey {
            key: key.to_string(),
        })?;
        let public_key =
            PublicKey::try_decode_protobuf(value).map_err(|e| ValidationError::InvalidRecord {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        if PeerId::from_public_key(&public_key) != peer_id {
            return Err(ValidationError::InvalidRecord {
                key: key.to_string(),
                reason: "public key does not match peer id".to_string(),
            });
        }
        Ok(())
    }

    fn select(&self, _key: &str, values: &[Vec<u8>]) -> Result<usize, ValidationError> {
        // Valid records for one peer id are identical; take the first.
        if values.is_empty() {
            return Err(ValidationError::NoRecords);
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libp2p::identity::Keypair;

    fn pk_record() -> (String, Vec<u8>) {
        let kp = Keypair::generate_ed25519();
        let key = format!("/pk/{}", kp.public().to_peer_id());
        (key, kp.public().encode_protobuf())
    }

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("/pk/abc").unwrap(), ("pk", "abc"));
        assert_eq!(split_key("/ns/a/b").unwrap(), ("ns", "a/b"));
        assert!(split_key("pk/abc").is_err());
        assert!(split_key("/pk").is_err());
        assert!(split_key("/pk/").is_err());
    }

    #[test]
    fn test_public_key_record_valid() {
        let (key, value) = pk_record();
        assert!(PublicKeyValidator.validate(&key, &value).is_ok());
    }

    #[test]
    fn test_public_key_record_mismatch() {
        let (key, _) = pk_record();
        let (_, other_value) = pk_record();
        assert!(matches!(
            PublicKeyValidator.validate(&key, &other_value),
            Err(ValidationError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn test_public_key_record_garbage() {
        let (key, _) = pk_record();
        assert!(PublicKeyValidator.validate(&key, b"garbage").is_err());
    }

    #[test]
    fn test_public_key_bad_peer_id() {
        let (_, value) = pk_record();
        assert!(matches!(
            PublicKeyValidator.validate("/pk/not-a-peer", &value),
            Err(ValidationError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_namespaced_dispatch() {
        let validator = NamespacedValidator::with_defaults();
        let (key, value) = pk_record();
        assert!(validator.validate(&key, &value).is_ok());
        assert_eq!(validator.select(&key, &[value.clone(), value]).unwrap(), 0);
    }

    #[test]
    fn test_namespaced_unknown_namespace() {
        let validator = NamespacedValidator::with_defaults();
        assert!(matches!(
            validator.validate("/ipns/whatever", b"x"),
            Err(ValidationError::UnknownNamespace { .. })
        ));
    }

    #[test]
    fn test_select_empty() {
        assert!(matches!(
            PublicKeyValidator.select("/pk/x", &[]),
            Err(ValidationError::NoRecords)
        ));
    }
}

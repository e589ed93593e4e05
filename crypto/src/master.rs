use crate::aead::KEY_LEN;
use crate::error::{CryptoError, CryptoResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::collections::HashMap;
use zeroize::Zeroizing;

/// Source of master keys, the top of the envelope hierarchy.
///
/// Masters are never persisted by the engine; a KMS (or static config
/// in single-node deployments) provides them. Returned buffers wipe on
/// drop; callers must not copy material into non-zeroizing storage.
pub trait MasterKeyProvider: Send + Sync {
    /// The designated active master, used to wrap newly minted KEKs.
    fn current(&self) -> CryptoResult<(String, Zeroizing<[u8; KEY_LEN]>)>;

    /// Look up a master by id, for unwrapping existing KEKs.
    fn get(&self, id: &str) -> CryptoResult<Zeroizing<[u8; KEY_LEN]>>;
}

/// Master keys loaded from configuration. Multiple keys may be held so
/// KEKs wrapped under retired masters stay decryptable; exactly one id
/// is current.
pub struct StaticMasterKeys {
    keys: HashMap<String, Zeroizing<[u8; KEY_LEN]>>,
    current_id: String,
}

impl StaticMasterKeys {
    pub fn new(
        current_id: impl Into<String>,
        keys: HashMap<String, Zeroizing<[u8; KEY_LEN]>>,
    ) -> CryptoResult<Self> {
        let current_id = current_id.into();
        if !keys.contains_key(&current_id) {
            return Err(CryptoError::MasterKeyNotFound(current_id));
        }
        Ok(Self { keys, current_id })
    }

    /// Single-key provider, the common deployment shape.
    pub fn single(id: impl Into<String>, key: Zeroizing<[u8; KEY_LEN]>) -> Self {
        let id = id.into();
        let mut keys = HashMap::new();
        keys.insert(id.clone(), key);
        Self {
            keys,
            current_id: id,
        }
    }

    /// Build from `(id, base64_key)` pairs, e.g. parsed out of config.
    pub fn from_base64(
        current_id: impl Into<String>,
        pairs: &[(String, String)],
    ) -> CryptoResult<Self> {
        let mut keys = HashMap::new();
        for (id, encoded) in pairs {
            let raw = BASE64
                .decode(encoded)
                .map_err(|_| CryptoError::InvalidKeyEncoding)?;
            if raw.len() != KEY_LEN {
                return Err(CryptoError::InvalidKeyLength {
                    expected: KEY_LEN,
                    got: raw.len(),
                });
            }
            let mut key = Zeroizing::new([0u8; KEY_LEN]);
            key.copy_from_slice(&raw);
            keys.insert(id.clone(), key);
        }
        Self::new(current_id, keys)
    }
}

impl MasterKeyProvider for StaticMasterKeys {
    fn current(&self) -> CryptoResult<(String, Zeroizing<[u8; KEY_LEN]>)> {
        let key = self.get(&self.current_id)?;
        Ok((self.current_id.clone(), key))
    }

    fn get(&self, id: &str) -> CryptoResult<Zeroizing<[u8; KEY_LEN]>> {
        self.keys
            .get(id)
            .cloned()
            .ok_or_else(|| CryptoError::MasterKeyNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aead::generate_key;

    #[test]
    fn test_single_provider() {
        let key = generate_key();
        let expected = *key;
        let provider = StaticMasterKeys::single("master-1", key);

        let (id, current) = provider.current().unwrap();
        assert_eq!(id, "master-1");
        assert_eq!(*current, expected);
        assert_eq!(*provider.get("master-1").unwrap(), expected);
    }

    #[test]
    fn test_unknown_id() {
        let provider = StaticMasterKeys::single("master-1", generate_key());
        assert!(matches!(
            provider.get("master-2"),
            Err(CryptoError::MasterKeyNotFound(_))
        ));
    }

    #[test]
    fn test_current_must_be_loaded() {
        let result = StaticMasterKeys::new("missing", HashMap::new());
        assert!(matches!(result, Err(CryptoError::MasterKeyNotFound(_))));
    }

    #[test]
    fn test_from_base64() {
        let raw = [7u8; 32];
        let pairs = vec![("m1".to_string(), BASE64.encode(raw))];
        let provider = StaticMasterKeys::from_base64("m1", &pairs).unwrap();
        assert_eq!(*provider.get("m1").unwrap(), raw);
    }

    #[test]
    fn test_from_base64_rejects_short_key() {
        let pairs = vec![("m1".to_string(), BASE64.encode([7u8; 16]))];
        assert!(matches!(
            StaticMasterKeys::from_base64("m1", &pairs),
            Err(CryptoError::InvalidKeyLength { .. })
        ));
    }
}

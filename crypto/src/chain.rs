use crate::aead::KEY_LEN;
use crate::envelope::{unwrap_kek, Kek};
use crate::error::{CryptoError, CryptoResult};
use crate::master::MasterKeyProvider;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;
use zeroize::Zeroizing;

/// In-memory registry of unwrapped KEKs with a designated active one.
///
/// The chain exclusively owns live KEK material for its lifetime. It is
/// immutable after construction; rotation builds a new chain and swaps
/// it in whole through [`KekChainHandle`].
pub struct KekChain {
    keys: HashMap<Uuid, Zeroizing<[u8; KEY_LEN]>>,
    active_id: Option<Uuid>,
}

impl KekChain {
    pub fn empty() -> Self {
        Self {
            keys: HashMap::new(),
            active_id: None,
        }
    }

    /// Unwrap every KEK row against the master-key provider. The row
    /// with the highest `version` becomes active. Any row that fails to
    /// unwrap poisons the whole build; at startup that is fatal.
    pub fn build(provider: &dyn MasterKeyProvider, keks: &[Kek]) -> CryptoResult<Self> {
        let mut keys = HashMap::with_capacity(keks.len());
        let mut active: Option<(i64, Uuid)> = None;

        for kek in keks {
            let master = provider.get(&kek.master_key_id)?;
            let material = unwrap_kek(kek, &master)?;
            keys.insert(kek.id, material);

            if active.map_or(true, |(version, _)| kek.version > version) {
                active = Some((kek.version, kek.id));
            }
        }

        Ok(Self {
            keys,
            active_id: active.map(|(_, id)| id),
        })
    }

    /// O(1) lookup of plaintext KEK material. A miss is how a DEK
    /// referencing a retired or unknown KEK surfaces.
    pub fn get(&self, id: Uuid) -> CryptoResult<&[u8; KEY_LEN]> {
        self.keys
            .get(&id)
            .map(|k| &**k)
            .ok_or(CryptoError::KekNotFound(id))
    }

    pub fn active(&self) -> CryptoResult<(Uuid, &[u8; KEY_LEN])> {
        let id = self.active_id.ok_or(CryptoError::NoActiveKek)?;
        Ok((id, self.get(id)?))
    }

    pub fn active_id(&self) -> Option<Uuid> {
        self.active_id
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.keys.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Process-wide handle to the current chain. Reads clone an `Arc`;
/// rotations publish a whole new chain. The lock is held only for the
/// pointer swap, never across I/O.
pub struct KekChainHandle {
    current: RwLock<Arc<KekChain>>,
}

impl KekChainHandle {
    pub fn new(chain: KekChain) -> Self {
        Self {
            current: RwLock::new(Arc::new(chain)),
        }
    }

    pub fn load(&self) -> Arc<KekChain> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn store(&self, chain: KekChain) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(chain);
    }
}

impl Default for KekChainHandle {
    fn default() -> Self {
        Self::new(KekChain::empty())
    }
}

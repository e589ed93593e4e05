use crate::aead::{generate_key, Aead, Algorithm, KEY_LEN};
use crate::error::{CryptoError, CryptoResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Key Encryption Key row. The `encrypted_key` is the 32-byte KEK
/// material wrapped under the master key named by `master_key_id`;
/// plaintext KEK material exists only inside the in-memory chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kek {
    pub id: Uuid,
    pub master_key_id: String,
    pub algorithm: Algorithm,
    pub encrypted_key: Vec<u8>,
    pub nonce: Vec<u8>,
    /// Strictly increasing per deployment; the highest version is active.
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

/// Data Encryption Key row. Wrapped under exactly one KEK; one DEK per
/// secret version. Plaintext DEK material never persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dek {
    pub id: Uuid,
    pub kek_id: Uuid,
    pub algorithm: Algorithm,
    pub encrypted_key: Vec<u8>,
    pub nonce: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

fn wrap_key(
    material: &[u8; KEY_LEN],
    wrapping_key: &[u8; KEY_LEN],
    algorithm: Algorithm,
) -> CryptoResult<(Vec<u8>, Vec<u8>)> {
    let aead = Aead::new(algorithm, wrapping_key)?;
    let (encrypted, nonce) = aead.encrypt(material.as_ref(), None)?;
    Ok((encrypted, nonce.to_vec()))
}

fn unwrap_key(
    encrypted: &[u8],
    nonce: &[u8],
    wrapping_key: &[u8; KEY_LEN],
    algorithm: Algorithm,
) -> CryptoResult<Zeroizing<[u8; KEY_LEN]>> {
    let aead = Aead::new(algorithm, wrapping_key)?;
    let plaintext = aead.decrypt(encrypted, nonce, None)?;
    if plaintext.len() != KEY_LEN {
        return Err(CryptoError::DecryptionFailed);
    }
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&plaintext);
    Ok(key)
}

/// Mint a new KEK wrapped under the given master key. The caller
/// persists the row and publishes the plaintext into the chain; the
/// version is assigned by the caller as `max(existing) + 1` inside its
/// transaction.
pub fn create_kek(
    master_key_id: &str,
    master_material: &[u8; KEY_LEN],
    algorithm: Algorithm,
    version: i64,
) -> CryptoResult<(Kek, Zeroizing<[u8; KEY_LEN]>)> {
    let material = generate_key();
    let (encrypted_key, nonce) = wrap_key(&material, master_material, algorithm)?;

    let kek = Kek {
        id: Uuid::now_v7(),
        master_key_id: master_key_id.to_string(),
        algorithm,
        encrypted_key,
        nonce,
        version,
        created_at: Utc::now(),
    };
    Ok((kek, material))
}

/// Recover the plaintext KEK material from its row.
pub fn unwrap_kek(
    kek: &Kek,
    master_material: &[u8; KEY_LEN],
) -> CryptoResult<Zeroizing<[u8; KEY_LEN]>> {
    unwrap_key(&kek.encrypted_key, &kek.nonce, master_material, kek.algorithm)
}

/// Mint a new DEK wrapped under the given KEK. Returns the row and the
/// plaintext material; the caller uses the material once and lets the
/// buffer wipe.
pub fn create_dek(
    kek_id: Uuid,
    kek_material: &[u8; KEY_LEN],
    algorithm: Algorithm,
) -> CryptoResult<(Dek, Zeroizing<[u8; KEY_LEN]>)> {
    let material = generate_key();
    let (encrypted_key, nonce) = wrap_key(&material, kek_material, algorithm)?;

    let dek = Dek {
        id: Uuid::now_v7(),
        kek_id,
        algorithm,
        encrypted_key,
        nonce,
        created_at: Utc::now(),
    };
    Ok((dek, material))
}

/// Recover the plaintext DEK material from its row. The returned buffer
/// wipes on drop; the caller must not let it outlive the operation.
pub fn decrypt_dek(
    dek: &Dek,
    kek_material: &[u8; KEY_LEN],
) -> CryptoResult<Zeroizing<[u8; KEY_LEN]>> {
    unwrap_key(&dek.encrypted_key, &dek.nonce, kek_material, dek.algorithm)
}

/// Re-wrap a DEK under a new KEK without touching any ciphertext bound
/// to it. Returns the updated row fields in place.
pub fn rewrap_dek(
    dek: &mut Dek,
    old_kek_material: &[u8; KEY_LEN],
    new_kek_id: Uuid,
    new_kek_material: &[u8; KEY_LEN],
) -> CryptoResult<()> {
    let material = decrypt_dek(dek, old_kek_material)?;
    let (encrypted_key, nonce) = wrap_key(&material, new_kek_material, dek.algorithm)?;

    dek.kek_id = new_kek_id;
    dek.encrypted_key = encrypted_key;
    dek.nonce = nonce;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kek_wrap_unwrap() {
        let master = generate_key();
        let (kek, material) =
            create_kek("master-1", &master, Algorithm::Aes256Gcm, 1).unwrap();

        assert_eq!(kek.master_key_id, "master-1");
        assert_eq!(kek.version, 1);
        assert_ne!(kek.encrypted_key, material.as_ref());

        let unwrapped = unwrap_kek(&kek, &master).unwrap();
        assert_eq!(*unwrapped, *material);
    }

    #[test]
    fn test_kek_unwrap_wrong_master_fails() {
        let master = generate_key();
        let (kek, _) = create_kek("master-1", &master, Algorithm::Aes256Gcm, 1).unwrap();

        let other = generate_key();
        assert!(matches!(
            unwrap_kek(&kek, &other),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_dek_wrap_unwrap() {
        let kek_material = generate_key();
        let kek_id = Uuid::now_v7();
        let (dek, material) =
            create_dek(kek_id, &kek_material, Algorithm::ChaCha20Poly1305).unwrap();

        assert_eq!(dek.kek_id, kek_id);
        let unwrapped = decrypt_dek(&dek, &kek_material).unwrap();
        assert_eq!(*unwrapped, *material);
    }

    #[test]
    fn test_rewrap_preserves_material_and_moves_kek() {
        let old_kek = generate_key();
        let new_kek = generate_key();
        let new_kek_id = Uuid::now_v7();

        let (mut dek, material) =
            create_dek(Uuid::now_v7(), &old_kek, Algorithm::Aes256Gcm).unwrap();
        let old_encrypted = dek.encrypted_key.clone();

        rewrap_dek(&mut dek, &old_kek, new_kek_id, &new_kek).unwrap();

        assert_eq!(dek.kek_id, new_kek_id);
        assert_ne!(dek.encrypted_key, old_encrypted);

        // Material unchanged: ciphertexts bound to this DEK stay valid.
        let unwrapped = decrypt_dek(&dek, &new_kek).unwrap();
        assert_eq!(*unwrapped, *material);

        // The old KEK no longer unwraps it.
        assert!(decrypt_dek(&dek, &old_kek).is_err());
    }

    #[test]
    fn test_dek_ids_are_time_ordered() {
        let kek_material = generate_key();
        let (a, _) = create_dek(Uuid::now_v7(), &kek_material, Algorithm::Aes256Gcm).unwrap();
        let (b, _) = create_dek(Uuid::now_v7(), &kek_material, Algorithm::Aes256Gcm).unwrap();
        assert!(a.id < b.id);
    }
}

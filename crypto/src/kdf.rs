use crate::aead::KEY_LEN;
use crate::error::{CryptoError, CryptoResult};
use hkdf::Hkdf;
use sha2::Sha256;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Domain-separation salt for audit-log HMAC keys.
pub const AUDIT_KEY_SALT: &[u8] = b"audit-log";

/// Derive the per-row audit signing key from KEK material:
/// `HKDF-SHA256(salt="audit-log", ikm=kek, info=audit_id_bytes, len=32)`.
///
/// Binding the row id into `info` gives every audit row its own HMAC
/// key, so truncating the table cannot recombine signatures.
pub fn derive_audit_key(
    kek_material: &[u8; KEY_LEN],
    audit_id: &Uuid,
) -> CryptoResult<Zeroizing<[u8; KEY_LEN]>> {
    let hk = Hkdf::<Sha256>::new(Some(AUDIT_KEY_SALT), kek_material);
    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(audit_id.as_bytes(), &mut *okm)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aead::generate_key;

    #[test]
    fn test_derivation_is_deterministic() {
        let kek = generate_key();
        let id = Uuid::now_v7();

        let a = derive_audit_key(&kek, &id).unwrap();
        let b = derive_audit_key(&kek, &id).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_different_rows_get_different_keys() {
        let kek = generate_key();
        let a = derive_audit_key(&kek, &Uuid::now_v7()).unwrap();
        let b = derive_audit_key(&kek, &Uuid::now_v7()).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_different_keks_get_different_keys() {
        let id = Uuid::now_v7();
        let a = derive_audit_key(&generate_key(), &id).unwrap();
        let b = derive_audit_key(&generate_key(), &id).unwrap();
        assert_ne!(*a, *b);
    }
}

//! Audit row signing.
//!
//! The message is a length-prefixed concatenation of UTF-8 fields in a
//! fixed order; the key is derived per row from the KEK named in
//! `kek_id`, so each signature is self-contained and verifiable
//! offline against the chain.

use crate::canonical::canonical_json;
use chrono::SecondsFormat;
use crypto::{derive_audit_key, CryptoError, CryptoResult, KEY_LEN};
use database_layer::AuditLog;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Canonical signing message:
/// `id ∥ request_id ∥ client_id ∥ capability ∥ path ∥ metadata ∥ created_at`,
/// each field u32-big-endian length-prefixed. Absent metadata
/// contributes an empty field, which is distinct from `"null"`.
pub fn signing_message(entry: &AuditLog) -> Vec<u8> {
    let metadata = entry
        .metadata
        .as_ref()
        .map(canonical_json)
        .unwrap_or_default();
    let created_at = entry
        .created_at
        .to_rfc3339_opts(SecondsFormat::Nanos, true);
    let id = entry.id.to_string();
    let request_id = entry.request_id.to_string();
    let client_id = entry.client_id.to_string();

    let fields: [&str; 7] = [
        &id,
        &request_id,
        &client_id,
        &entry.capability,
        &entry.path,
        &metadata,
        &created_at,
    ];

    let mut message = Vec::new();
    for field in fields {
        let bytes = field.as_bytes();
        message.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        message.extend_from_slice(bytes);
    }
    message
}

/// HMAC-SHA256 over the canonical message, keyed by the row-specific
/// HKDF derivation of the KEK material.
pub fn sign(entry: &AuditLog, kek_material: &[u8; KEY_LEN]) -> CryptoResult<Vec<u8>> {
    let key = derive_audit_key(kek_material, &entry.id)?;
    let mut mac = HmacSha256::new_from_slice(key.as_ref())
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    mac.update(&signing_message(entry));
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Recompute and compare in constant time.
pub fn verify(
    entry: &AuditLog,
    signature: &[u8],
    kek_material: &[u8; KEY_LEN],
) -> CryptoResult<bool> {
    let key = derive_audit_key(kek_material, &entry.id)?;
    let mut mac = HmacSha256::new_from_slice(key.as_ref())
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    mac.update(&signing_message(entry));
    Ok(mac.verify_slice(signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crypto::generate_key;
    use serde_json::json;
    use uuid::Uuid;

    fn entry() -> AuditLog {
        AuditLog {
            id: Uuid::now_v7(),
            request_id: Uuid::now_v7(),
            client_id: Uuid::now_v7(),
            capability: "secret.read".into(),
            path: "/app/db".into(),
            metadata: Some(json!({"version": 2})),
            signature: None,
            kek_id: None,
            is_signed: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let kek = generate_key();
        let entry = entry();
        let signature = sign(&entry, &kek).unwrap();
        assert_eq!(signature.len(), 32);
        assert!(verify(&entry, &signature, &kek).unwrap());
    }

    #[test]
    fn test_any_field_flip_breaks_verification() {
        let kek = generate_key();
        let original = entry();
        let signature = sign(&original, &kek).unwrap();

        let mut tampered = original.clone();
        tampered.path = "/app/dc".into();
        assert!(!verify(&tampered, &signature, &kek).unwrap());

        let mut tampered = original.clone();
        tampered.capability = "secret.write".into();
        assert!(!verify(&tampered, &signature, &kek).unwrap());

        let mut tampered = original.clone();
        tampered.metadata = Some(json!({"version": 3}));
        assert!(!verify(&tampered, &signature, &kek).unwrap());

        let mut tampered = original.clone();
        tampered.client_id = Uuid::now_v7();
        assert!(!verify(&tampered, &signature, &kek).unwrap());
    }

    #[test]
    fn test_flipped_signature_byte_fails() {
        let kek = generate_key();
        let entry = entry();
        let mut signature = sign(&entry, &kek).unwrap();
        signature[0] ^= 0x80;
        assert!(!verify(&entry, &signature, &kek).unwrap());
    }

    #[test]
    fn test_wrong_kek_fails() {
        let entry = entry();
        let signature = sign(&entry, &generate_key()).unwrap();
        assert!(!verify(&entry, &signature, &generate_key()).unwrap());
    }

    #[test]
    fn test_length_prefixing_prevents_field_sliding() {
        let kek = generate_key();
        let mut a = entry();
        a.capability = "secret.rea".into();
        a.path = "d/app/db".into();
        let mut b = a.clone();
        b.capability = "secret.read".into();
        b.path = "/app/db".into();

        assert_ne!(signing_message(&a), signing_message(&b));
        let signature = sign(&a, &kek).unwrap();
        assert!(!verify(&b, &signature, &kek).unwrap());
    }

    #[test]
    fn test_absent_metadata_is_distinct_from_null() {
        let mut a = entry();
        a.metadata = None;
        let mut b = a.clone();
        b.metadata = Some(serde_json::Value::Null);
        assert_ne!(signing_message(&a), signing_message(&b));
    }
}

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use database_layer::Token;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// A freshly minted token. The plaintext is shown exactly once; only
/// its hash persists.
pub struct IssuedToken {
    pub token: Token,
    pub plaintext: String,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &self.token)
            .field("plaintext", &"<redacted>")
            .finish()
    }
}

/// 32 random bytes, base64url without padding. Opaque to the caller.
pub(crate) fn generate_token_plaintext() -> String {
    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    URL_SAFE_NO_PAD.encode(raw)
}

/// SHA-256 of the presented token string; the index key for lookups.
pub(crate) fn hash_token(plaintext: &str) -> Vec<u8> {
    Sha256::digest(plaintext.as_bytes()).to_vec()
}

/// SHA-256 of a client secret, the stored comparison target.
pub(crate) fn hash_secret(secret: &str) -> Vec<u8> {
    Sha256::digest(secret.as_bytes()).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_plaintexts_are_unique() {
        let a = generate_token_plaintext();
        let b = generate_token_plaintext();
        assert_ne!(a, b);
        // 32 bytes of entropy → 43 base64url chars.
        assert_eq!(a.len(), 43);
    }

    #[test]
    fn test_hash_is_stable_and_32_bytes() {
        let token = generate_token_plaintext();
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_eq!(hash_token(&token).len(), 32);
        assert_ne!(hash_token(&token), hash_token("other"));
    }
}

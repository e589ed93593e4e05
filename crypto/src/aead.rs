use crate::error::{CryptoError, CryptoResult};
use aes_gcm::{
    aead::{Aead as _, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Key length shared by both algorithm variants.
pub const KEY_LEN: usize = 32;
/// Nonce length shared by both algorithm variants (96-bit, the
/// recommended size for GCM and the fixed size for ChaCha20-Poly1305).
pub const NONCE_LEN: usize = 12;
/// Authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// AEAD algorithm variant.
///
/// AES-GCM wins on AES-NI hardware; ChaCha20-Poly1305 wins everywhere
/// else. Data at rest may mix both, one DEK at a time, so the variant
/// is recorded next to every wrapped key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Aes256Gcm => "AES-GCM",
            Algorithm::ChaCha20Poly1305 => "ChaCha20-Poly1305",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AES-GCM" => Ok(Algorithm::Aes256Gcm),
            "ChaCha20-Poly1305" => Ok(Algorithm::ChaCha20Poly1305),
            other => Err(CryptoError::UnknownAlgorithm(other.to_string())),
        }
    }
}

enum Cipher {
    Aes(Box<Aes256Gcm>),
    ChaCha(Box<ChaCha20Poly1305>),
}

/// Stateless authenticated encryption over the two algorithm variants.
///
/// Nonces are generated fresh from the OS RNG on every encrypt; callers
/// persist them next to the ciphertext. The cipher holds key schedule
/// state only; the caller keeps ownership of the raw key bytes and is
/// responsible for zeroizing them.
pub struct Aead {
    algorithm: Algorithm,
    cipher: Cipher,
}

impl Aead {
    pub fn new(algorithm: Algorithm, key: &[u8]) -> CryptoResult<Self> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                got: key.len(),
            });
        }

        let cipher = match algorithm {
            Algorithm::Aes256Gcm => Cipher::Aes(Box::new(
                Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_LEN,
                    got: key.len(),
                })?,
            )),
            Algorithm::ChaCha20Poly1305 => Cipher::ChaCha(Box::new(
                ChaCha20Poly1305::new_from_slice(key).map_err(|_| {
                    CryptoError::InvalidKeyLength {
                        expected: KEY_LEN,
                        got: key.len(),
                    }
                })?,
            )),
        };

        Ok(Self { algorithm, cipher })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Encrypt `plaintext`, returning the ciphertext (16-byte tag
    /// appended) and the fresh random nonce used.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        associated_data: Option<&[u8]>,
    ) -> CryptoResult<(Vec<u8>, [u8; NONCE_LEN])> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let payload = Payload {
            msg: plaintext,
            aad: associated_data.unwrap_or(&[]),
        };

        let ciphertext = match &self.cipher {
            Cipher::Aes(cipher) => cipher.encrypt(nonce, payload),
            Cipher::ChaCha(cipher) => cipher.encrypt(nonce, payload),
        }
        .map_err(|_| CryptoError::EncryptionFailed)?;

        Ok((ciphertext, nonce_bytes))
    }

    /// Decrypt `ciphertext` under `nonce`. Any tag mismatch, wrong-length
    /// nonce, or truncated ciphertext fails with `DecryptionFailed` and
    /// nothing more specific; the distinction is not safe to reveal.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &[u8],
        associated_data: Option<&[u8]>,
    ) -> CryptoResult<Zeroizing<Vec<u8>>> {
        if nonce.len() != NONCE_LEN || ciphertext.len() < TAG_LEN {
            return Err(CryptoError::DecryptionFailed);
        }

        let nonce = Nonce::from_slice(nonce);
        let payload = Payload {
            msg: ciphertext,
            aad: associated_data.unwrap_or(&[]),
        };

        let plaintext = match &self.cipher {
            Cipher::Aes(cipher) => cipher.decrypt(nonce, payload),
            Cipher::ChaCha(cipher) => cipher.decrypt(nonce, payload),
        }
        .map_err(|_| CryptoError::DecryptionFailed)?;

        Ok(Zeroizing::new(plaintext))
    }
}

/// Generate a fresh 32-byte key from the OS RNG. The buffer wipes
/// itself on drop; copy out of it only into other zeroizing containers.
pub fn generate_key() -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(&mut *key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_both_algorithms() {
        for algorithm in [Algorithm::Aes256Gcm, Algorithm::ChaCha20Poly1305] {
            let key = generate_key();
            let aead = Aead::new(algorithm, key.as_ref()).unwrap();

            let plaintext = b"attack at dawn";
            let (ciphertext, nonce) = aead.encrypt(plaintext, None).unwrap();
            assert_eq!(ciphertext.len(), plaintext.len() + TAG_LEN);

            let decrypted = aead.decrypt(&ciphertext, &nonce, None).unwrap();
            assert_eq!(decrypted.as_slice(), plaintext);
        }
    }

    #[test]
    fn test_roundtrip_with_associated_data() {
        let key = generate_key();
        let aead = Aead::new(Algorithm::Aes256Gcm, key.as_ref()).unwrap();

        let (ciphertext, nonce) = aead.encrypt(b"payload", Some(b"header")).unwrap();

        let decrypted = aead.decrypt(&ciphertext, &nonce, Some(b"header")).unwrap();
        assert_eq!(decrypted.as_slice(), b"payload");

        // Wrong associated data must fail authentication.
        assert!(matches!(
            aead.decrypt(&ciphertext, &nonce, Some(b"other")),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_fresh_nonce_per_encrypt() {
        let key = generate_key();
        let aead = Aead::new(Algorithm::ChaCha20Poly1305, key.as_ref()).unwrap();

        let (c1, n1) = aead.encrypt(b"same", None).unwrap();
        let (c2, n2) = aead.encrypt(b"same", None).unwrap();
        assert_ne!(n1, n2);
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = generate_key();
        let aead = Aead::new(Algorithm::Aes256Gcm, key.as_ref()).unwrap();

        let (mut ciphertext, nonce) = aead.encrypt(b"integrity", None).unwrap();
        ciphertext[0] ^= 0x01;

        assert!(matches!(
            aead.decrypt(&ciphertext, &nonce, None),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_wrong_length_nonce_fails() {
        let key = generate_key();
        let aead = Aead::new(Algorithm::Aes256Gcm, key.as_ref()).unwrap();

        let (ciphertext, _) = aead.encrypt(b"x", None).unwrap();
        assert!(matches!(
            aead.decrypt(&ciphertext, &[0u8; 11], None),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = generate_key();
        let aead = Aead::new(Algorithm::Aes256Gcm, key.as_ref()).unwrap();

        assert!(matches!(
            aead.decrypt(&[0u8; 7], &[0u8; NONCE_LEN], None),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let aead1 = Aead::new(Algorithm::Aes256Gcm, generate_key().as_ref()).unwrap();
        let aead2 = Aead::new(Algorithm::Aes256Gcm, generate_key().as_ref()).unwrap();

        let (ciphertext, nonce) = aead1.encrypt(b"secret", None).unwrap();
        assert!(aead2.decrypt(&ciphertext, &nonce, None).is_err());
    }

    #[test]
    fn test_short_key_rejected() {
        assert!(matches!(
            Aead::new(Algorithm::Aes256Gcm, &[0u8; 16]),
            Err(CryptoError::InvalidKeyLength {
                expected: 32,
                got: 16
            })
        ));
    }

    #[test]
    fn test_algorithm_names_roundtrip() {
        assert_eq!(Algorithm::Aes256Gcm.as_str(), "AES-GCM");
        assert_eq!(Algorithm::ChaCha20Poly1305.as_str(), "ChaCha20-Poly1305");
        assert_eq!(
            "AES-GCM".parse::<Algorithm>().unwrap(),
            Algorithm::Aes256Gcm
        );
        assert_eq!(
            "ChaCha20-Poly1305".parse::<Algorithm>().unwrap(),
            Algorithm::ChaCha20Poly1305
        );
        assert!(matches!(
            "AES-CBC".parse::<Algorithm>(),
            Err(CryptoError::UnknownAlgorithm(_))
        ));
    }

    #[test]
    fn test_empty_plaintext() {
        let key = generate_key();
        let aead = Aead::new(Algorithm::ChaCha20Poly1305, key.as_ref()).unwrap();

        let (ciphertext, nonce) = aead.encrypt(b"", None).unwrap();
        assert_eq!(ciphertext.len(), TAG_LEN);
        assert_eq!(aead.decrypt(&ciphertext, &nonce, None).unwrap().len(), 0);
    }
}

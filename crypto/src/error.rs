use error_common::EngineError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("KEK {0} not present in chain")]
    KekNotFound(Uuid),

    #[error("No active KEK")]
    NoActiveKek,

    #[error("Master key {0} not loaded")]
    MasterKeyNotFound(String),

    #[error("Key derivation failed")]
    KeyDerivationFailed,

    #[error("Invalid key encoding")]
    InvalidKeyEncoding,
}

pub type CryptoResult<T> = Result<T, CryptoError>;

impl From<CryptoError> for EngineError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed => {
                EngineError::decryption_failed("decryption failed")
            }
            CryptoError::EncryptionFailed => EngineError::internal("encryption failed"),
            CryptoError::InvalidKeyLength { .. } => {
                EngineError::validation("invalid key length").with_source(err)
            }
            CryptoError::UnknownAlgorithm(_) => {
                EngineError::validation("unknown algorithm").with_source(err)
            }
            CryptoError::KekNotFound(_) => {
                EngineError::kek_not_found("kek not present in chain").with_source(err)
            }
            CryptoError::NoActiveKek => EngineError::kek_not_found("no active kek"),
            CryptoError::MasterKeyNotFound(_) => {
                EngineError::not_found("master key not loaded").with_source(err)
            }
            CryptoError::KeyDerivationFailed => {
                EngineError::internal("key derivation failed")
            }
            CryptoError::InvalidKeyEncoding => {
                EngineError::validation("invalid key encoding")
            }
        }
    }
}

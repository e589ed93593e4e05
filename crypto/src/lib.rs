//! Cryptographic core of the Strongroom engine.
//!
//! Implements the envelope hierarchy Master → KEK → DEK → secret:
//! stateless AEAD over two algorithm variants, wrap/unwrap of key
//! material, and the process-wide [`chain::KekChain`] that owns live
//! KEK plaintext. Key buffers are `Zeroizing` throughout; nothing in
//! this crate persists or logs plaintext key material.

pub mod aead;
pub mod chain;
pub mod constant_time;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod master;

pub use aead::{generate_key, Aead, Algorithm, KEY_LEN, NONCE_LEN, TAG_LEN};
pub use chain::{KekChain, KekChainHandle};
pub use envelope::{
    create_dek, create_kek, decrypt_dek, rewrap_dek, unwrap_kek, Dek, Kek,
};
pub use error::{CryptoError, CryptoResult};
pub use kdf::derive_audit_key;
pub use master::{MasterKeyProvider, StaticMasterKeys};

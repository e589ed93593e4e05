//! The secret lifecycle use-case.
//!
//! Orchestrates the AEAD primitives, the KEK chain and the repositories
//! into the versioned secret operations, all inside one ambient
//! transaction per request: a fresh DEK per written version, decryption
//! through the chain on reads, soft delete, KEK bootstrap and rotation,
//! and the background DEK re-wrap batch that follows a rotation.

pub mod keys;
pub mod rewrap;
pub mod service;

pub use keys::KeyManager;
pub use rewrap::{RewrapConfig, RewrapWorker};
pub use service::{DecryptedSecret, SecretService};

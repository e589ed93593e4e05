//! Tamper-evident audit logging.
//!
//! Every security-relevant action appends one HMAC-signed row inside
//! the same transaction that performs the action. Signing keys derive
//! per row from the active KEK; verification recomputes against the
//! KEK the row names, so the log is checkable offline against the
//! chain.

pub mod canonical;
pub mod entry;
pub mod service;
pub mod signature;

pub use canonical::canonical_json;
pub use entry::{capability, AuditActor};
pub use service::{AuditService, AuditTrust, AuditVerificationReport};
pub use signature::signing_message;

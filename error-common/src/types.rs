use serde::{Deserialize, Serialize};
use std::fmt;

/// Error kind taxonomy shared by every engine layer.
///
/// The repository layer surfaces `NotFound`, `AlreadyExists`,
/// `ValidationError` and `Internal`; use-case layers map and add the
/// domain kinds on top. Kinds are what callers branch on and what the
/// wire surface renders; the wrapped cause never leaves the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    ValidationError,
    Unauthorized,
    Forbidden,
    Locked,
    KekNotFound,
    DekNotFound,
    DecryptionFailed,
    AuditSignatureMismatch,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Locked => "locked",
            ErrorKind::KekNotFound => "kek_not_found",
            ErrorKind::DekNotFound => "dek_not_found",
            ErrorKind::DecryptionFailed => "decryption_failed",
            ErrorKind::AuditSignatureMismatch => "audit_signature_mismatch",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine error: a kind, a sanitized message, and an optional wrapped
/// cause kept for logging only. The Display form reveals kind and
/// message, never the cause chain, and messages must not carry key
/// material or secret bytes.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct EngineError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn locked(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Locked, message)
    }

    pub fn kek_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::KekNotFound, message)
    }

    pub fn dek_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DekNotFound, message)
    }

    pub fn decryption_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DecryptionFailed, message)
    }

    pub fn audit_signature_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuditSignatureMismatch, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_reveals_kind_and_message_only() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "socket reset by kms");
        let err = EngineError::internal("query failed").with_source(inner);

        let rendered = err.to_string();
        assert_eq!(rendered, "internal: query failed");
        assert!(!rendered.contains("kms"));
    }

    #[test]
    fn test_source_preserved_for_logging() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = EngineError::internal("query failed").with_source(inner);

        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("boom"));
    }

    #[test]
    fn test_kind_accessor() {
        assert_eq!(EngineError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(EngineError::locked("x").kind(), ErrorKind::Locked);
        assert_eq!(
            EngineError::decryption_failed("x").kind(),
            ErrorKind::DecryptionFailed
        );
        assert!(EngineError::not_found("x").is_not_found());
        assert!(!EngineError::internal("x").is_not_found());
    }

    #[test]
    fn test_kind_round_trips_through_serde() {
        let json = serde_json::to_string(&ErrorKind::KekNotFound).unwrap();
        let back: ErrorKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorKind::KekNotFound);
    }
}

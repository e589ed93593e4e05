// Persisted row models. Kek and Dek live in the crypto crate next to
// the envelope operations that produce them; everything else is here.
use chrono::{DateTime, Utc};
use error_common::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub use crypto::{Dek, Kek};

/// One immutable version of a secret. Plaintext never appears here;
/// reads that decrypt return a separate decrypted view owned by the
/// use-case layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub id: Uuid,
    pub path: String,
    /// Starts at 1, increases monotonically per path. `(path, version)`
    /// is unique; concurrent writers race on the constraint.
    pub version: i64,
    pub dek_id: Option<Uuid>,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Secret {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A caller principal with capability grants and lockout counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    /// SHA-256 digest of the client secret. Plaintext never persists.
    pub secret_hash: Vec<u8>,
    pub name: String,
    pub is_active: bool,
    /// Capability grants on path globs, stored and returned opaquely.
    pub policies: serde_json::Value,
    pub failed_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Client {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map_or(false, |until| until > now)
    }
}

/// A bearer credential, indexed by the hash of its opaque plaintext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: Uuid,
    pub token_hash: Vec<u8>,
    pub client_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Token {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// One append-only audit row. `is_signed` is true iff both `signature`
/// and `kek_id` are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub request_id: Uuid,
    pub client_id: Uuid,
    pub capability: String,
    pub path: String,
    pub metadata: Option<serde_json::Value>,
    pub signature: Option<Vec<u8>>,
    pub kek_id: Option<Uuid>,
    pub is_signed: bool,
    pub created_at: DateTime<Utc>,
}

/// Outbox event lifecycle state. Transitions only move forward:
/// `pending → processed` or `pending → … → failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxStatus {
    Pending,
    Processed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processed => "processed",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "processed" => Ok(OutboxStatus::Processed),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(EngineError::internal(format!(
                "corrupted outbox status: {other}"
            ))),
        }
    }
}

/// A domain event produced transactionally with a business write and
/// dispatched asynchronously by the outbox processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    pub retries: i32,
    pub last_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxEvent {
    pub fn new(event_type: impl Into<String>, payload: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            event_type: event_type.into(),
            payload,
            status: OutboxStatus::Pending,
            retries: 0,
            last_error: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_processed(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Processed;
        self.processed_at = Some(now);
        self.updated_at = now;
    }

    /// Record a processing failure. Non-fatal failures retry until the
    /// bound; fatal ones and exhausted ones are terminal.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        fatal: bool,
        max_retries: i32,
        now: DateTime<Utc>,
    ) {
        self.retries += 1;
        self.last_error = Some(error.into());
        self.updated_at = now;
        if fatal || self.retries >= max_retries {
            self.status = OutboxStatus::Failed;
        }
    }
}

/// Build an `EngineResult` id out of a 16-byte binary column.
pub(crate) fn uuid_from_bytes(bytes: &[u8], what: &str) -> EngineResult<Uuid> {
    Uuid::from_slice(bytes)
        .map_err(|e| EngineError::internal(format!("corrupted {what} id")).with_source(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_token_validity() {
        let now = Utc::now();
        let mut token = Token {
            id: Uuid::now_v7(),
            token_hash: vec![1; 32],
            client_id: Uuid::now_v7(),
            expires_at: now + Duration::minutes(5),
            revoked_at: None,
            created_at: now,
        };
        assert!(token.is_valid(now));

        token.revoked_at = Some(now);
        assert!(!token.is_valid(now));

        token.revoked_at = None;
        token.expires_at = now;
        assert!(!token.is_valid(now));
    }

    #[test]
    fn test_client_lock_window() {
        let now = Utc::now();
        let mut client = Client {
            id: Uuid::now_v7(),
            secret_hash: vec![0; 32],
            name: "ci".into(),
            is_active: true,
            policies: serde_json::json!({}),
            failed_attempts: 0,
            locked_until: None,
            created_at: now,
        };
        assert!(!client.is_locked(now));

        client.locked_until = Some(now + Duration::minutes(15));
        assert!(client.is_locked(now));
        assert!(!client.is_locked(now + Duration::minutes(16)));
    }

    #[test]
    fn test_outbox_forward_transitions() {
        let mut event = OutboxEvent::new("secret.created", b"{}".to_vec());
        assert_eq!(event.status, OutboxStatus::Pending);

        let now = Utc::now();
        event.record_failure("sink unavailable", false, 3, now);
        assert_eq!(event.status, OutboxStatus::Pending);
        assert_eq!(event.retries, 1);
        assert_eq!(event.last_error.as_deref(), Some("sink unavailable"));

        event.record_failure("sink unavailable", false, 3, now);
        assert_eq!(event.status, OutboxStatus::Pending);

        event.record_failure("sink unavailable", false, 3, now);
        assert_eq!(event.status, OutboxStatus::Failed);
        assert_eq!(event.retries, 3);
    }

    #[test]
    fn test_outbox_fatal_failure_is_terminal() {
        let mut event = OutboxEvent::new("audit.appended", vec![]);
        event.record_failure("malformed payload", true, 10, Utc::now());
        assert_eq!(event.status, OutboxStatus::Failed);
        assert_eq!(event.retries, 1);
    }

    #[test]
    fn test_outbox_status_round_trip() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::Processed,
            OutboxStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<OutboxStatus>().unwrap(), status);
        }
        assert!("done".parse::<OutboxStatus>().is_err());
    }
}

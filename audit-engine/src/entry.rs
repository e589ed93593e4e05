use uuid::Uuid;

/// The principal and request an audit row is attributed to. Handed down
/// from the edge with every use-case call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditActor {
    pub request_id: Uuid,
    pub client_id: Uuid,
}

impl AuditActor {
    pub fn new(request_id: Uuid, client_id: Uuid) -> Self {
        Self {
            request_id,
            client_id,
        }
    }

    /// Actor for engine-internal actions (bootstrap, batch jobs) with a
    /// fresh request id and the nil client.
    pub fn system() -> Self {
        Self {
            request_id: Uuid::now_v7(),
            client_id: Uuid::nil(),
        }
    }
}

/// Capability names recorded on audit rows.
pub mod capability {
    pub const TOKEN_ISSUE: &str = "token.issue";
    pub const TOKEN_REVOKE: &str = "token.revoke";
    pub const SECRET_READ: &str = "secret.read";
    pub const SECRET_WRITE: &str = "secret.write";
    pub const SECRET_DELETE: &str = "secret.delete";
    pub const CLIENT_CREATE: &str = "client.create";
    pub const CLIENT_UPDATE: &str = "client.update";
    pub const KEK_ROTATE: &str = "kek.rotate";
}

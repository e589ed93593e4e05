use crate::config::LockoutConfig;
use crate::token::{generate_token_plaintext, hash_secret, hash_token, IssuedToken};
use audit_engine::{capability, AuditActor, AuditService};
use chrono::{DateTime, Utc};
use crypto::constant_time::ct_eq;
use database_layer::repository::{ClientRepository, TokenRepository};
use database_layer::{with_tx, Client, DbContext, Page, Token};
use error_common::{EngineError, EngineResult, ErrorKind};
use sqlx::Database;
use std::sync::Arc;
use std::time::Instant;
use telemetry::{MetricsSink, OperationStatus};
use tracing::{info, warn};
use uuid::Uuid;

const DOMAIN: &str = "identity";

/// Client and token lifecycle: registration, constant-time
/// authentication with failed-attempt lockout, and hash-indexed opaque
/// bearer tokens.
pub struct IdentityService<DB: Database> {
    clients: Arc<dyn ClientRepository<DB>>,
    tokens: Arc<dyn TokenRepository<DB>>,
    audit: Arc<AuditService<DB>>,
    metrics: Arc<dyn MetricsSink>,
    lockout: LockoutConfig,
}

impl<DB: Database> IdentityService<DB> {
    pub fn new(
        clients: Arc<dyn ClientRepository<DB>>,
        tokens: Arc<dyn TokenRepository<DB>>,
        audit: Arc<AuditService<DB>>,
        metrics: Arc<dyn MetricsSink>,
        lockout: LockoutConfig,
    ) -> Self {
        Self {
            clients,
            tokens,
            audit,
            metrics,
            lockout,
        }
    }

    fn observe<T>(&self, op: &str, start: Instant, result: &EngineResult<T>) {
        let status = OperationStatus::from_result(result);
        self.metrics.record_operation(DOMAIN, op, status);
        self.metrics
            .record_duration(DOMAIN, op, start.elapsed(), status);
    }

    fn backoff(&self, now: DateTime<Utc>) -> EngineResult<DateTime<Utc>> {
        let backoff = chrono::Duration::from_std(self.lockout.backoff)
            .map_err(|e| EngineError::internal("lockout backoff out of range").with_source(e))?;
        Ok(now + backoff)
    }

    /// Register a new client. The secret is hashed before it touches
    /// any repository; the returned record carries the hash only.
    pub async fn register_client(
        &self,
        ctx: &DbContext<DB>,
        actor: &AuditActor,
        name: &str,
        secret: &str,
        policies: serde_json::Value,
    ) -> EngineResult<Client> {
        let start = Instant::now();
        let client = Client {
            id: Uuid::now_v7(),
            secret_hash: hash_secret(secret),
            name: name.to_string(),
            is_active: true,
            policies,
            failed_attempts: 0,
            locked_until: None,
            created_at: Utc::now(),
        };

        let result = with_tx(ctx, |tx_ctx| async move {
            self.clients.create(&tx_ctx, &client).await?;
            self.audit
                .append(
                    &tx_ctx,
                    actor,
                    capability::CLIENT_CREATE,
                    "",
                    Some(serde_json::json!({
                        "client_id": client.id,
                        "name": client.name.clone(),
                    })),
                )
                .await?;
            Ok(client)
        })
        .await;

        self.observe("register_client", start, &result);
        result
    }

    /// Update a client record (name, active flag, policies). Lockout
    /// counters go through [`Self::authenticate`], not here.
    pub async fn update_client(
        &self,
        ctx: &DbContext<DB>,
        actor: &AuditActor,
        client: &Client,
    ) -> EngineResult<()> {
        let start = Instant::now();
        let result = with_tx(ctx, |tx_ctx| async move {
            self.clients.update(&tx_ctx, client).await?;
            self.audit
                .append(
                    &tx_ctx,
                    actor,
                    capability::CLIENT_UPDATE,
                    "",
                    Some(serde_json::json!({"client_id": client.id})),
                )
                .await?;
            Ok(())
        })
        .await;

        self.observe("update_client", start, &result);
        result
    }

    /// Replace a client's secret. The new digest lands together with a
    /// lockout reset, so a rotation also clears stale failure counters.
    pub async fn rotate_client_secret(
        &self,
        ctx: &DbContext<DB>,
        actor: &AuditActor,
        client_id: Uuid,
        new_secret: &str,
    ) -> EngineResult<()> {
        let start = Instant::now();
        let result = with_tx(ctx, |tx_ctx| async move {
            let mut client = self.clients.get(&tx_ctx, client_id).await?;
            client.secret_hash = hash_secret(new_secret);
            client.failed_attempts = 0;
            client.locked_until = None;
            self.clients.update(&tx_ctx, &client).await?;
            self.audit
                .append(
                    &tx_ctx,
                    actor,
                    capability::CLIENT_UPDATE,
                    "",
                    Some(serde_json::json!({
                        "client_id": client_id,
                        "secret_rotated": true,
                    })),
                )
                .await?;
            Ok(())
        })
        .await;

        self.observe("rotate_client_secret", start, &result);
        result
    }

    pub async fn get_client(&self, ctx: &DbContext<DB>, id: Uuid) -> EngineResult<Client> {
        self.clients.get(ctx, id).await
    }

    pub async fn list_clients(
        &self,
        ctx: &DbContext<DB>,
        page: Page,
    ) -> EngineResult<Vec<Client>> {
        self.clients.list(ctx, page).await
    }

    /// Authenticate `(client_id, secret)`.
    ///
    /// The digest comparison always runs, locked or not, so response
    /// timing carries no signal. Failure outcomes: `Unauthorized` below
    /// the threshold, `Locked` at the threshold and for the whole
    /// backoff window regardless of credential correctness.
    pub async fn authenticate(
        &self,
        ctx: &DbContext<DB>,
        client_id: Uuid,
        secret: &str,
    ) -> EngineResult<Client> {
        let start = Instant::now();
        let result = self.authenticate_inner(ctx, client_id, secret).await;
        self.observe("authenticate", start, &result);
        result
    }

    async fn authenticate_inner(
        &self,
        ctx: &DbContext<DB>,
        client_id: Uuid,
        secret: &str,
    ) -> EngineResult<Client> {
        let mut client = match self.clients.get(ctx, client_id).await {
            Ok(client) => client,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(EngineError::unauthorized("invalid client credentials"))
            }
            Err(err) => return Err(err),
        };

        let now = Utc::now();
        let presented = hash_secret(secret);
        let matches = ct_eq(&presented, &client.secret_hash);

        if !client.is_active {
            return Err(EngineError::forbidden("client is deactivated"));
        }

        if client.is_locked(now) {
            return Err(EngineError::locked("client is locked out"));
        }

        if matches {
            if client.failed_attempts > 0 || client.locked_until.is_some() {
                self.clients
                    .update_lock_state(ctx, client.id, 0, None)
                    .await?;
            }
            client.failed_attempts = 0;
            client.locked_until = None;
            return Ok(client);
        }

        let attempts = client.failed_attempts + 1;
        if attempts >= self.lockout.threshold {
            let locked_until = self.backoff(now)?;
            self.clients
                .update_lock_state(ctx, client.id, attempts, Some(locked_until))
                .await?;
            warn!(client_id = %client.id, attempts, "client locked out");
            Err(EngineError::locked("client is locked out"))
        } else {
            self.clients
                .update_lock_state(ctx, client.id, attempts, None)
                .await?;
            Err(EngineError::unauthorized("invalid client credentials"))
        }
    }

    /// Mint an opaque bearer token for a client. The plaintext is
    /// returned once and never persisted.
    pub async fn issue_token(
        &self,
        ctx: &DbContext<DB>,
        actor: &AuditActor,
        client_id: Uuid,
        ttl: std::time::Duration,
    ) -> EngineResult<IssuedToken> {
        let start = Instant::now();
        let result = self.issue_token_inner(ctx, actor, client_id, ttl).await;
        self.observe("issue_token", start, &result);
        result
    }

    async fn issue_token_inner(
        &self,
        ctx: &DbContext<DB>,
        actor: &AuditActor,
        client_id: Uuid,
        ttl: std::time::Duration,
    ) -> EngineResult<IssuedToken> {
        let client = self.clients.get(ctx, client_id).await?;
        if !client.is_active {
            return Err(EngineError::forbidden("client is deactivated"));
        }

        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| EngineError::validation("token ttl out of range").with_source(e))?;
        let plaintext = generate_token_plaintext();
        let token = Token {
            id: Uuid::now_v7(),
            token_hash: hash_token(&plaintext),
            client_id: client.id,
            expires_at: now + ttl,
            revoked_at: None,
            created_at: now,
        };

        let token = with_tx(ctx, |tx_ctx| async move {
            self.tokens.create(&tx_ctx, &token).await?;
            self.audit
                .append(
                    &tx_ctx,
                    actor,
                    capability::TOKEN_ISSUE,
                    "",
                    Some(serde_json::json!({
                        "token_id": token.id,
                        "client_id": token.client_id,
                    })),
                )
                .await?;
            Ok(token)
        })
        .await?;

        info!(client_id = %client.id, token_id = %token.id, "token issued");
        Ok(IssuedToken { token, plaintext })
    }

    /// The token authentication path: a token is valid iff it exists,
    /// is unexpired and unrevoked, and its client is active and not
    /// locked. Returns the owning client.
    pub async fn authenticate_token(
        &self,
        ctx: &DbContext<DB>,
        plaintext: &str,
    ) -> EngineResult<Client> {
        let start = Instant::now();
        let result = self.authenticate_token_inner(ctx, plaintext).await;
        self.observe("authenticate_token", start, &result);
        result
    }

    async fn authenticate_token_inner(
        &self,
        ctx: &DbContext<DB>,
        plaintext: &str,
    ) -> EngineResult<Client> {
        let hash = hash_token(plaintext);
        let token = match self.tokens.get_by_token_hash(ctx, &hash).await {
            Ok(token) => token,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(EngineError::unauthorized("invalid token"))
            }
            Err(err) => return Err(err),
        };

        let now = Utc::now();
        if !token.is_valid(now) {
            return Err(EngineError::unauthorized("invalid token"));
        }

        let client = match self.clients.get(ctx, token.client_id).await {
            Ok(client) => client,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(EngineError::unauthorized("invalid token"))
            }
            Err(err) => return Err(err),
        };

        if !client.is_active {
            return Err(EngineError::forbidden("client is deactivated"));
        }
        if client.is_locked(now) {
            return Err(EngineError::locked("client is locked out"));
        }
        Ok(client)
    }

    /// Revoke a token. Idempotent: an already-revoked token keeps its
    /// original `revoked_at`.
    pub async fn revoke_token(
        &self,
        ctx: &DbContext<DB>,
        actor: &AuditActor,
        token_id: Uuid,
    ) -> EngineResult<()> {
        let start = Instant::now();
        let result = with_tx(ctx, |tx_ctx| async move {
            let mut token = self.tokens.get(&tx_ctx, token_id).await?;
            if token.revoked_at.is_none() {
                token.revoked_at = Some(Utc::now());
                self.tokens.update(&tx_ctx, &token).await?;
            }
            self.audit
                .append(
                    &tx_ctx,
                    actor,
                    capability::TOKEN_REVOKE,
                    "",
                    Some(serde_json::json!({"token_id": token_id})),
                )
                .await?;
            Ok(())
        })
        .await;

        self.observe("revoke_token", start, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto::KekChainHandle;
    use database_layer::memory::{
        MemoryAuditLogRepository, MemoryClientRepository, MemoryTokenRepository,
    };
    use database_layer::PgContext;
    use serde_json::json;
    use telemetry::NoopMetrics;

    struct Harness {
        service: IdentityService<sqlx::Postgres>,
        clients: Arc<MemoryClientRepository>,
        ctx: PgContext,
    }

    fn harness(lockout: LockoutConfig) -> Harness {
        let clients = Arc::new(MemoryClientRepository::default());
        let tokens = Arc::new(MemoryTokenRepository::default());
        let audit = Arc::new(AuditService::new(
            Arc::new(MemoryAuditLogRepository::default()),
            Arc::new(KekChainHandle::default()),
            Arc::new(NoopMetrics),
        ));
        let service = IdentityService::new(
            clients.clone(),
            tokens,
            audit,
            Arc::new(NoopMetrics),
            lockout,
        );
        Harness {
            service,
            clients,
            ctx: PgContext::detached(),
        }
    }

    #[tokio::test]
    async fn test_register_and_authenticate() {
        let h = harness(LockoutConfig::default());
        let actor = AuditActor::system();

        let client = h
            .service
            .register_client(&h.ctx, &actor, "ci", "hunter2", json!({"read": ["/**"]}))
            .await
            .unwrap();

        let authed = h
            .service
            .authenticate(&h.ctx, client.id, "hunter2")
            .await
            .unwrap();
        assert_eq!(authed.id, client.id);
        assert_eq!(authed.failed_attempts, 0);
    }

    #[tokio::test]
    async fn test_unknown_client_is_unauthorized() {
        let h = harness(LockoutConfig::default());
        let err = h
            .service
            .authenticate(&h.ctx, Uuid::now_v7(), "whatever")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn test_lockout_scenario() {
        // Threshold 5: four wrong attempts return Unauthorized, the
        // fifth locks, a correct secret during the window still locks,
        // and after the window a correct secret resets the counter.
        let h = harness(LockoutConfig {
            threshold: 5,
            backoff: std::time::Duration::from_secs(900),
        });
        let actor = AuditActor::system();
        let client = h
            .service
            .register_client(&h.ctx, &actor, "app", "correct", json!({}))
            .await
            .unwrap();

        for attempt in 1..=4 {
            let err = h
                .service
                .authenticate(&h.ctx, client.id, "wrong")
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Unauthorized, "attempt {attempt}");
        }

        let err = h
            .service
            .authenticate(&h.ctx, client.id, "wrong")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Locked);

        // Correct secret inside the window is still rejected.
        let err = h
            .service
            .authenticate(&h.ctx, client.id, "correct")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Locked);

        // Simulate the window elapsing.
        h.clients
            .update_lock_state(
                &h.ctx,
                client.id,
                5,
                Some(Utc::now() - chrono::Duration::seconds(1)),
            )
            .await
            .unwrap();

        let authed = h
            .service
            .authenticate(&h.ctx, client.id, "correct")
            .await
            .unwrap();
        assert_eq!(authed.failed_attempts, 0);
        assert!(authed.locked_until.is_none());

        let stored = h.service.get_client(&h.ctx, client.id).await.unwrap();
        assert_eq!(stored.failed_attempts, 0);
    }

    #[tokio::test]
    async fn test_failed_attempts_monotone_until_success() {
        let h = harness(LockoutConfig {
            threshold: 10,
            backoff: std::time::Duration::from_secs(60),
        });
        let actor = AuditActor::system();
        let client = h
            .service
            .register_client(&h.ctx, &actor, "app", "correct", json!({}))
            .await
            .unwrap();

        let mut last = 0;
        for _ in 0..3 {
            let _ = h.service.authenticate(&h.ctx, client.id, "wrong").await;
            let stored = h.service.get_client(&h.ctx, client.id).await.unwrap();
            assert!(stored.failed_attempts > last);
            last = stored.failed_attempts;
        }
    }

    #[tokio::test]
    async fn test_secret_rotation_invalidates_old_secret_and_unlocks() {
        let h = harness(LockoutConfig {
            threshold: 2,
            backoff: std::time::Duration::from_secs(900),
        });
        let actor = AuditActor::system();
        let client = h
            .service
            .register_client(&h.ctx, &actor, "app", "old", json!({}))
            .await
            .unwrap();

        // Lock the client out.
        for _ in 0..2 {
            let _ = h.service.authenticate(&h.ctx, client.id, "wrong").await;
        }
        assert_eq!(
            h.service
                .authenticate(&h.ctx, client.id, "old")
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::Locked
        );

        h.service
            .rotate_client_secret(&h.ctx, &actor, client.id, "new")
            .await
            .unwrap();

        // Rotation cleared the lockout; only the new secret works.
        let authed = h
            .service
            .authenticate(&h.ctx, client.id, "new")
            .await
            .unwrap();
        assert_eq!(authed.failed_attempts, 0);
        assert_eq!(
            h.service
                .authenticate(&h.ctx, client.id, "old")
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::Unauthorized
        );
    }

    #[tokio::test]
    async fn test_inactive_client_is_forbidden() {
        let h = harness(LockoutConfig::default());
        let actor = AuditActor::system();
        let mut client = h
            .service
            .register_client(&h.ctx, &actor, "app", "s", json!({}))
            .await
            .unwrap();

        client.is_active = false;
        h.service
            .update_client(&h.ctx, &actor, &client)
            .await
            .unwrap();

        let err = h
            .service
            .authenticate(&h.ctx, client.id, "s")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_token_lifecycle() {
        let h = harness(LockoutConfig::default());
        let actor = AuditActor::system();
        let client = h
            .service
            .register_client(&h.ctx, &actor, "app", "s", json!({}))
            .await
            .unwrap();

        let issued = h
            .service
            .issue_token(
                &h.ctx,
                &actor,
                client.id,
                std::time::Duration::from_secs(3600),
            )
            .await
            .unwrap();

        // Plaintext authenticates; hash is what persisted.
        assert_ne!(issued.plaintext.as_bytes(), issued.token.token_hash.as_slice());
        let authed = h
            .service
            .authenticate_token(&h.ctx, &issued.plaintext)
            .await
            .unwrap();
        assert_eq!(authed.id, client.id);

        h.service
            .revoke_token(&h.ctx, &actor, issued.token.id)
            .await
            .unwrap();
        let err = h
            .service
            .authenticate_token(&h.ctx, &issued.plaintext)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let h = harness(LockoutConfig::default());
        let actor = AuditActor::system();
        let client = h
            .service
            .register_client(&h.ctx, &actor, "app", "s", json!({}))
            .await
            .unwrap();

        let issued = h
            .service
            .issue_token(&h.ctx, &actor, client.id, std::time::Duration::ZERO)
            .await
            .unwrap();

        let err = h
            .service
            .authenticate_token(&h.ctx, &issued.plaintext)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }
}

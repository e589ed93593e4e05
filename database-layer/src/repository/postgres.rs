//! Postgres repositories. Identifiers are native `UUID` columns,
//! placeholders are `$n`, timestamps are `TIMESTAMPTZ`.

use crate::context::PgContext;
use crate::executor::pg;
use crate::models::{AuditLog, Client, Dek, Kek, OutboxEvent, OutboxStatus, Secret, Token};
use crate::page::Page;
use crate::repository::{
    AuditLogRepository, ClientRepository, DekRepository, KekRepository, OutboxRepository,
    SecretRepository, TokenRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use error_common::{EngineError, EngineResult};
use sqlx::{FromRow, Postgres, QueryBuilder};
use uuid::Uuid;

#[derive(FromRow)]
struct KekRow {
    id: Uuid,
    master_key_id: String,
    algorithm: String,
    encrypted_key: Vec<u8>,
    nonce: Vec<u8>,
    version: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<KekRow> for Kek {
    type Error = EngineError;

    fn try_from(row: KekRow) -> EngineResult<Self> {
        Ok(Kek {
            id: row.id,
            master_key_id: row.master_key_id,
            algorithm: row.algorithm.parse().map_err(EngineError::from)?,
            encrypted_key: row.encrypted_key,
            nonce: row.nonce,
            version: row.version,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct DekRow {
    id: Uuid,
    kek_id: Uuid,
    algorithm: String,
    encrypted_key: Vec<u8>,
    nonce: Vec<u8>,
    created_at: DateTime<Utc>,
}

impl TryFrom<DekRow> for Dek {
    type Error = EngineError;

    fn try_from(row: DekRow) -> EngineResult<Self> {
        Ok(Dek {
            id: row.id,
            kek_id: row.kek_id,
            algorithm: row.algorithm.parse().map_err(EngineError::from)?,
            encrypted_key: row.encrypted_key,
            nonce: row.nonce,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct SecretRow {
    id: Uuid,
    path: String,
    version: i64,
    dek_id: Option<Uuid>,
    ciphertext: Vec<u8>,
    nonce: Vec<u8>,
    created_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<SecretRow> for Secret {
    fn from(row: SecretRow) -> Self {
        Secret {
            id: row.id,
            path: row.path,
            version: row.version,
            dek_id: row.dek_id,
            ciphertext: row.ciphertext,
            nonce: row.nonce,
            created_at: row.created_at,
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(FromRow)]
struct ClientRow {
    id: Uuid,
    secret_hash: Vec<u8>,
    name: String,
    is_active: bool,
    policies: serde_json::Value,
    failed_attempts: i32,
    locked_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<ClientRow> for Client {
    fn from(row: ClientRow) -> Self {
        Client {
            id: row.id,
            secret_hash: row.secret_hash,
            name: row.name,
            is_active: row.is_active,
            policies: row.policies,
            failed_attempts: row.failed_attempts,
            locked_until: row.locked_until,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct TokenRow {
    id: Uuid,
    token_hash: Vec<u8>,
    client_id: Uuid,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<TokenRow> for Token {
    fn from(row: TokenRow) -> Self {
        Token {
            id: row.id,
            token_hash: row.token_hash,
            client_id: row.client_id,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct AuditLogRow {
    id: Uuid,
    request_id: Uuid,
    client_id: Uuid,
    capability: String,
    path: String,
    metadata: Option<serde_json::Value>,
    signature: Option<Vec<u8>>,
    kek_id: Option<Uuid>,
    is_signed: bool,
    created_at: DateTime<Utc>,
}

impl From<AuditLogRow> for AuditLog {
    fn from(row: AuditLogRow) -> Self {
        AuditLog {
            id: row.id,
            request_id: row.request_id,
            client_id: row.client_id,
            capability: row.capability,
            path: row.path,
            metadata: row.metadata,
            signature: row.signature,
            kek_id: row.kek_id,
            is_signed: row.is_signed,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct OutboxEventRow {
    id: Uuid,
    event_type: String,
    payload: Vec<u8>,
    status: String,
    retries: i32,
    last_error: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OutboxEventRow> for OutboxEvent {
    type Error = EngineError;

    fn try_from(row: OutboxEventRow) -> EngineResult<Self> {
        Ok(OutboxEvent {
            id: row.id,
            event_type: row.event_type,
            payload: row.payload,
            status: row.status.parse::<OutboxStatus>()?,
            retries: row.retries,
            last_error: row.last_error,
            processed_at: row.processed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn affected_or_not_found(rows: u64, what: &str) -> EngineResult<()> {
    if rows == 0 {
        Err(EngineError::not_found(format!("{what} not found")))
    } else {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct PgKekRepository;

#[async_trait]
impl KekRepository<Postgres> for PgKekRepository {
    async fn create(&self, ctx: &PgContext, kek: &Kek) -> EngineResult<()> {
        let query = sqlx::query(
            "INSERT INTO keks (id, master_key_id, algorithm, encrypted_key, nonce, version, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(kek.id)
        .bind(&kek.master_key_id)
        .bind(kek.algorithm.as_str())
        .bind(&kek.encrypted_key)
        .bind(&kek.nonce)
        .bind(kek.version)
        .bind(kek.created_at);
        pg::execute(ctx, "kek", query).await?;
        Ok(())
    }

    async fn update(&self, ctx: &PgContext, kek: &Kek) -> EngineResult<()> {
        let query = sqlx::query(
            "UPDATE keks SET master_key_id = $2, algorithm = $3, encrypted_key = $4, \
             nonce = $5, version = $6 WHERE id = $1",
        )
        .bind(kek.id)
        .bind(&kek.master_key_id)
        .bind(kek.algorithm.as_str())
        .bind(&kek.encrypted_key)
        .bind(&kek.nonce)
        .bind(kek.version);
        let result = pg::execute(ctx, "kek", query).await?;
        affected_or_not_found(result.rows_affected(), "kek")
    }

    async fn list(&self, ctx: &PgContext, page: Page) -> EngineResult<Vec<Kek>> {
        let query = sqlx::query_as::<_, KekRow>(
            "SELECT id, master_key_id, algorithm, encrypted_key, nonce, version, created_at \
             FROM keks ORDER BY version DESC LIMIT $1 OFFSET $2",
        )
        .bind(page.limit())
        .bind(page.offset());
        let rows = pg::fetch_all(ctx, "kek", query).await?;
        rows.into_iter().map(Kek::try_from).collect()
    }
}

#[derive(Debug, Default)]
pub struct PgDekRepository;

#[async_trait]
impl DekRepository<Postgres> for PgDekRepository {
    async fn create(&self, ctx: &PgContext, dek: &Dek) -> EngineResult<()> {
        let query = sqlx::query(
            "INSERT INTO deks (id, kek_id, algorithm, encrypted_key, nonce, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(dek.id)
        .bind(dek.kek_id)
        .bind(dek.algorithm.as_str())
        .bind(&dek.encrypted_key)
        .bind(&dek.nonce)
        .bind(dek.created_at);
        pg::execute(ctx, "dek", query).await?;
        Ok(())
    }

    async fn get(&self, ctx: &PgContext, id: Uuid) -> EngineResult<Dek> {
        let query = sqlx::query_as::<_, DekRow>(
            "SELECT id, kek_id, algorithm, encrypted_key, nonce, created_at \
             FROM deks WHERE id = $1",
        )
        .bind(id);
        let row = pg::fetch_optional(ctx, "dek", query)
            .await?
            .ok_or_else(|| EngineError::not_found("dek not found"))?;
        row.try_into()
    }

    async fn update(&self, ctx: &PgContext, dek: &Dek) -> EngineResult<()> {
        let query = sqlx::query(
            "UPDATE deks SET kek_id = $2, algorithm = $3, encrypted_key = $4, nonce = $5 \
             WHERE id = $1",
        )
        .bind(dek.id)
        .bind(dek.kek_id)
        .bind(dek.algorithm.as_str())
        .bind(&dek.encrypted_key)
        .bind(&dek.nonce);
        let result = pg::execute(ctx, "dek", query).await?;
        affected_or_not_found(result.rows_affected(), "dek")
    }

    async fn get_batch_not_kek_id(
        &self,
        ctx: &PgContext,
        kek_id: Uuid,
        limit: i64,
    ) -> EngineResult<Vec<Dek>> {
        let query = sqlx::query_as::<_, DekRow>(
            "SELECT id, kek_id, algorithm, encrypted_key, nonce, created_at \
             FROM deks WHERE kek_id <> $1 ORDER BY created_at ASC LIMIT $2",
        )
        .bind(kek_id)
        .bind(limit);
        let rows = pg::fetch_all(ctx, "dek", query).await?;
        rows.into_iter().map(Dek::try_from).collect()
    }
}

#[derive(Debug, Default)]
pub struct PgSecretRepository;

#[async_trait]
impl SecretRepository<Postgres> for PgSecretRepository {
    async fn create(&self, ctx: &PgContext, secret: &Secret) -> EngineResult<()> {
        let query = sqlx::query(
            "INSERT INTO secrets (id, path, version, dek_id, ciphertext, nonce, created_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(secret.id)
        .bind(&secret.path)
        .bind(secret.version)
        .bind(secret.dek_id)
        .bind(&secret.ciphertext)
        .bind(&secret.nonce)
        .bind(secret.created_at)
        .bind(secret.deleted_at);
        pg::execute(ctx, "secret", query).await?;
        Ok(())
    }

    async fn get_by_path(&self, ctx: &PgContext, path: &str) -> EngineResult<Secret> {
        let query = sqlx::query_as::<_, SecretRow>(
            "SELECT id, path, version, dek_id, ciphertext, nonce, created_at, deleted_at \
             FROM secrets WHERE path = $1 AND deleted_at IS NULL \
             ORDER BY version DESC LIMIT 1",
        )
        .bind(path);
        let row = pg::fetch_optional(ctx, "secret", query)
            .await?
            .ok_or_else(|| EngineError::not_found("secret not found"))?;
        Ok(row.into())
    }

    async fn get_by_path_and_version(
        &self,
        ctx: &PgContext,
        path: &str,
        version: i64,
    ) -> EngineResult<Secret> {
        let query = sqlx::query_as::<_, SecretRow>(
            "SELECT id, path, version, dek_id, ciphertext, nonce, created_at, deleted_at \
             FROM secrets WHERE path = $1 AND version = $2 AND deleted_at IS NULL",
        )
        .bind(path)
        .bind(version);
        let row = pg::fetch_optional(ctx, "secret", query)
            .await?
            .ok_or_else(|| EngineError::not_found("secret not found"))?;
        Ok(row.into())
    }

    async fn delete(&self, ctx: &PgContext, id: Uuid) -> EngineResult<()> {
        let query = sqlx::query(
            "UPDATE secrets SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(Utc::now());
        let result = pg::execute(ctx, "secret", query).await?;
        affected_or_not_found(result.rows_affected(), "secret")
    }

    async fn list(&self, ctx: &PgContext, page: Page) -> EngineResult<Vec<Secret>> {
        let query = sqlx::query_as::<_, SecretRow>(
            "SELECT DISTINCT ON (path) id, path, version, dek_id, ciphertext, nonce, created_at, deleted_at \
             FROM secrets WHERE deleted_at IS NULL \
             ORDER BY path ASC, version DESC LIMIT $1 OFFSET $2",
        )
        .bind(page.limit())
        .bind(page.offset());
        let rows = pg::fetch_all(ctx, "secret", query).await?;
        Ok(rows.into_iter().map(Secret::from).collect())
    }
}

#[derive(Debug, Default)]
pub struct PgClientRepository;

#[async_trait]
impl ClientRepository<Postgres> for PgClientRepository {
    async fn create(&self, ctx: &PgContext, client: &Client) -> EngineResult<()> {
        let query = sqlx::query(
            "INSERT INTO clients (id, secret_hash, name, is_active, policies, failed_attempts, locked_until, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(client.id)
        .bind(&client.secret_hash)
        .bind(&client.name)
        .bind(client.is_active)
        .bind(&client.policies)
        .bind(client.failed_attempts)
        .bind(client.locked_until)
        .bind(client.created_at);
        pg::execute(ctx, "client", query).await?;
        Ok(())
    }

    async fn update(&self, ctx: &PgContext, client: &Client) -> EngineResult<()> {
        let query = sqlx::query(
            "UPDATE clients SET secret_hash = $2, name = $3, is_active = $4, policies = $5, \
             failed_attempts = $6, locked_until = $7 WHERE id = $1",
        )
        .bind(client.id)
        .bind(&client.secret_hash)
        .bind(&client.name)
        .bind(client.is_active)
        .bind(&client.policies)
        .bind(client.failed_attempts)
        .bind(client.locked_until);
        let result = pg::execute(ctx, "client", query).await?;
        affected_or_not_found(result.rows_affected(), "client")
    }

    async fn get(&self, ctx: &PgContext, id: Uuid) -> EngineResult<Client> {
        let query = sqlx::query_as::<_, ClientRow>(
            "SELECT id, secret_hash, name, is_active, policies, failed_attempts, locked_until, created_at \
             FROM clients WHERE id = $1",
        )
        .bind(id);
        let row = pg::fetch_optional(ctx, "client", query)
            .await?
            .ok_or_else(|| EngineError::not_found("client not found"))?;
        Ok(row.into())
    }

    async fn list(&self, ctx: &PgContext, page: Page) -> EngineResult<Vec<Client>> {
        let query = sqlx::query_as::<_, ClientRow>(
            "SELECT id, secret_hash, name, is_active, policies, failed_attempts, locked_until, created_at \
             FROM clients ORDER BY id DESC LIMIT $1 OFFSET $2",
        )
        .bind(page.limit())
        .bind(page.offset());
        let rows = pg::fetch_all(ctx, "client", query).await?;
        Ok(rows.into_iter().map(Client::from).collect())
    }

    async fn update_lock_state(
        &self,
        ctx: &PgContext,
        client_id: Uuid,
        failed_attempts: i32,
        locked_until: Option<DateTime<Utc>>,
    ) -> EngineResult<()> {
        let query = sqlx::query(
            "UPDATE clients SET failed_attempts = $2, locked_until = $3 WHERE id = $1",
        )
        .bind(client_id)
        .bind(failed_attempts)
        .bind(locked_until);
        let result = pg::execute(ctx, "client", query).await?;
        affected_or_not_found(result.rows_affected(), "client")
    }
}

#[derive(Debug, Default)]
pub struct PgTokenRepository;

#[async_trait]
impl TokenRepository<Postgres> for PgTokenRepository {
    async fn create(&self, ctx: &PgContext, token: &Token) -> EngineResult<()> {
        let query = sqlx::query(
            "INSERT INTO tokens (id, token_hash, client_id, expires_at, revoked_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(token.id)
        .bind(&token.token_hash)
        .bind(token.client_id)
        .bind(token.expires_at)
        .bind(token.revoked_at)
        .bind(token.created_at);
        pg::execute(ctx, "token", query).await?;
        Ok(())
    }

    async fn update(&self, ctx: &PgContext, token: &Token) -> EngineResult<()> {
        let query = sqlx::query(
            "UPDATE tokens SET token_hash = $2, client_id = $3, expires_at = $4, revoked_at = $5 \
             WHERE id = $1",
        )
        .bind(token.id)
        .bind(&token.token_hash)
        .bind(token.client_id)
        .bind(token.expires_at)
        .bind(token.revoked_at);
        let result = pg::execute(ctx, "token", query).await?;
        affected_or_not_found(result.rows_affected(), "token")
    }

    async fn get(&self, ctx: &PgContext, id: Uuid) -> EngineResult<Token> {
        let query = sqlx::query_as::<_, TokenRow>(
            "SELECT id, token_hash, client_id, expires_at, revoked_at, created_at \
             FROM tokens WHERE id = $1",
        )
        .bind(id);
        let row = pg::fetch_optional(ctx, "token", query)
            .await?
            .ok_or_else(|| EngineError::not_found("token not found"))?;
        Ok(row.into())
    }

    async fn get_by_token_hash(
        &self,
        ctx: &PgContext,
        token_hash: &[u8],
    ) -> EngineResult<Token> {
        let query = sqlx::query_as::<_, TokenRow>(
            "SELECT id, token_hash, client_id, expires_at, revoked_at, created_at \
             FROM tokens WHERE token_hash = $1",
        )
        .bind(token_hash);
        let row = pg::fetch_optional(ctx, "token", query)
            .await?
            .ok_or_else(|| EngineError::not_found("token not found"))?;
        Ok(row.into())
    }
}

#[derive(Debug, Default)]
pub struct PgAuditLogRepository;

#[async_trait]
impl AuditLogRepository<Postgres> for PgAuditLogRepository {
    async fn create(&self, ctx: &PgContext, entry: &AuditLog) -> EngineResult<()> {
        let query = sqlx::query(
            "INSERT INTO audit_logs (id, request_id, client_id, capability, path, metadata, signature, kek_id, is_signed, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(entry.id)
        .bind(entry.request_id)
        .bind(entry.client_id)
        .bind(&entry.capability)
        .bind(&entry.path)
        .bind(&entry.metadata)
        .bind(&entry.signature)
        .bind(entry.kek_id)
        .bind(entry.is_signed)
        .bind(entry.created_at);
        pg::execute(ctx, "audit log", query).await?;
        Ok(())
    }

    async fn get(&self, ctx: &PgContext, id: Uuid) -> EngineResult<AuditLog> {
        let query = sqlx::query_as::<_, AuditLogRow>(
            "SELECT id, request_id, client_id, capability, path, metadata, signature, kek_id, is_signed, created_at \
             FROM audit_logs WHERE id = $1",
        )
        .bind(id);
        let row = pg::fetch_optional(ctx, "audit log", query)
            .await?
            .ok_or_else(|| EngineError::not_found("audit log not found"))?;
        Ok(row.into())
    }

    async fn list(
        &self,
        ctx: &PgContext,
        page: Page,
        created_at_from: Option<DateTime<Utc>>,
        created_at_to: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<AuditLog>> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT id, request_id, client_id, capability, path, metadata, signature, kek_id, is_signed, created_at \
             FROM audit_logs WHERE 1 = 1",
        );
        if let Some(from) = created_at_from {
            builder.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = created_at_to {
            builder.push(" AND created_at <= ").push_bind(to);
        }
        builder
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows = pg::fetch_all(ctx, "audit log", builder.build_query_as::<AuditLogRow>()).await?;
        Ok(rows.into_iter().map(AuditLog::from).collect())
    }

    async fn delete_older_than(
        &self,
        ctx: &PgContext,
        cutoff: DateTime<Utc>,
        dry_run: bool,
    ) -> EngineResult<u64> {
        if dry_run {
            let query = sqlx::query_as::<_, (i64,)>(
                "SELECT COUNT(*) FROM audit_logs WHERE created_at < $1",
            )
            .bind(cutoff);
            let (count,) = pg::fetch_one(ctx, "audit log", query).await?;
            return Ok(count as u64);
        }

        let query = sqlx::query("DELETE FROM audit_logs WHERE created_at < $1").bind(cutoff);
        let result = pg::execute(ctx, "audit log", query).await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Default)]
pub struct PgOutboxRepository;

#[async_trait]
impl OutboxRepository<Postgres> for PgOutboxRepository {
    async fn create(&self, ctx: &PgContext, event: &OutboxEvent) -> EngineResult<()> {
        let query = sqlx::query(
            "INSERT INTO outbox_events (id, event_type, payload, status, retries, last_error, processed_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(event.id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.status.as_str())
        .bind(event.retries)
        .bind(&event.last_error)
        .bind(event.processed_at)
        .bind(event.created_at)
        .bind(event.updated_at);
        pg::execute(ctx, "outbox event", query).await?;
        Ok(())
    }

    async fn update(&self, ctx: &PgContext, event: &OutboxEvent) -> EngineResult<()> {
        let query = sqlx::query(
            "UPDATE outbox_events SET event_type = $2, payload = $3, status = $4, retries = $5, \
             last_error = $6, processed_at = $7, updated_at = $8 WHERE id = $1",
        )
        .bind(event.id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.status.as_str())
        .bind(event.retries)
        .bind(&event.last_error)
        .bind(event.processed_at)
        .bind(event.updated_at);
        let result = pg::execute(ctx, "outbox event", query).await?;
        affected_or_not_found(result.rows_affected(), "outbox event")
    }

    async fn get(&self, ctx: &PgContext, id: Uuid) -> EngineResult<OutboxEvent> {
        let query = sqlx::query_as::<_, OutboxEventRow>(
            "SELECT id, event_type, payload, status, retries, last_error, processed_at, created_at, updated_at \
             FROM outbox_events WHERE id = $1",
        )
        .bind(id);
        let row = pg::fetch_optional(ctx, "outbox event", query)
            .await?
            .ok_or_else(|| EngineError::not_found("outbox event not found"))?;
        row.try_into()
    }

    async fn get_pending_events(
        &self,
        ctx: &PgContext,
        limit: i64,
    ) -> EngineResult<Vec<OutboxEvent>> {
        let query = sqlx::query_as::<_, OutboxEventRow>(
            "SELECT id, event_type, payload, status, retries, last_error, processed_at, created_at, updated_at \
             FROM outbox_events WHERE status = 'pending' \
             ORDER BY created_at ASC LIMIT $1 FOR UPDATE SKIP LOCKED",
        )
        .bind(limit);
        let rows = pg::fetch_all(ctx, "outbox event", query).await?;
        rows.into_iter().map(OutboxEvent::try_from).collect()
    }
}

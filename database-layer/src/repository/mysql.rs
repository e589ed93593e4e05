//! MySQL repositories. Identifiers are `BINARY(16)` columns marshaled
//! through the uuid byte form, placeholders are `?`, timestamps are
//! `DATETIME(6)` stored in UTC.

use crate::context::MySqlContext;
use crate::executor::my;
use crate::models::{
    uuid_from_bytes, AuditLog, Client, Dek, Kek, OutboxEvent, OutboxStatus, Secret, Token,
};
use crate::page::Page;
use crate::repository::{
    AuditLogRepository, ClientRepository, DekRepository, KekRepository, OutboxRepository,
    SecretRepository, TokenRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use error_common::{EngineError, EngineResult};
use sqlx::{FromRow, MySql, QueryBuilder};
use uuid::Uuid;

fn id_bytes(id: Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

fn opt_id_bytes(id: Option<Uuid>) -> Option<Vec<u8>> {
    id.map(id_bytes)
}

fn utc(naive: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(naive, Utc)
}

fn opt_utc(naive: Option<NaiveDateTime>) -> Option<DateTime<Utc>> {
    naive.map(utc)
}

#[derive(FromRow)]
struct KekRow {
    id: Vec<u8>,
    master_key_id: String,
    algorithm: String,
    encrypted_key: Vec<u8>,
    nonce: Vec<u8>,
    version: i64,
    created_at: NaiveDateTime,
}

impl TryFrom<KekRow> for Kek {
    type Error = EngineError;

    fn try_from(row: KekRow) -> EngineResult<Self> {
        Ok(Kek {
            id: uuid_from_bytes(&row.id, "kek")?,
            master_key_id: row.master_key_id,
            algorithm: row.algorithm.parse().map_err(EngineError::from)?,
            encrypted_key: row.encrypted_key,
            nonce: row.nonce,
            version: row.version,
            created_at: utc(row.created_at),
        })
    }
}

#[derive(FromRow)]
struct DekRow {
    id: Vec<u8>,
    kek_id: Vec<u8>,
    algorithm: String,
    encrypted_key: Vec<u8>,
    nonce: Vec<u8>,
    created_at: NaiveDateTime,
}

impl TryFrom<DekRow> for Dek {
    type Error = EngineError;

    fn try_from(row: DekRow) -> EngineResult<Self> {
        Ok(Dek {
            id: uuid_from_bytes(&row.id, "dek")?,
            kek_id: uuid_from_bytes(&row.kek_id, "dek")?,
            algorithm: row.algorithm.parse().map_err(EngineError::from)?,
            encrypted_key: row.encrypted_key,
            nonce: row.nonce,
            created_at: utc(row.created_at),
        })
    }
}

#[derive(FromRow)]
struct SecretRow {
    id: Vec<u8>,
    path: String,
    version: i64,
    dek_id: Option<Vec<u8>>,
    ciphertext: Vec<u8>,
    nonce: Vec<u8>,
    created_at: NaiveDateTime,
    deleted_at: Option<NaiveDateTime>,
}

impl TryFrom<SecretRow> for Secret {
    type Error = EngineError;

    fn try_from(row: SecretRow) -> EngineResult<Self> {
        Ok(Secret {
            id: uuid_from_bytes(&row.id, "secret")?,
            path: row.path,
            version: row.version,
            dek_id: row
                .dek_id
                .as_deref()
                .map(|b| uuid_from_bytes(b, "secret"))
                .transpose()?,
            ciphertext: row.ciphertext,
            nonce: row.nonce,
            created_at: utc(row.created_at),
            deleted_at: opt_utc(row.deleted_at),
        })
    }
}

#[derive(FromRow)]
struct ClientRow {
    id: Vec<u8>,
    secret_hash: Vec<u8>,
    name: String,
    is_active: bool,
    policies: serde_json::Value,
    failed_attempts: i32,
    locked_until: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
}

impl TryFrom<ClientRow> for Client {
    type Error = EngineError;

    fn try_from(row: ClientRow) -> EngineResult<Self> {
        Ok(Client {
            id: uuid_from_bytes(&row.id, "client")?,
            secret_hash: row.secret_hash,
            name: row.name,
            is_active: row.is_active,
            policies: row.policies,
            failed_attempts: row.failed_attempts,
            locked_until: opt_utc(row.locked_until),
            created_at: utc(row.created_at),
        })
    }
}

#[derive(FromRow)]
struct TokenRow {
    id: Vec<u8>,
    token_hash: Vec<u8>,
    client_id: Vec<u8>,
    expires_at: NaiveDateTime,
    revoked_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
}

impl TryFrom<TokenRow> for Token {
    type Error = EngineError;

    fn try_from(row: TokenRow) -> EngineResult<Self> {
        Ok(Token {
            id: uuid_from_bytes(&row.id, "token")?,
            token_hash: row.token_hash,
            client_id: uuid_from_bytes(&row.client_id, "token")?,
            expires_at: utc(row.expires_at),
            revoked_at: opt_utc(row.revoked_at),
            created_at: utc(row.created_at),
        })
    }
}

#[derive(FromRow)]
struct AuditLogRow {
    id: Vec<u8>,
    request_id: Vec<u8>,
    client_id: Vec<u8>,
    capability: String,
    path: String,
    metadata: Option<serde_json::Value>,
    signature: Option<Vec<u8>>,
    kek_id: Option<Vec<u8>>,
    is_signed: bool,
    created_at: NaiveDateTime,
}

impl TryFrom<AuditLogRow> for AuditLog {
    type Error = EngineError;

    fn try_from(row: AuditLogRow) -> EngineResult<Self> {
        Ok(AuditLog {
            id: uuid_from_bytes(&row.id, "audit log")?,
            request_id: uuid_from_bytes(&row.request_id, "audit log")?,
            client_id: uuid_from_bytes(&row.client_id, "audit log")?,
            capability: row.capability,
            path: row.path,
            metadata: row.metadata,
            signature: row.signature,
            kek_id: row
                .kek_id
                .as_deref()
                .map(|b| uuid_from_bytes(b, "audit log"))
                .transpose()?,
            is_signed: row.is_signed,
            created_at: utc(row.created_at),
        })
    }
}

#[derive(FromRow)]
struct OutboxEventRow {
    id: Vec<u8>,
    event_type: String,
    payload: Vec<u8>,
    status: String,
    retries: i32,
    last_error: Option<String>,
    processed_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl TryFrom<OutboxEventRow> for OutboxEvent {
    type Error = EngineError;

    fn try_from(row: OutboxEventRow) -> EngineResult<Self> {
        Ok(OutboxEvent {
            id: uuid_from_bytes(&row.id, "outbox event")?,
            event_type: row.event_type,
            payload: row.payload,
            status: row.status.parse::<OutboxStatus>()?,
            retries: row.retries,
            last_error: row.last_error,
            processed_at: opt_utc(row.processed_at),
            created_at: utc(row.created_at),
            updated_at: utc(row.updated_at),
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
pub struct MySqlKekRepository;

#[async_trait]
impl KekRepository<MySql> for MySqlKekRepository {
    async fn create(&self, ctx: &MySqlContext, kek: &Kek) -> EngineResult<()> {
        let query = sqlx::query(
            "INSERT INTO keks (id, master_key_id, algorithm, encrypted_key, nonce, version, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id_bytes(kek.id))
        .bind(&kek.master_key_id)
        .bind(kek.algorithm.as_str())
        .bind(&kek.encrypted_key)
        .bind(&kek.nonce)
        .bind(kek.version)
        .bind(kek.created_at.naive_utc());
        my::execute(ctx, "kek", query).await?;
        Ok(())
    }

    async fn update(&self, ctx: &MySqlContext, kek: &Kek) -> EngineResult<()> {
        let query = sqlx::query(
            "UPDATE keks SET master_key_id = ?, algorithm = ?, encrypted_key = ?, nonce = ?, \
             version = ? WHERE id = ?",
        )
        .bind(&kek.master_key_id)
        .bind(kek.algorithm.as_str())
        .bind(&kek.encrypted_key)
        .bind(&kek.nonce)
        .bind(kek.version)
        .bind(id_bytes(kek.id));
        let result = my::execute(ctx, "kek", query).await?;
        affected_or_not_found(result.rows_affected(), "kek")
    }

    async fn list(&self, ctx: &MySqlContext, page: Page) -> EngineResult<Vec<Kek>> {
        let query = sqlx::query_as::<_, KekRow>(
            "SELECT id, master_key_id, algorithm, encrypted_key, nonce, version, created_at \
             FROM keks ORDER BY version DESC LIMIT ? OFFSET ?",
        )
        .bind(page.limit())
        .bind(page.offset());
        let rows = my::fetch_all(ctx, "kek", query).await?;
        rows.into_iter().map(Kek::try_from).collect()
    }
}

#[derive(Debug, Default)]
pub struct MySqlDekRepository;

#[async_trait]
impl DekRepository<MySql> for MySqlDekRepository {
    async fn create(&self, ctx: &MySqlContext, dek: &Dek) -> EngineResult<()> {
        let query = sqlx::query(
            "INSERT INTO deks (id, kek_id, algorithm, encrypted_key, nonce, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id_bytes(dek.id))
        .bind(id_bytes(dek.kek_id))
        .bind(dek.algorithm.as_str())
        .bind(&dek.encrypted_key)
        .bind(&dek.nonce)
        .bind(dek.created_at.naive_utc());
        my::execute(ctx, "dek", query).await?;
        Ok(())
    }

    async fn get(&self, ctx: &MySqlContext, id: Uuid) -> EngineResult<Dek> {
        let query = sqlx::query_as::<_, DekRow>(
            "SELECT id, kek_id, algorithm, encrypted_key, nonce, created_at \
             FROM deks WHERE id = ?",
        )
        .bind(id_bytes(id));
        let row = my::fetch_optional(ctx, "dek", query)
            .await?
            .ok_or_else(|| EngineError::not_found("dek not found"))?;
        row.try_into()
    }

    async fn update(&self, ctx: &MySqlContext, dek: &Dek) -> EngineResult<()> {
        let query = sqlx::query(
            "UPDATE deks SET kek_id = ?, algorithm = ?, encrypted_key = ?, nonce = ? \
             WHERE id = ?",
        )
        .bind(id_bytes(dek.kek_id))
        .bind(dek.algorithm.as_str())
        .bind(&dek.encrypted_key)
        .bind(&dek.nonce)
        .bind(id_bytes(dek.id));
        let result = my::execute(ctx, "dek", query).await?;
        affected_or_not_found(result.rows_affected(), "dek")
    }

    async fn get_batch_not_kek_id(
        &self,
        ctx: &MySqlContext,
        kek_id: Uuid,
        limit: i64,
    ) -> EngineResult<Vec<Dek>> {
        let query = sqlx::query_as::<_, DekRow>(
            "SELECT id, kek_id, algorithm, encrypted_key, nonce, created_at \
             FROM deks WHERE kek_id <> ? ORDER BY created_at ASC LIMIT ?",
        )
        .bind(id_bytes(kek_id))
        .bind(limit);
        let rows = my::fetch_all(ctx, "dek", query).await?;
        rows.into_iter().map(Dek::try_from).collect()
    }
}

#[derive(Debug, Default)]
pub struct MySqlSecretRepository;

#[async_trait]
impl SecretRepository<MySql> for MySqlSecretRepository {
    async fn create(&self, ctx: &MySqlContext, secret: &Secret) -> EngineResult<()> {
        let query = sqlx::query(
            "INSERT INTO secrets (id, path, version, dek_id, ciphertext, nonce, created_at, deleted_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id_bytes(secret.id))
        .bind(&secret.path)
        .bind(secret.version)
        .bind(opt_id_bytes(secret.dek_id))
        .bind(&secret.ciphertext)
        .bind(&secret.nonce)
        .bind(secret.created_at.naive_utc())
        .bind(secret.deleted_at.map(|d| d.naive_utc()));
        my::execute(ctx, "secret", query).await?;
        Ok(())
    }

    async fn get_by_path(&self, ctx: &MySqlContext, path: &str) -> EngineResult<Secret> {
        let query = sqlx::query_as::<_, SecretRow>(
            "SELECT id, path, version, dek_id, ciphertext, nonce, created_at, deleted_at \
             FROM secrets WHERE path = ? AND deleted_at IS NULL \
             ORDER BY version DESC LIMIT 1",
        )
        .bind(path);
        let row = my::fetch_optional(ctx, "secret", query)
            .await?
            .ok_or_else(|| EngineError::not_found("secret not found"))?;
        row.try_into()
    }

    async fn get_by_path_and_version(
        &self,
        ctx: &MySqlContext,
        path: &str,
        version: i64,
    ) -> EngineResult<Secret> {
        let query = sqlx::query_as::<_, SecretRow>(
            "SELECT id, path, version, dek_id, ciphertext, nonce, created_at, deleted_at \
             FROM secrets WHERE path = ? AND version = ? AND deleted_at IS NULL",
        )
        .bind(path)
        .bind(version);
        let row = my::fetch_optional(ctx, "secret", query)
            .await?
            .ok_or_else(|| EngineError::not_found("secret not found"))?;
        row.try_into()
    }

    async fn delete(&self, ctx: &MySqlContext, id: Uuid) -> EngineResult<()> {
        let query = sqlx::query(
            "UPDATE secrets SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(Utc::now().naive_utc())
        .bind(id_bytes(id));
        let result = my::execute(ctx, "secret", query).await?;
        affected_or_not_found(result.rows_affected(), "secret")
    }

    async fn list(&self, ctx: &MySqlContext, page: Page) -> EngineResult<Vec<Secret>> {
        // MySQL has no DISTINCT ON; rank versions per path and keep the
        // top row of each group.
        let query = sqlx::query_as::<_, SecretRow>(
            "SELECT id, path, version, dek_id, ciphertext, nonce, created_at, deleted_at FROM ( \
                SELECT id, path, version, dek_id, ciphertext, nonce, created_at, deleted_at, \
                       ROW_NUMBER() OVER (PARTITION BY path ORDER BY version DESC) AS rn \
                FROM secrets WHERE deleted_at IS NULL \
             ) ranked WHERE rn = 1 ORDER BY path ASC LIMIT ? OFFSET ?",
        )
        .bind(page.limit())
        .bind(page.offset());
        let rows = my::fetch_all(ctx, "secret", query).await?;
        rows.into_iter().map(Secret::try_from).collect()
    }
}

#[derive(Debug, Default)]
pub struct MySqlClientRepository;

#[async_trait]
impl ClientRepository<MySql> for MySqlClientRepository {
    async fn create(&self, ctx: &MySqlContext, client: &Client) -> EngineResult<()> {
        let query = sqlx::query(
            "INSERT INTO clients (id, secret_hash, name, is_active, policies, failed_attempts, locked_until, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id_bytes(client.id))
        .bind(&client.secret_hash)
        .bind(&client.name)
        .bind(client.is_active)
        .bind(&client.policies)
        .bind(client.failed_attempts)
        .bind(client.locked_until.map(|d| d.naive_utc()))
        .bind(client.created_at.naive_utc());
        my::execute(ctx, "client", query).await?;
        Ok(())
    }

    async fn update(&self, ctx: &MySqlContext, client: &Client) -> EngineResult<()> {
        let query = sqlx::query(
            "UPDATE clients SET secret_hash = ?, name = ?, is_active = ?, policies = ?, \
             failed_attempts = ?, locked_until = ? WHERE id = ?",
        )
        .bind(&client.secret_hash)
        .bind(&client.name)
        .bind(client.is_active)
        .bind(&client.policies)
        .bind(client.failed_attempts)
        .bind(client.locked_until.map(|d| d.naive_utc()))
        .bind(id_bytes(client.id));
        let result = my::execute(ctx, "client", query).await?;
        affected_or_not_found(result.rows_affected(), "client")
    }

    async fn get(&self, ctx: &MySqlContext, id: Uuid) -> EngineResult<Client> {
        let query = sqlx::query_as::<_, ClientRow>(
            "SELECT id, secret_hash, name, is_active, policies, failed_attempts, locked_until, created_at \
             FROM clients WHERE id = ?",
        )
        .bind(id_bytes(id));
        let row = my::fetch_optional(ctx, "client", query)
            .await?
            .ok_or_else(|| EngineError::not_found("client not found"))?;
        row.try_into()
    }

    async fn list(&self, ctx: &MySqlContext, page: Page) -> EngineResult<Vec<Client>> {
        let query = sqlx::query_as::<_, ClientRow>(
            "SELECT id, secret_hash, name, is_active, policies, failed_attempts, locked_until, created_at \
             FROM clients ORDER BY id DESC LIMIT ? OFFSET ?",
        )
        .bind(page.limit())
        .bind(page.offset());
        let rows = my::fetch_all(ctx, "client", query).await?;
        rows.into_iter().map(Client::try_from).collect()
    }

    async fn update_lock_state(
        &self,
        ctx: &MySqlContext,
        client_id: Uuid,
        failed_attempts: i32,
        locked_until: Option<DateTime<Utc>>,
    ) -> EngineResult<()> {
        let query = sqlx::query(
            "UPDATE clients SET failed_attempts = ?, locked_until = ? WHERE id = ?",
        )
        .bind(failed_attempts)
        .bind(locked_until.map(|d| d.naive_utc()))
        .bind(id_bytes(client_id));
        let result = my::execute(ctx, "client", query).await?;
        affected_or_not_found(result.rows_affected(), "client")
    }
}

#[derive(Debug, Default)]
pub struct MySqlTokenRepository;

#[async_trait]
impl TokenRepository<MySql> for MySqlTokenRepository {
    async fn create(&self, ctx: &MySqlContext, token: &Token) -> EngineResult<()> {
        let query = sqlx::query(
            "INSERT INTO tokens (id, token_hash, client_id, expires_at, revoked_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id_bytes(token.id))
        .bind(&token.token_hash)
        .bind(id_bytes(token.client_id))
        .bind(token.expires_at.naive_utc())
        .bind(token.revoked_at.map(|d| d.naive_utc()))
        .bind(token.created_at.naive_utc());
        my::execute(ctx, "token", query).await?;
        Ok(())
    }

    async fn update(&self, ctx: &MySqlContext, token: &Token) -> EngineResult<()> {
        let query = sqlx::query(
            "UPDATE tokens SET token_hash = ?, client_id = ?, expires_at = ?, revoked_at = ? \
             WHERE id = ?",
        )
        .bind(&token.token_hash)
        .bind(id_bytes(token.client_id))
        .bind(token.expires_at.naive_utc())
        .bind(token.revoked_at.map(|d| d.naive_utc()))
        .bind(id_bytes(token.id));
        let result = my::execute(ctx, "token", query).await?;
        affected_or_not_found(result.rows_affected(), "token")
    }

    async fn get(&self, ctx: &MySqlContext, id: Uuid) -> EngineResult<Token> {
        let query = sqlx::query_as::<_, TokenRow>(
            "SELECT id, token_hash, client_id, expires_at, revoked_at, created_at \
             FROM tokens WHERE id = ?",
        )
        .bind(id_bytes(id));
        let row = my::fetch_optional(ctx, "token", query)
            .await?
            .ok_or_else(|| EngineError::not_found("token not found"))?;
        row.try_into()
    }

    async fn get_by_token_hash(
        &self,
        ctx: &MySqlContext,
        token_hash: &[u8],
    ) -> EngineResult<Token> {
        let query = sqlx::query_as::<_, TokenRow>(
            "SELECT id, token_hash, client_id, expires_at, revoked_at, created_at \
             FROM tokens WHERE token_hash = ?",
        )
        .bind(token_hash);
        let row = my::fetch_optional(ctx, "token", query)
            .await?
            .ok_or_else(|| EngineError::not_found("token not found"))?;
        row.try_into()
    }
}

#[derive(Debug, Default)]
pub struct MySqlAuditLogRepository;

#[async_trait]
impl AuditLogRepository<MySql> for MySqlAuditLogRepository {
    async fn create(&self, ctx: &MySqlContext, entry: &AuditLog) -> EngineResult<()> {
        let query = sqlx::query(
            "INSERT INTO audit_logs (id, request_id, client_id, capability, path, metadata, signature, kek_id, is_signed, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id_bytes(entry.id))
        .bind(id_bytes(entry.request_id))
        .bind(id_bytes(entry.client_id))
        .bind(&entry.capability)
        .bind(&entry.path)
        .bind(&entry.metadata)
        .bind(&entry.signature)
        .bind(opt_id_bytes(entry.kek_id))
        .bind(entry.is_signed)
        .bind(entry.created_at.naive_utc());
        my::execute(ctx, "audit log", query).await?;
        Ok(())
    }

    async fn get(&self, ctx: &MySqlContext, id: Uuid) -> EngineResult<AuditLog> {
        let query = sqlx::query_as::<_, AuditLogRow>(
            "SELECT id, request_id, client_id, capability, path, metadata, signature, kek_id, is_signed, created_at \
             FROM audit_logs WHERE id = ?",
        )
        .bind(id_bytes(id));
        let row = my::fetch_optional(ctx, "audit log", query)
            .await?
            .ok_or_else(|| EngineError::not_found("audit log not found"))?;
        row.try_into()
    }

    async fn list(
        &self,
        ctx: &MySqlContext,
        page: Page,
        created_at_from: Option<DateTime<Utc>>,
        created_at_to: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<AuditLog>> {
        let mut builder = QueryBuilder::<MySql>::new(
            "SELECT id, request_id, client_id, capability, path, metadata, signature, kek_id, is_signed, created_at \
             FROM audit_logs WHERE 1 = 1",
        );
        if let Some(from) = created_at_from {
            builder.push(" AND created_at >= ").push_bind(from.naive_utc());
        }
        if let Some(to) = created_at_to {
            builder.push(" AND created_at <= ").push_bind(to.naive_utc());
        }
        builder
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows = my::fetch_all(ctx, "audit log", builder.build_query_as::<AuditLogRow>()).await?;
        rows.into_iter().map(AuditLog::try_from).collect()
    }

    async fn delete_older_than(
        &self,
        ctx: &MySqlContext,
        cutoff: DateTime<Utc>,
        dry_run: bool,
    ) -> EngineResult<u64> {
        if dry_run {
            let query = sqlx::query_as::<_, (i64,)>(
                "SELECT COUNT(*) FROM audit_logs WHERE created_at < ?",
            )
            .bind(cutoff.naive_utc());
            let (count,) = my::fetch_one(ctx, "audit log", query).await?;
            return Ok(count as u64);
        }

        let query =
            sqlx::query("DELETE FROM audit_logs WHERE created_at < ?").bind(cutoff.naive_utc());
        let result = my::execute(ctx, "audit log", query).await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Default)]
pub struct MySqlOutboxRepository;

#[async_trait]
impl OutboxRepository<MySql> for MySqlOutboxRepository {
    async fn create(&self, ctx: &MySqlContext, event: &OutboxEvent) -> EngineResult<()> {
        let query = sqlx::query(
            "INSERT INTO outbox_events (id, event_type, payload, status, retries, last_error, processed_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id_bytes(event.id))
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.status.as_str())
        .bind(event.retries)
        .bind(&event.last_error)
        .bind(event.processed_at.map(|d| d.naive_utc()))
        .bind(event.created_at.naive_utc())
        .bind(event.updated_at.naive_utc());
        my::execute(ctx, "outbox event", query).await?;
        Ok(())
    }

    async fn update(&self, ctx: &MySqlContext, event: &OutboxEvent) -> EngineResult<()> {
        let query = sqlx::query(
            "UPDATE outbox_events SET event_type = ?, payload = ?, status = ?, retries = ?, \
             last_error = ?, processed_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.status.as_str())
        .bind(event.retries)
        .bind(&event.last_error)
        .bind(event.processed_at.map(|d| d.naive_utc()))
        .bind(event.updated_at.naive_utc())
        .bind(id_bytes(event.id));
        let result = my::execute(ctx, "outbox event", query).await?;
        affected_or_not_found(result.rows_affected(), "outbox event")
    }

    async fn get(&self, ctx: &MySqlContext, id: Uuid) -> EngineResult<OutboxEvent> {
        let query = sqlx::query_as::<_, OutboxEventRow>(
            "SELECT id, event_type, payload, status, retries, last_error, processed_at, created_at, updated_at \
             FROM outbox_events WHERE id = ?",
        )
        .bind(id_bytes(id));
        let row = my::fetch_optional(ctx, "outbox event", query)
            .await?
            .ok_or_else(|| EngineError::not_found("outbox event not found"))?;
        row.try_into()
    }

    async fn get_pending_events(
        &self,
        ctx: &MySqlContext,
        limit: i64,
    ) -> EngineResult<Vec<OutboxEvent>> {
        let query = sqlx::query_as::<_, OutboxEventRow>(
            "SELECT id, event_type, payload, status, retries, last_error, processed_at, created_at, updated_at \
             FROM outbox_events WHERE status = 'pending' \
             ORDER BY created_at ASC LIMIT ? FOR UPDATE SKIP LOCKED",
        )
        .bind(limit);
        let rows = my::fetch_all(ctx, "outbox event", query).await?;
        rows.into_iter().map(OutboxEvent::try_from).collect()
    }
}

//! In-memory repository implementations.
//!
//! Mirror the SQL backends' observable semantics (soft-delete masking,
//! latest-per-path listing, unique `(path, version)`, pending-first
//! outbox order) without a database. Used to exercise use-case wiring;
//! they implement the traits for any `DB` parameter and ignore the
//! context entirely.

use crate::context::DbContext;
use crate::models::{AuditLog, Client, Dek, Kek, OutboxEvent, OutboxStatus, Secret, Token};
use crate::page::Page;
use crate::repository::{
    AuditLogRepository, ClientRepository, DekRepository, KekRepository, OutboxRepository,
    SecretRepository, TokenRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use error_common::{EngineError, EngineResult};
use sqlx::Database;
use std::sync::Mutex;
use uuid::Uuid;

fn page_slice<T: Clone>(items: &[T], page: Page) -> Vec<T> {
    items
        .iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .cloned()
        .collect()
}

#[derive(Debug, Default)]
pub struct MemoryKekRepository {
    rows: Mutex<Vec<Kek>>,
}

#[async_trait]
impl<DB: Database> KekRepository<DB> for MemoryKekRepository {
    async fn create(&self, _ctx: &DbContext<DB>, kek: &Kek) -> EngineResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|k| k.id == kek.id || k.version == kek.version) {
            return Err(EngineError::already_exists("kek already exists"));
        }
        rows.push(kek.clone());
        Ok(())
    }

    async fn update(&self, _ctx: &DbContext<DB>, kek: &Kek) -> EngineResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let existing = rows
            .iter_mut()
            .find(|k| k.id == kek.id)
            .ok_or_else(|| EngineError::not_found("kek not found"))?;
        *existing = kek.clone();
        Ok(())
    }

    async fn list(&self, _ctx: &DbContext<DB>, page: Page) -> EngineResult<Vec<Kek>> {
        let mut rows = self.rows.lock().unwrap().clone();
        rows.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(page_slice(&rows, page))
    }
}

#[derive(Debug, Default)]
pub struct MemoryDekRepository {
    rows: Mutex<Vec<Dek>>,
}

#[async_trait]
impl<DB: Database> DekRepository<DB> for MemoryDekRepository {
    async fn create(&self, _ctx: &DbContext<DB>, dek: &Dek) -> EngineResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|d| d.id == dek.id) {
            return Err(EngineError::already_exists("dek already exists"));
        }
        rows.push(dek.clone());
        Ok(())
    }

    async fn get(&self, _ctx: &DbContext<DB>, id: Uuid) -> EngineResult<Dek> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("dek not found"))
    }

    async fn update(&self, _ctx: &DbContext<DB>, dek: &Dek) -> EngineResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let existing = rows
            .iter_mut()
            .find(|d| d.id == dek.id)
            .ok_or_else(|| EngineError::not_found("dek not found"))?;
        *existing = dek.clone();
        Ok(())
    }

    async fn get_batch_not_kek_id(
        &self,
        _ctx: &DbContext<DB>,
        kek_id: Uuid,
        limit: i64,
    ) -> EngineResult<Vec<Dek>> {
        let mut rows: Vec<Dek> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.kek_id != kek_id)
            .cloned()
            .collect();
        rows.sort_by_key(|d| d.created_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

#[derive(Debug, Default)]
pub struct MemorySecretRepository {
    rows: Mutex<Vec<Secret>>,
}

#[async_trait]
impl<DB: Database> SecretRepository<DB> for MemorySecretRepository {
    async fn create(&self, _ctx: &DbContext<DB>, secret: &Secret) -> EngineResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if rows
            .iter()
            .any(|s| s.path == secret.path && s.version == secret.version)
        {
            return Err(EngineError::already_exists("secret already exists"));
        }
        rows.push(secret.clone());
        Ok(())
    }

    async fn get_by_path(&self, _ctx: &DbContext<DB>, path: &str) -> EngineResult<Secret> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.path == path && !s.is_deleted())
            .max_by_key(|s| s.version)
            .cloned()
            .ok_or_else(|| EngineError::not_found("secret not found"))
    }

    async fn get_by_path_and_version(
        &self,
        _ctx: &DbContext<DB>,
        path: &str,
        version: i64,
    ) -> EngineResult<Secret> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.path == path && s.version == version && !s.is_deleted())
            .cloned()
            .ok_or_else(|| EngineError::not_found("secret not found"))
    }

    async fn delete(&self, _ctx: &DbContext<DB>, id: Uuid) -> EngineResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let existing = rows
            .iter_mut()
            .find(|s| s.id == id && !s.is_deleted())
            .ok_or_else(|| EngineError::not_found("secret not found"))?;
        existing.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn list(&self, _ctx: &DbContext<DB>, page: Page) -> EngineResult<Vec<Secret>> {
        let rows = self.rows.lock().unwrap();
        let mut latest: Vec<Secret> = Vec::new();
        for secret in rows.iter().filter(|s| !s.is_deleted()) {
            match latest.iter_mut().find(|s| s.path == secret.path) {
                Some(existing) if existing.version < secret.version => {
                    *existing = secret.clone();
                }
                Some(_) => {}
                None => latest.push(secret.clone()),
            }
        }
        latest.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(page_slice(&latest, page))
    }
}

#[derive(Debug, Default)]
pub struct MemoryClientRepository {
    rows: Mutex<Vec<Client>>,
}

#[async_trait]
impl<DB: Database> ClientRepository<DB> for MemoryClientRepository {
    async fn create(&self, _ctx: &DbContext<DB>, client: &Client) -> EngineResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|c| c.id == client.id) {
            return Err(EngineError::already_exists("client already exists"));
        }
        rows.push(client.clone());
        Ok(())
    }

    async fn update(&self, _ctx: &DbContext<DB>, client: &Client) -> EngineResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let existing = rows
            .iter_mut()
            .find(|c| c.id == client.id)
            .ok_or_else(|| EngineError::not_found("client not found"))?;
        *existing = client.clone();
        Ok(())
    }

    async fn get(&self, _ctx: &DbContext<DB>, id: Uuid) -> EngineResult<Client> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("client not found"))
    }

    async fn list(&self, _ctx: &DbContext<DB>, page: Page) -> EngineResult<Vec<Client>> {
        let mut rows = self.rows.lock().unwrap().clone();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(page_slice(&rows, page))
    }

    async fn update_lock_state(
        &self,
        _ctx: &DbContext<DB>,
        client_id: Uuid,
        failed_attempts: i32,
        locked_until: Option<DateTime<Utc>>,
    ) -> EngineResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let existing = rows
            .iter_mut()
            .find(|c| c.id == client_id)
            .ok_or_else(|| EngineError::not_found("client not found"))?;
        existing.failed_attempts = failed_attempts;
        existing.locked_until = locked_until;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTokenRepository {
    rows: Mutex<Vec<Token>>,
}

#[async_trait]
impl<DB: Database> TokenRepository<DB> for MemoryTokenRepository {
    async fn create(&self, _ctx: &DbContext<DB>, token: &Token) -> EngineResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|t| t.id == token.id) {
            return Err(EngineError::already_exists("token already exists"));
        }
        rows.push(token.clone());
        Ok(())
    }

    async fn update(&self, _ctx: &DbContext<DB>, token: &Token) -> EngineResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let existing = rows
            .iter_mut()
            .find(|t| t.id == token.id)
            .ok_or_else(|| EngineError::not_found("token not found"))?;
        *existing = token.clone();
        Ok(())
    }

    async fn get(&self, _ctx: &DbContext<DB>, id: Uuid) -> EngineResult<Token> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("token not found"))
    }

    async fn get_by_token_hash(
        &self,
        _ctx: &DbContext<DB>,
        token_hash: &[u8],
    ) -> EngineResult<Token> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.token_hash == token_hash)
            .cloned()
            .ok_or_else(|| EngineError::not_found("token not found"))
    }
}

#[derive(Debug, Default)]
pub struct MemoryAuditLogRepository {
    rows: Mutex<Vec<AuditLog>>,
}

impl MemoryAuditLogRepository {
    /// Direct row access for assertions.
    pub fn snapshot(&self) -> Vec<AuditLog> {
        self.rows.lock().unwrap().clone()
    }

    /// Swap a stored row in place, bypassing the append-only contract.
    /// Exists so tamper-detection tests can corrupt storage.
    pub fn replace(&self, entry: &AuditLog) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(existing) = rows.iter_mut().find(|a| a.id == entry.id) {
            *existing = entry.clone();
        }
    }
}

#[async_trait]
impl<DB: Database> AuditLogRepository<DB> for MemoryAuditLogRepository {
    async fn create(&self, _ctx: &DbContext<DB>, entry: &AuditLog) -> EngineResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|a| a.id == entry.id) {
            return Err(EngineError::already_exists("audit log already exists"));
        }
        rows.push(entry.clone());
        Ok(())
    }

    async fn get(&self, _ctx: &DbContext<DB>, id: Uuid) -> EngineResult<AuditLog> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("audit log not found"))
    }

    async fn list(
        &self,
        _ctx: &DbContext<DB>,
        page: Page,
        created_at_from: Option<DateTime<Utc>>,
        created_at_to: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<AuditLog>> {
        let mut rows: Vec<AuditLog> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|a| created_at_from.map_or(true, |from| a.created_at >= from))
            .filter(|a| created_at_to.map_or(true, |to| a.created_at <= to))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page_slice(&rows, page))
    }

    async fn delete_older_than(
        &self,
        _ctx: &DbContext<DB>,
        cutoff: DateTime<Utc>,
        dry_run: bool,
    ) -> EngineResult<u64> {
        let mut rows = self.rows.lock().unwrap();
        let affected = rows.iter().filter(|a| a.created_at < cutoff).count() as u64;
        if !dry_run {
            rows.retain(|a| a.created_at >= cutoff);
        }
        Ok(affected)
    }
}

#[derive(Debug, Default)]
pub struct MemoryOutboxRepository {
    rows: Mutex<Vec<OutboxEvent>>,
}

impl MemoryOutboxRepository {
    pub fn snapshot(&self) -> Vec<OutboxEvent> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl<DB: Database> OutboxRepository<DB> for MemoryOutboxRepository {
    async fn create(&self, _ctx: &DbContext<DB>, event: &OutboxEvent) -> EngineResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|e| e.id == event.id) {
            return Err(EngineError::already_exists("outbox event already exists"));
        }
        rows.push(event.clone());
        Ok(())
    }

    async fn update(&self, _ctx: &DbContext<DB>, event: &OutboxEvent) -> EngineResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let existing = rows
            .iter_mut()
            .find(|e| e.id == event.id)
            .ok_or_else(|| EngineError::not_found("outbox event not found"))?;
        *existing = event.clone();
        Ok(())
    }

    async fn get(&self, _ctx: &DbContext<DB>, id: Uuid) -> EngineResult<OutboxEvent> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("outbox event not found"))
    }

    async fn get_pending_events(
        &self,
        _ctx: &DbContext<DB>,
        limit: i64,
    ) -> EngineResult<Vec<OutboxEvent>> {
        let mut rows: Vec<OutboxEvent> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.created_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

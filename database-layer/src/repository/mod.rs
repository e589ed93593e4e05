//! Repository traits: the abstract capabilities the use-case layer
//! depends on. Two concrete backends exist (`postgres`, `mysql`) plus
//! an in-memory set behind the `memory` feature. All methods take a
//! context and none opens its own transaction; single-row fetch misses
//! are `NotFound`, never a nil-value success.

use crate::context::DbContext;
use crate::models::{AuditLog, Client, Dek, Kek, OutboxEvent, Secret, Token};
use crate::page::Page;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use error_common::EngineResult;
use sqlx::Database;
use uuid::Uuid;

pub mod mysql;
pub mod postgres;

#[async_trait]
pub trait KekRepository<DB: Database>: Send + Sync {
    async fn create(&self, ctx: &DbContext<DB>, kek: &Kek) -> EngineResult<()>;
    async fn update(&self, ctx: &DbContext<DB>, kek: &Kek) -> EngineResult<()>;
    /// Ordered by `version DESC`, so the first row of the first page is
    /// the active KEK.
    async fn list(&self, ctx: &DbContext<DB>, page: Page) -> EngineResult<Vec<Kek>>;
}

#[async_trait]
pub trait DekRepository<DB: Database>: Send + Sync {
    async fn create(&self, ctx: &DbContext<DB>, dek: &Dek) -> EngineResult<()>;
    async fn get(&self, ctx: &DbContext<DB>, id: Uuid) -> EngineResult<Dek>;
    async fn update(&self, ctx: &DbContext<DB>, dek: &Dek) -> EngineResult<()>;
    /// DEKs not wrapped by `kek_id`, oldest first. Feeds the re-wrap
    /// batch.
    async fn get_batch_not_kek_id(
        &self,
        ctx: &DbContext<DB>,
        kek_id: Uuid,
        limit: i64,
    ) -> EngineResult<Vec<Dek>>;
}

#[async_trait]
pub trait SecretRepository<DB: Database>: Send + Sync {
    async fn create(&self, ctx: &DbContext<DB>, secret: &Secret) -> EngineResult<()>;
    /// The live row with the maximum version for `path`.
    async fn get_by_path(&self, ctx: &DbContext<DB>, path: &str) -> EngineResult<Secret>;
    async fn get_by_path_and_version(
        &self,
        ctx: &DbContext<DB>,
        path: &str,
        version: i64,
    ) -> EngineResult<Secret>;
    /// Soft delete: sets `deleted_at`. Prior versions are untouched.
    async fn delete(&self, ctx: &DbContext<DB>, id: Uuid) -> EngineResult<()>;
    /// Latest live version per path, ordered `path ASC`.
    async fn list(&self, ctx: &DbContext<DB>, page: Page) -> EngineResult<Vec<Secret>>;
}

#[async_trait]
pub trait ClientRepository<DB: Database>: Send + Sync {
    async fn create(&self, ctx: &DbContext<DB>, client: &Client) -> EngineResult<()>;
    async fn update(&self, ctx: &DbContext<DB>, client: &Client) -> EngineResult<()>;
    async fn get(&self, ctx: &DbContext<DB>, id: Uuid) -> EngineResult<Client>;
    async fn list(&self, ctx: &DbContext<DB>, page: Page) -> EngineResult<Vec<Client>>;
    /// Single-row atomic update of the lockout counters.
    async fn update_lock_state(
        &self,
        ctx: &DbContext<DB>,
        client_id: Uuid,
        failed_attempts: i32,
        locked_until: Option<DateTime<Utc>>,
    ) -> EngineResult<()>;
}

#[async_trait]
pub trait TokenRepository<DB: Database>: Send + Sync {
    async fn create(&self, ctx: &DbContext<DB>, token: &Token) -> EngineResult<()>;
    async fn update(&self, ctx: &DbContext<DB>, token: &Token) -> EngineResult<()>;
    async fn get(&self, ctx: &DbContext<DB>, id: Uuid) -> EngineResult<Token>;
    async fn get_by_token_hash(
        &self,
        ctx: &DbContext<DB>,
        token_hash: &[u8],
    ) -> EngineResult<Token>;
}

#[async_trait]
pub trait AuditLogRepository<DB: Database>: Send + Sync {
    async fn create(&self, ctx: &DbContext<DB>, entry: &AuditLog) -> EngineResult<()>;
    async fn get(&self, ctx: &DbContext<DB>, id: Uuid) -> EngineResult<AuditLog>;
    /// Ordered `created_at DESC`, optionally bounded to a time range.
    async fn list(
        &self,
        ctx: &DbContext<DB>,
        page: Page,
        created_at_from: Option<DateTime<Utc>>,
        created_at_to: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<AuditLog>>;
    /// Retention pruning. With `dry_run` the affected count is computed
    /// without mutation.
    async fn delete_older_than(
        &self,
        ctx: &DbContext<DB>,
        cutoff: DateTime<Utc>,
        dry_run: bool,
    ) -> EngineResult<u64>;
}

#[async_trait]
pub trait OutboxRepository<DB: Database>: Send + Sync {
    async fn create(&self, ctx: &DbContext<DB>, event: &OutboxEvent) -> EngineResult<()>;
    async fn update(&self, ctx: &DbContext<DB>, event: &OutboxEvent) -> EngineResult<()>;
    async fn get(&self, ctx: &DbContext<DB>, id: Uuid) -> EngineResult<OutboxEvent>;
    /// Oldest pending rows, locked with `FOR UPDATE SKIP LOCKED` so
    /// concurrent workers claim disjoint batches. Call inside `with_tx`;
    /// outside a transaction the locks are meaningless.
    async fn get_pending_events(
        &self,
        ctx: &DbContext<DB>,
        limit: i64,
    ) -> EngineResult<Vec<OutboxEvent>>;
}

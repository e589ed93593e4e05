use audit_engine::{capability, AuditActor, AuditService};
use crypto::constant_time::ct_eq;
use crypto::{create_kek, Algorithm, Kek, KekChain, KekChainHandle, MasterKeyProvider};
use database_layer::repository::KekRepository;
use database_layer::{with_tx, DbContext, Page};
use error_common::{EngineError, EngineResult};
use sqlx::Database;
use std::sync::Arc;
use std::time::Instant;
use telemetry::{MetricsSink, OperationStatus};
use tracing::{error, info};

const DOMAIN: &str = "kek";

/// KEK lifecycle: startup bootstrap, chain loading, and administrative
/// rotation. Rotations publish a whole new chain; readers holding the
/// previous snapshot stay consistent.
pub struct KeyManager<DB: Database> {
    keks: Arc<dyn KekRepository<DB>>,
    master: Arc<dyn MasterKeyProvider>,
    chain: Arc<KekChainHandle>,
    audit: Arc<AuditService<DB>>,
    metrics: Arc<dyn MetricsSink>,
    algorithm: Algorithm,
}

impl<DB: Database> KeyManager<DB> {
    pub fn new(
        keks: Arc<dyn KekRepository<DB>>,
        master: Arc<dyn MasterKeyProvider>,
        chain: Arc<KekChainHandle>,
        audit: Arc<AuditService<DB>>,
        metrics: Arc<dyn MetricsSink>,
        algorithm: Algorithm,
    ) -> Self {
        Self {
            keks,
            master,
            chain,
            audit,
            metrics,
            algorithm,
        }
    }

    fn observe<T>(&self, op: &str, start: Instant, result: &EngineResult<T>) {
        let status = OperationStatus::from_result(result);
        self.metrics.record_operation(DOMAIN, op, status);
        self.metrics
            .record_duration(DOMAIN, op, start.elapsed(), status);
    }

    async fn load_all_keks(&self, ctx: &DbContext<DB>) -> EngineResult<Vec<Kek>> {
        let mut all = Vec::new();
        let mut offset: i64 = 0;
        loop {
            let page = Page::new(offset, Page::MAX_LIMIT)?;
            let batch = self.keks.list(ctx, page).await?;
            let batch_len = batch.len() as i64;
            all.extend(batch);
            if batch_len < Page::MAX_LIMIT {
                return Ok(all);
            }
            offset += batch_len;
        }
    }

    /// Unwrap every KEK row and publish a fresh chain. Any unwrap
    /// failure here is fatal at startup: the process must not serve
    /// with a partially decryptable key hierarchy.
    pub async fn load_chain(&self, ctx: &DbContext<DB>) -> EngineResult<()> {
        let start = Instant::now();
        let result = self.load_chain_inner(ctx).await;
        self.observe("load_chain", start, &result);
        result
    }

    async fn load_chain_inner(&self, ctx: &DbContext<DB>) -> EngineResult<()> {
        let keks = self.load_all_keks(ctx).await?;
        let count = keks.len();
        let chain = KekChain::build(self.master.as_ref(), &keks).map_err(|err| {
            error!(error = %err, "failed to unwrap kek chain");
            EngineError::from(err)
        })?;
        self.chain.store(chain);
        info!(keks = count, "kek chain loaded");
        Ok(())
    }

    /// Startup path: sanity-check the master provider, create the first
    /// KEK if the table is empty, then load the chain. Errors here are
    /// fatal; the binary exits non-zero.
    pub async fn initialize(&self, ctx: &DbContext<DB>) -> EngineResult<()> {
        let (current_id, current_key) = self.master.current().map_err(EngineError::from)?;
        let looked_up = self.master.get(&current_id).map_err(|err| {
            error!(master_key_id = %current_id, "master provider cannot resolve its own current id");
            EngineError::from(err)
        })?;
        if !ct_eq(&*looked_up, &*current_key) {
            error!(master_key_id = %current_id, "master provider returned mismatching material for current id");
            return Err(EngineError::internal(
                "master key provider is inconsistent for its current id",
            ));
        }

        self.ensure_kek(ctx).await?;
        self.load_chain(ctx).await
    }

    /// First-boot bootstrap: mint KEK version 1 when none exists.
    pub async fn ensure_kek(&self, ctx: &DbContext<DB>) -> EngineResult<()> {
        let existing = self.keks.list(ctx, Page::new(0, 1)?).await?;
        if !existing.is_empty() {
            return Ok(());
        }

        info!("no kek present, minting version 1");
        self.mint_kek(ctx, &AuditActor::system(), 1).await?;
        Ok(())
    }

    /// Administrative rotation: mint a new KEK at `max(version) + 1`,
    /// audit it, and republish the chain. Existing DEKs keep their old
    /// wrapping until the re-wrap batch reaches them.
    pub async fn rotate_kek(
        &self,
        ctx: &DbContext<DB>,
        actor: &AuditActor,
    ) -> EngineResult<Kek> {
        let start = Instant::now();
        let result = self.rotate_kek_inner(ctx, actor).await;
        self.observe("rotate", start, &result);
        result
    }

    async fn rotate_kek_inner(&self, ctx: &DbContext<DB>, actor: &AuditActor) -> EngineResult<Kek> {
        let newest = self.keks.list(ctx, Page::new(0, 1)?).await?;
        let next_version = newest.first().map_or(1, |kek| kek.version + 1);

        let kek = self.mint_kek(ctx, actor, next_version).await?;
        info!(kek_id = %kek.id, version = kek.version, "kek rotated");
        Ok(kek)
    }

    async fn mint_kek(
        &self,
        ctx: &DbContext<DB>,
        actor: &AuditActor,
        version: i64,
    ) -> EngineResult<Kek> {
        let (master_id, master_material) = self.master.current().map_err(EngineError::from)?;
        let (kek, _material) =
            create_kek(&master_id, &master_material, self.algorithm, version)
                .map_err(EngineError::from)?;

        let persisted = with_tx(ctx, |tx_ctx| async move {
            self.keks.create(&tx_ctx, &kek).await?;
            self.audit
                .append(
                    &tx_ctx,
                    actor,
                    capability::KEK_ROTATE,
                    "",
                    Some(serde_json::json!({
                        "kek_id": kek.id,
                        "version": kek.version,
                    })),
                )
                .await?;
            Ok(kek)
        })
        .await?;

        // Publish after commit so a rolled-back KEK never enters the
        // chain.
        self.load_chain(ctx).await?;
        Ok(persisted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto::{generate_key, StaticMasterKeys};
    use database_layer::memory::{MemoryAuditLogRepository, MemoryKekRepository};
    use database_layer::PgContext;
    use telemetry::NoopMetrics;

    fn manager() -> (KeyManager<sqlx::Postgres>, Arc<KekChainHandle>, PgContext) {
        let chain = Arc::new(KekChainHandle::default());
        let audit = Arc::new(AuditService::new(
            Arc::new(MemoryAuditLogRepository::default()),
            chain.clone(),
            Arc::new(NoopMetrics),
        ));
        let manager = KeyManager::new(
            Arc::new(MemoryKekRepository::default()),
            Arc::new(StaticMasterKeys::single("m1", generate_key())),
            chain.clone(),
            audit,
            Arc::new(NoopMetrics),
            Algorithm::Aes256Gcm,
        );
        (manager, chain, PgContext::detached())
    }

    #[tokio::test]
    async fn test_initialize_bootstraps_first_kek() {
        let (manager, chain, ctx) = manager();
        manager.initialize(&ctx).await.unwrap();

        let loaded = chain.load();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.active_id().is_some());

        // A second initialize does not mint another KEK.
        manager.initialize(&ctx).await.unwrap();
        assert_eq!(chain.load().len(), 1);
    }

    #[tokio::test]
    async fn test_rotation_bumps_version_and_activates() {
        let (manager, chain, ctx) = manager();
        manager.initialize(&ctx).await.unwrap();
        let first_active = chain.load().active_id().unwrap();

        let rotated = manager
            .rotate_kek(&ctx, &AuditActor::system())
            .await
            .unwrap();
        assert_eq!(rotated.version, 2);

        let loaded = chain.load();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.active_id(), Some(rotated.id));
        assert_ne!(loaded.active_id(), Some(first_active));
        // The retired KEK stays resolvable for old DEKs.
        assert!(loaded.contains(first_active));
    }
}

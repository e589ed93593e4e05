use crypto::{rewrap_dek, KekChainHandle};
use database_layer::repository::DekRepository;
use database_layer::{with_tx, DbContext};
use error_common::{EngineError, EngineResult};
use serde::Deserialize;
use sqlx::Database;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::{MetricsSink, OperationStatus};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DOMAIN: &str = "rewrap";

#[derive(Debug, Clone, Deserialize)]
pub struct RewrapConfig {
    /// Wall-clock period between batch attempts.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Upper bound on DEKs re-wrapped per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_batch_size() -> i64 {
    100
}

impl Default for RewrapConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            batch_size: default_batch_size(),
        }
    }
}

impl RewrapConfig {
    /// Read `REWRAP_INTERVAL_SECS` and `REWRAP_BATCH_SIZE` from the
    /// environment, defaulting anything unset.
    pub fn from_env() -> EngineResult<Self> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("REWRAP_INTERVAL_SECS") {
            config.interval_secs = raw.parse().map_err(|_| {
                EngineError::validation("REWRAP_INTERVAL_SECS must be an integer")
            })?;
        }
        if let Ok(raw) = std::env::var("REWRAP_BATCH_SIZE") {
            config.batch_size = raw
                .parse()
                .map_err(|_| EngineError::validation("REWRAP_BATCH_SIZE must be an integer"))?;
        }
        Ok(config)
    }
}

/// Background re-wrap of DEKs onto the active KEK.
///
/// Finds DEKs whose `kek_id` is not the active one, oldest first,
/// unwraps each with its chain-resident old KEK and re-encrypts under
/// the active KEK. Secret ciphertexts are untouched; they are bound to
/// the DEK, not the KEK. Errors abort the batch and are idempotent on
/// retry: a partially re-wrapped DEK is simply skipped next pass.
pub struct RewrapWorker<DB: Database> {
    deks: Arc<dyn DekRepository<DB>>,
    chain: Arc<KekChainHandle>,
    metrics: Arc<dyn MetricsSink>,
    config: RewrapConfig,
}

impl<DB: Database> RewrapWorker<DB> {
    pub fn new(
        deks: Arc<dyn DekRepository<DB>>,
        chain: Arc<KekChainHandle>,
        metrics: Arc<dyn MetricsSink>,
        config: RewrapConfig,
    ) -> Self {
        Self {
            deks,
            chain,
            metrics,
            config,
        }
    }

    /// One batch. Returns how many DEKs were re-wrapped; repeated calls
    /// converge to 0 once everything sits under the active KEK.
    pub async fn rewrap_batch(&self, ctx: &DbContext<DB>) -> EngineResult<usize> {
        let start = Instant::now();
        let result = self.rewrap_batch_inner(ctx).await;
        let status = OperationStatus::from_result(&result);
        self.metrics.record_operation(DOMAIN, "batch", status);
        self.metrics
            .record_duration(DOMAIN, "batch", start.elapsed(), status);
        result
    }

    async fn rewrap_batch_inner(&self, ctx: &DbContext<DB>) -> EngineResult<usize> {
        let chain = self.chain.load();
        let (active_id, active_material) = chain.active().map_err(EngineError::from)?;

        let batch = self
            .deks
            .get_batch_not_kek_id(ctx, active_id, self.config.batch_size)
            .await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let chain_ref = &*chain;
        let rewrapped = with_tx(ctx, |tx_ctx| async move {
            let mut count = 0usize;
            for mut dek in batch {
                let old_material = chain_ref.get(dek.kek_id).map_err(EngineError::from)?;
                rewrap_dek(&mut dek, old_material, active_id, active_material)
                    .map_err(EngineError::from)?;
                self.deks.update(&tx_ctx, &dek).await?;
                count += 1;
            }
            Ok(count)
        })
        .await?;

        info!(rewrapped, "dek rewrap batch complete");
        Ok(rewrapped)
    }

    /// Long-running loop: one batch per interval, until cancelled. An
    /// in-flight batch completes its transaction before the loop
    /// returns.
    pub async fn run(&self, ctx: DbContext<DB>, cancel: CancellationToken) -> EngineResult<()> {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup load
        // stays flat.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("rewrap worker cancelled");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            if cancel.is_cancelled() {
                info!("rewrap worker cancelled");
                return Ok(());
            }

            match self.rewrap_batch(&ctx).await {
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "rewrap batch failed, retrying next interval");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_engine::{AuditActor, AuditService};
    use crate::keys::KeyManager;
    use crate::service::SecretService;
    use crypto::{Algorithm, StaticMasterKeys};
    use database_layer::memory::{
        MemoryAuditLogRepository, MemoryDekRepository, MemoryKekRepository,
        MemorySecretRepository,
    };
    use database_layer::PgContext;
    use telemetry::NoopMetrics;

    struct Harness {
        keys: KeyManager<sqlx::Postgres>,
        secrets: SecretService<sqlx::Postgres>,
        worker: RewrapWorker<sqlx::Postgres>,
        deks: Arc<MemoryDekRepository>,
        chain: Arc<KekChainHandle>,
        ctx: PgContext,
    }

    fn harness() -> Harness {
        let chain = Arc::new(KekChainHandle::default());
        let audit = Arc::new(AuditService::new(
            Arc::new(MemoryAuditLogRepository::default()),
            chain.clone(),
            Arc::new(NoopMetrics),
        ));
        let deks = Arc::new(MemoryDekRepository::default());

        let keys = KeyManager::new(
            Arc::new(MemoryKekRepository::default()),
            Arc::new(StaticMasterKeys::single("m1", crypto::generate_key())),
            chain.clone(),
            audit.clone(),
            Arc::new(NoopMetrics),
            Algorithm::Aes256Gcm,
        );
        let secrets = SecretService::new(
            Arc::new(MemorySecretRepository::default()),
            deks.clone(),
            chain.clone(),
            audit,
            Arc::new(NoopMetrics),
            Algorithm::Aes256Gcm,
        );
        let worker = RewrapWorker::new(
            deks.clone(),
            chain.clone(),
            Arc::new(NoopMetrics),
            RewrapConfig::default(),
        );

        Harness {
            keys,
            secrets,
            worker,
            deks,
            chain,
            ctx: PgContext::detached(),
        }
    }

    #[tokio::test]
    async fn test_rotation_then_rewrap_preserves_plaintexts() {
        let h = harness();
        let actor = AuditActor::system();
        h.keys.initialize(&h.ctx).await.unwrap();

        for path in ["/a", "/b", "/c"] {
            h.secrets
                .create_or_update(&h.ctx, &actor, path, path.as_bytes())
                .await
                .unwrap();
        }

        let rotated = h.keys.rotate_kek(&h.ctx, &actor).await.unwrap();

        // All three DEKs still sit under the retired KEK.
        let stale = h
            .deks
            .get_batch_not_kek_id(&h.ctx, rotated.id, 100)
            .await
            .unwrap();
        assert_eq!(stale.len(), 3);

        let rewrapped = h.worker.rewrap_batch(&h.ctx).await.unwrap();
        assert_eq!(rewrapped, 3);

        // Every DEK now names the active KEK and reads still decrypt.
        let stale = h
            .deks
            .get_batch_not_kek_id(&h.ctx, rotated.id, 100)
            .await
            .unwrap();
        assert!(stale.is_empty());

        for path in ["/a", "/b", "/c"] {
            let read = h.secrets.get(&h.ctx, &actor, path).await.unwrap();
            assert_eq!(read.plaintext.as_slice(), path.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_rewrap_is_idempotent() {
        let h = harness();
        let actor = AuditActor::system();
        h.keys.initialize(&h.ctx).await.unwrap();

        h.secrets
            .create_or_update(&h.ctx, &actor, "/a", b"v")
            .await
            .unwrap();
        h.keys.rotate_kek(&h.ctx, &actor).await.unwrap();

        assert_eq!(h.worker.rewrap_batch(&h.ctx).await.unwrap(), 1);
        // Converged: further passes touch nothing.
        assert_eq!(h.worker.rewrap_batch(&h.ctx).await.unwrap(), 0);
        assert_eq!(h.worker.rewrap_batch(&h.ctx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rewrap_without_active_kek_fails() {
        let h = harness();
        let err = h.worker.rewrap_batch(&h.ctx).await.unwrap_err();
        assert_eq!(err.kind(), error_common::ErrorKind::KekNotFound);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let h = harness();
        h.keys.initialize(&h.ctx).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = {
            let worker = RewrapWorker::new(
                h.deks.clone(),
                h.chain.clone(),
                Arc::new(NoopMetrics),
                RewrapConfig {
                    interval_secs: 3600,
                    batch_size: 10,
                },
            );
            let ctx = h.ctx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(ctx, cancel).await })
        };

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}

use audit_engine::{capability, AuditActor, AuditService};
use chrono::Utc;
use crypto::{create_dek, decrypt_dek, Aead, Algorithm, KekChainHandle};
use database_layer::repository::{DekRepository, OutboxRepository, SecretRepository};
use database_layer::{with_tx, DbContext, OutboxEvent, Page, Secret};
use error_common::{EngineError, EngineResult, ErrorKind};
use sqlx::Database;
use std::sync::Arc;
use std::time::Instant;
use telemetry::{MetricsSink, OperationStatus};
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroizing;

const DOMAIN: &str = "secret";

/// A read result: the persisted row plus the plaintext it decrypts to.
/// The plaintext buffer wipes itself on drop; callers render it and let
/// it go out of scope, never copying into non-zeroizing storage.
pub struct DecryptedSecret {
    pub secret: Secret,
    pub plaintext: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for DecryptedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedSecret")
            .field("secret", &self.secret)
            .field("plaintext", &"<redacted>")
            .finish()
    }
}

/// The secret lifecycle use-case: encrypt-on-write with a fresh DEK per
/// version, decrypt-on-read through the KEK chain, soft delete, and
/// metadata listing. Every mutation and read runs inside one ambient
/// transaction together with its audit row.
pub struct SecretService<DB: Database> {
    secrets: Arc<dyn SecretRepository<DB>>,
    deks: Arc<dyn DekRepository<DB>>,
    chain: Arc<KekChainHandle>,
    audit: Arc<AuditService<DB>>,
    metrics: Arc<dyn MetricsSink>,
    outbox: Option<Arc<dyn OutboxRepository<DB>>>,
    algorithm: Algorithm,
}

impl<DB: Database> SecretService<DB> {
    pub fn new(
        secrets: Arc<dyn SecretRepository<DB>>,
        deks: Arc<dyn DekRepository<DB>>,
        chain: Arc<KekChainHandle>,
        audit: Arc<AuditService<DB>>,
        metrics: Arc<dyn MetricsSink>,
        algorithm: Algorithm,
    ) -> Self {
        Self {
            secrets,
            deks,
            chain,
            audit,
            metrics,
            outbox: None,
            algorithm,
        }
    }

    /// Emit `secret.created` / `secret.deleted` outbox events inside
    /// the same transaction as the mutation.
    pub fn with_outbox(mut self, outbox: Arc<dyn OutboxRepository<DB>>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    fn observe<T>(&self, op: &str, start: Instant, result: &EngineResult<T>) {
        let status = OperationStatus::from_result(result);
        self.metrics.record_operation(DOMAIN, op, status);
        self.metrics
            .record_duration(DOMAIN, op, start.elapsed(), status);
    }

    async fn emit_event(
        &self,
        ctx: &DbContext<DB>,
        event_type: &str,
        path: &str,
        version: i64,
    ) -> EngineResult<()> {
        if let Some(outbox) = &self.outbox {
            let payload = serde_json::to_vec(&serde_json::json!({
                "path": path,
                "version": version,
            }))
            .map_err(|e| EngineError::internal("failed to encode event payload").with_source(e))?;
            outbox.create(ctx, &OutboxEvent::new(event_type, payload)).await?;
        }
        Ok(())
    }

    /// Write a new immutable version of `path`.
    ///
    /// A fresh DEK is minted under the active KEK for every version, so
    /// compromise of one DEK reveals one version, not a path's history.
    /// Concurrent writers race on the `(path, version)` constraint; the
    /// loser observes `AlreadyExists` and retries by recomputing the
    /// next version.
    pub async fn create_or_update(
        &self,
        ctx: &DbContext<DB>,
        actor: &AuditActor,
        path: &str,
        value: &[u8],
    ) -> EngineResult<Secret> {
        let start = Instant::now();
        let result = self.create_or_update_inner(ctx, actor, path, value).await;
        self.observe("create_or_update", start, &result);
        result
    }

    async fn create_or_update_inner(
        &self,
        ctx: &DbContext<DB>,
        actor: &AuditActor,
        path: &str,
        value: &[u8],
    ) -> EngineResult<Secret> {
        let chain = self.chain.load();
        let (kek_id, kek_material) = chain.active().map_err(EngineError::from)?;

        let next_version = match self.secrets.get_by_path(ctx, path).await {
            Ok(prior) => prior.version + 1,
            Err(err) if err.kind() == ErrorKind::NotFound => 1,
            Err(err) => return Err(err),
        };

        let secret = with_tx(ctx, |tx_ctx| async move {
            let (dek, dek_material) =
                create_dek(kek_id, kek_material, self.algorithm).map_err(EngineError::from)?;
            self.deks.create(&tx_ctx, &dek).await?;

            let aead =
                Aead::new(dek.algorithm, dek_material.as_ref()).map_err(EngineError::from)?;
            let (ciphertext, nonce) = aead.encrypt(value, None).map_err(EngineError::from)?;
            // The DEK plaintext is done with; wipe it before any
            // further awaits.
            drop(dek_material);

            let secret = Secret {
                id: Uuid::now_v7(),
                path: path.to_string(),
                version: next_version,
                dek_id: Some(dek.id),
                ciphertext,
                nonce: nonce.to_vec(),
                created_at: Utc::now(),
                deleted_at: None,
            };
            self.secrets.create(&tx_ctx, &secret).await?;

            self.audit
                .append(
                    &tx_ctx,
                    actor,
                    capability::SECRET_WRITE,
                    path,
                    Some(serde_json::json!({"version": next_version})),
                )
                .await?;
            self.emit_event(&tx_ctx, "secret.created", path, next_version)
                .await?;
            Ok(secret)
        })
        .await?;

        info!(path = %path, version = secret.version, "secret written");
        Ok(secret)
    }

    /// Read the latest live version of `path` and decrypt it.
    pub async fn get(
        &self,
        ctx: &DbContext<DB>,
        actor: &AuditActor,
        path: &str,
    ) -> EngineResult<DecryptedSecret> {
        let start = Instant::now();
        let result = with_tx(ctx, |tx_ctx| async move {
            let secret = self.secrets.get_by_path(&tx_ctx, path).await?;
            self.decrypt_and_audit(&tx_ctx, actor, secret).await
        })
        .await;
        self.observe("get", start, &result);
        result
    }

    /// Read an exact live version of `path` and decrypt it.
    pub async fn get_by_version(
        &self,
        ctx: &DbContext<DB>,
        actor: &AuditActor,
        path: &str,
        version: i64,
    ) -> EngineResult<DecryptedSecret> {
        let start = Instant::now();
        let result = with_tx(ctx, |tx_ctx| async move {
            let secret = self
                .secrets
                .get_by_path_and_version(&tx_ctx, path, version)
                .await?;
            self.decrypt_and_audit(&tx_ctx, actor, secret).await
        })
        .await;
        self.observe("get_by_version", start, &result);
        result
    }

    async fn decrypt_and_audit(
        &self,
        tx_ctx: &DbContext<DB>,
        actor: &AuditActor,
        secret: Secret,
    ) -> EngineResult<DecryptedSecret> {
        let dek_id = secret
            .dek_id
            .ok_or_else(|| EngineError::dek_not_found("secret has no dek"))?;
        let dek = self.deks.get(tx_ctx, dek_id).await?;

        let chain = self.chain.load();
        let kek_material = chain.get(dek.kek_id).map_err(EngineError::from)?;
        let dek_material = decrypt_dek(&dek, kek_material).map_err(EngineError::from)?;

        let aead = Aead::new(dek.algorithm, dek_material.as_ref()).map_err(EngineError::from)?;
        let plaintext = aead
            .decrypt(&secret.ciphertext, &secret.nonce, None)
            .map_err(EngineError::from)?;
        drop(dek_material);

        self.audit
            .append(
                tx_ctx,
                actor,
                capability::SECRET_READ,
                &secret.path,
                Some(serde_json::json!({"version": secret.version})),
            )
            .await?;

        debug!(path = %secret.path, version = secret.version, "secret decrypted");
        Ok(DecryptedSecret { secret, plaintext })
    }

    /// Tombstone the latest live version of `path`. Prior versions are
    /// untouched; deleting a non-existent path is `NotFound`.
    pub async fn delete(
        &self,
        ctx: &DbContext<DB>,
        actor: &AuditActor,
        path: &str,
    ) -> EngineResult<()> {
        let start = Instant::now();
        let result = with_tx(ctx, |tx_ctx| async move {
            let secret = self.secrets.get_by_path(&tx_ctx, path).await?;
            self.secrets.delete(&tx_ctx, secret.id).await?;
            self.audit
                .append(
                    &tx_ctx,
                    actor,
                    capability::SECRET_DELETE,
                    path,
                    Some(serde_json::json!({"version": secret.version})),
                )
                .await?;
            self.emit_event(&tx_ctx, "secret.deleted", path, secret.version)
                .await?;
            Ok(())
        })
        .await;
        self.observe("delete", start, &result);
        result
    }

    /// Metadata-only listing: the latest live version per path, no
    /// decryption.
    pub async fn list(&self, ctx: &DbContext<DB>, page: Page) -> EngineResult<Vec<Secret>> {
        let start = Instant::now();
        let result = self.secrets.list(ctx, page).await;
        self.observe("list", start, &result);
        result
    }

    /// Integrity sweep: every listed live secret must resolve its DEK.
    /// A miss means on-disk corruption and is fatal to the process.
    pub async fn verify_sweep(&self, ctx: &DbContext<DB>) -> EngineResult<u64> {
        let start = Instant::now();
        let result = self.verify_sweep_inner(ctx).await;
        self.observe("verify_sweep", start, &result);
        result
    }

    async fn verify_sweep_inner(&self, ctx: &DbContext<DB>) -> EngineResult<u64> {
        let mut checked: u64 = 0;
        let mut offset: i64 = 0;
        loop {
            let page = Page::new(offset, Page::MAX_LIMIT)?;
            let batch = self.secrets.list(ctx, page).await?;
            if batch.is_empty() {
                return Ok(checked);
            }
            let batch_len = batch.len() as i64;
            for secret in batch {
                if let Some(dek_id) = secret.dek_id {
                    match self.deks.get(ctx, dek_id).await {
                        Ok(_) => {}
                        Err(err) if err.kind() == ErrorKind::NotFound => {
                            return Err(EngineError::dek_not_found(format!(
                                "secret {} references a missing dek",
                                secret.id
                            )));
                        }
                        Err(err) => return Err(err),
                    }
                }
                checked += 1;
            }
            offset += batch_len;
        }
    }
}

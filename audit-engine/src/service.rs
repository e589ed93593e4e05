use crate::entry::AuditActor;
use crate::signature::{sign, verify};
use chrono::{DateTime, Utc};
use crypto::KekChainHandle;
use database_layer::repository::AuditLogRepository;
use database_layer::{AuditLog, DbContext, Page};
use error_common::{EngineError, EngineResult};
use sqlx::Database;
use std::sync::Arc;
use std::time::Instant;
use telemetry::{MetricsSink, OperationStatus};
use tracing::warn;
use uuid::Uuid;

const DOMAIN: &str = "audit";

/// Trust level of a verified audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditTrust {
    /// Signature present and verified under the named KEK.
    Signed,
    /// No signature (legacy row or signing degraded at append time).
    /// Verifies trivially but must be reported untrusted.
    Unsigned,
}

/// Outcome of a chain verification pass over a window of rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditVerificationReport {
    /// Rows whose signature recomputed under their named KEK.
    pub verified: u64,
    /// Unsigned rows. They pass trivially but are untrusted.
    pub untrusted: u64,
    /// Rows that failed: signature mismatch, inconsistent signing
    /// fields, or a KEK no longer present in the chain.
    pub mismatched: Vec<Uuid>,
}

impl AuditVerificationReport {
    pub fn is_clean(&self) -> bool {
        self.mismatched.is_empty()
    }
}

/// Appends and verifies tamper-evident audit rows.
///
/// Appends happen inside the caller's transaction so the audit entry is
/// atomic with its subject; a failed append aborts the business action.
/// A failed *signing* merely degrades the row to unsigned.
pub struct AuditService<DB: Database> {
    repo: Arc<dyn AuditLogRepository<DB>>,
    chain: Arc<KekChainHandle>,
    metrics: Arc<dyn MetricsSink>,
}

impl<DB: Database> AuditService<DB> {
    pub fn new(
        repo: Arc<dyn AuditLogRepository<DB>>,
        chain: Arc<KekChainHandle>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            repo,
            chain,
            metrics,
        }
    }

    fn observe<T>(&self, op: &str, start: Instant, result: &EngineResult<T>) {
        let status = OperationStatus::from_result(result);
        self.metrics.record_operation(DOMAIN, op, status);
        self.metrics
            .record_duration(DOMAIN, op, start.elapsed(), status);
    }

    /// Append one row attributed to `actor`. Call inside the same
    /// `with_tx` scope as the action being audited.
    pub async fn append(
        &self,
        ctx: &DbContext<DB>,
        actor: &AuditActor,
        capability: &str,
        path: &str,
        metadata: Option<serde_json::Value>,
    ) -> EngineResult<AuditLog> {
        let start = Instant::now();
        let result = self
            .append_inner(ctx, actor, capability, path, metadata)
            .await;
        self.observe("append", start, &result);
        result
    }

    async fn append_inner(
        &self,
        ctx: &DbContext<DB>,
        actor: &AuditActor,
        capability: &str,
        path: &str,
        metadata: Option<serde_json::Value>,
    ) -> EngineResult<AuditLog> {
        let mut entry = AuditLog {
            id: Uuid::now_v7(),
            request_id: actor.request_id,
            client_id: actor.client_id,
            capability: capability.to_string(),
            path: path.to_string(),
            metadata,
            signature: None,
            kek_id: None,
            is_signed: false,
            created_at: Utc::now(),
        };

        let chain = self.chain.load();
        match chain.active() {
            Ok((kek_id, kek_material)) => match sign(&entry, kek_material) {
                Ok(signature) => {
                    entry.signature = Some(signature);
                    entry.kek_id = Some(kek_id);
                    entry.is_signed = true;
                }
                Err(err) => {
                    warn!(target: "audit", error = %err, "signing failed, appending unsigned row");
                }
            },
            Err(err) => {
                warn!(target: "audit", error = %err, "no active kek, appending unsigned row");
            }
        }

        self.repo.create(ctx, &entry).await?;
        Ok(entry)
    }

    /// Verify a stored row by id.
    pub async fn verify(&self, ctx: &DbContext<DB>, id: Uuid) -> EngineResult<AuditTrust> {
        let start = Instant::now();
        let result = match self.repo.get(ctx, id).await {
            Ok(entry) => self.verify_entry(&entry),
            Err(err) => Err(err),
        };
        self.observe("verify", start, &result);
        result
    }

    /// Verify a row already in hand. Unsigned rows verify trivially but
    /// come back [`AuditTrust::Unsigned`]; a signed row that does not
    /// recompute is `AuditSignatureMismatch`.
    pub fn verify_entry(&self, entry: &AuditLog) -> EngineResult<AuditTrust> {
        if !entry.is_signed {
            return Ok(AuditTrust::Unsigned);
        }

        let (signature, kek_id) = match (&entry.signature, entry.kek_id) {
            (Some(signature), Some(kek_id)) => (signature, kek_id),
            // is_signed without both fields is itself tampering.
            _ => {
                return Err(EngineError::audit_signature_mismatch(
                    "signed row is missing signature or kek id",
                ))
            }
        };

        let chain = self.chain.load();
        let kek_material = chain.get(kek_id).map_err(EngineError::from)?;

        if verify(entry, signature, kek_material).map_err(EngineError::from)? {
            Ok(AuditTrust::Signed)
        } else {
            Err(EngineError::audit_signature_mismatch(
                "audit signature does not verify",
            ))
        }
    }

    /// Verify a window of stored rows and tally the outcomes. Unlike
    /// [`Self::verify`], a bad row does not abort the pass; it lands in
    /// the report so operators see the full damage at once.
    pub async fn verify_range(
        &self,
        ctx: &DbContext<DB>,
        page: Page,
        created_at_from: Option<DateTime<Utc>>,
        created_at_to: Option<DateTime<Utc>>,
    ) -> EngineResult<AuditVerificationReport> {
        let start = Instant::now();
        let result = self
            .verify_range_inner(ctx, page, created_at_from, created_at_to)
            .await;
        self.observe("verify_range", start, &result);
        result
    }

    async fn verify_range_inner(
        &self,
        ctx: &DbContext<DB>,
        page: Page,
        created_at_from: Option<DateTime<Utc>>,
        created_at_to: Option<DateTime<Utc>>,
    ) -> EngineResult<AuditVerificationReport> {
        let rows = self
            .repo
            .list(ctx, page, created_at_from, created_at_to)
            .await?;

        let mut report = AuditVerificationReport::default();
        for row in rows {
            match self.verify_entry(&row) {
                Ok(AuditTrust::Signed) => report.verified += 1,
                Ok(AuditTrust::Unsigned) => report.untrusted += 1,
                Err(_) => report.mismatched.push(row.id),
            }
        }
        if !report.is_clean() {
            warn!(
                mismatched = report.mismatched.len(),
                "audit verification found tampered rows"
            );
        }
        Ok(report)
    }

    pub async fn get(&self, ctx: &DbContext<DB>, id: Uuid) -> EngineResult<AuditLog> {
        self.repo.get(ctx, id).await
    }

    pub async fn list(
        &self,
        ctx: &DbContext<DB>,
        page: Page,
        created_at_from: Option<DateTime<Utc>>,
        created_at_to: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<AuditLog>> {
        let start = Instant::now();
        let result = self.repo.list(ctx, page, created_at_from, created_at_to).await;
        self.observe("list", start, &result);
        result
    }

    /// Retention pruning. Remaining rows are unaffected; every
    /// signature is self-contained.
    pub async fn delete_older_than(
        &self,
        ctx: &DbContext<DB>,
        cutoff: DateTime<Utc>,
        dry_run: bool,
    ) -> EngineResult<u64> {
        let start = Instant::now();
        let result = self.repo.delete_older_than(ctx, cutoff, dry_run).await;
        self.observe("delete_older_than", start, &result);
        result
    }
}

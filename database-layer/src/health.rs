// Liveness probes for the connection pools. Wired into whatever
// health endpoint the binary exposes.
use error_common::{EngineError, EngineResult};
use sqlx::{MySql, Pool, Postgres};
use std::time::Duration;
use tracing::warn;

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy { reason: String },
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

async fn probe<F>(fut: F, timeout: Duration) -> HealthStatus
where
    F: std::future::Future<Output = EngineResult<()>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(())) => HealthStatus::Healthy,
        Ok(Err(err)) => {
            warn!(error = %err, "database health probe failed");
            HealthStatus::Unhealthy {
                reason: err.kind().as_str().to_string(),
            }
        }
        Err(_) => {
            warn!("database health probe timed out");
            HealthStatus::Unhealthy {
                reason: "timeout".to_string(),
            }
        }
    }
}

pub async fn check_postgres(pool: &Pool<Postgres>, timeout: Duration) -> HealthStatus {
    probe(
        async {
            sqlx::query("SELECT 1")
                .execute(pool)
                .await
                .map(|_| ())
                .map_err(|e| EngineError::internal("postgres probe failed").with_source(e))
        },
        timeout,
    )
    .await
}

pub async fn check_mysql(pool: &Pool<MySql>, timeout: Duration) -> HealthStatus {
    probe(
        async {
            sqlx::query("SELECT 1")
                .execute(pool)
                .await
                .map(|_| ())
                .map_err(|e| EngineError::internal("mysql probe failed").with_source(e))
        },
        timeout,
    )
    .await
}

use error_common::{EngineError, EngineResult};
use sqlx::{MySql, Pool, Postgres};
use tracing::info;

/// Apply the Postgres schema. Embedded at compile time; idempotent.
pub async fn run_postgres_migrations(pool: &Pool<Postgres>) -> EngineResult<()> {
    info!("running postgres migrations");
    sqlx::migrate!("migrations/postgres")
        .run(pool)
        .await
        .map_err(|e| EngineError::internal("postgres migration failed").with_source(e))
}

/// Apply the MySQL schema. Embedded at compile time; idempotent.
pub async fn run_mysql_migrations(pool: &Pool<MySql>) -> EngineResult<()> {
    info!("running mysql migrations");
    sqlx::migrate!("migrations/mysql")
        .run(pool)
        .await
        .map_err(|e| EngineError::internal("mysql migration failed").with_source(e))
}

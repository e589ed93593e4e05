use error_common::{EngineError, EngineResult};
use serde::Deserialize;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;
use sqlx::{MySql, Pool, Postgres};
use std::time::Duration;
use tracing::info;

/// Connection settings for either backend. The DSN scheme selects the
/// dialect at the binary edge; the engine itself is generic.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }

    /// Read `DATABASE_URL` (required), `DATABASE_MAX_CONNECTIONS` and
    /// `DATABASE_ACQUIRE_TIMEOUT_SECS` (optional) from the environment.
    pub fn from_env() -> EngineResult<Self> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| EngineError::validation("DATABASE_URL is not set"))?;

        let mut config = Self::new(url);
        if let Ok(raw) = std::env::var("DATABASE_MAX_CONNECTIONS") {
            config.max_connections = raw
                .parse()
                .map_err(|_| EngineError::validation("DATABASE_MAX_CONNECTIONS must be an integer"))?;
        }
        if let Ok(raw) = std::env::var("DATABASE_ACQUIRE_TIMEOUT_SECS") {
            config.acquire_timeout_secs = raw.parse().map_err(|_| {
                EngineError::validation("DATABASE_ACQUIRE_TIMEOUT_SECS must be an integer")
            })?;
        }
        Ok(config)
    }
}

pub async fn connect_postgres(config: &DatabaseConfig) -> EngineResult<Pool<Postgres>> {
    info!(max_connections = config.max_connections, "connecting postgres pool");
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(&config.url)
        .await
        .map_err(|e| EngineError::internal("failed to connect postgres pool").with_source(e))
}

pub async fn connect_mysql(config: &DatabaseConfig) -> EngineResult<Pool<MySql>> {
    info!(max_connections = config.max_connections, "connecting mysql pool");
    MySqlPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(&config.url)
        .await
        .map_err(|e| EngineError::internal("failed to connect mysql pool").with_source(e))
}

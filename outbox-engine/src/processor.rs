use async_trait::async_trait;
use chrono::Utc;
use database_layer::repository::OutboxRepository;
use database_layer::{with_tx, DbContext, OutboxEvent};
use error_common::{EngineError, EngineResult};
use serde::Deserialize;
use sqlx::Database;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::{MetricsSink, OperationStatus};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DOMAIN: &str = "outbox";

#[derive(Debug, Clone, Deserialize)]
pub struct OutboxConfig {
    /// Wall-clock period between poll attempts.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Upper bound on rows fetched per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// After this many failures an event is terminally `failed`.
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    /// Minimum wait before an event is retried.
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    10
}

fn default_batch_size() -> i64 {
    100
}

fn default_max_retries() -> i32 {
    5
}

fn default_retry_interval_secs() -> u64 {
    30
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_interval_secs: default_retry_interval_secs(),
        }
    }
}

impl OutboxConfig {
    /// Read `OUTBOX_INTERVAL_SECS`, `OUTBOX_BATCH_SIZE`,
    /// `OUTBOX_MAX_RETRIES` and `OUTBOX_RETRY_INTERVAL_SECS` from the
    /// environment, defaulting anything unset.
    pub fn from_env() -> EngineResult<Self> {
        let mut config = Self::default();
        if let Some(value) = env_parse("OUTBOX_INTERVAL_SECS")? {
            config.interval_secs = value;
        }
        if let Some(value) = env_parse("OUTBOX_BATCH_SIZE")? {
            config.batch_size = value;
        }
        if let Some(value) = env_parse("OUTBOX_MAX_RETRIES")? {
            config.max_retries = value;
        }
        if let Some(value) = env_parse("OUTBOX_RETRY_INTERVAL_SECS")? {
            config.retry_interval_secs = value;
        }
        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> EngineResult<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| EngineError::validation(format!("{name} is not a valid number"))),
        Err(_) => Ok(None),
    }
}

/// Failure surfaced by an event sink. Non-fatal failures enter retry;
/// fatal ones terminate the event immediately.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProcessFailure {
    pub fatal: bool,
    pub message: String,
}

impl ProcessFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            fatal: false,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            fatal: true,
            message: message.into(),
        }
    }
}

/// The pluggable event sink the processor drives.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn process(&self, event: &OutboxEvent) -> Result<(), ProcessFailure>;
}

/// Periodic, transactional batch dispatcher of outbox events.
///
/// Each tick claims up to `batch_size` pending rows with
/// `FOR UPDATE SKIP LOCKED` inside one transaction, runs the sink over
/// them in `created_at ASC` order, and commits the resulting status
/// transitions. Competing workers claim disjoint rows, so an event is
/// marked `processed` at most once per commit.
pub struct OutboxProcessor<DB: Database> {
    repo: Arc<dyn OutboxRepository<DB>>,
    processor: Arc<dyn EventProcessor>,
    metrics: Arc<dyn MetricsSink>,
    config: OutboxConfig,
}

impl<DB: Database> OutboxProcessor<DB> {
    pub fn new(
        repo: Arc<dyn OutboxRepository<DB>>,
        processor: Arc<dyn EventProcessor>,
        metrics: Arc<dyn MetricsSink>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            repo,
            processor,
            metrics,
            config,
        }
    }

    /// One poll: claim, dispatch, commit. Returns how many events were
    /// handled (processed or failed) this tick.
    pub async fn tick(&self, ctx: &DbContext<DB>) -> EngineResult<usize> {
        let start = Instant::now();
        let result = self.tick_inner(ctx).await;
        let status = OperationStatus::from_result(&result);
        self.metrics.record_operation(DOMAIN, "tick", status);
        self.metrics
            .record_duration(DOMAIN, "tick", start.elapsed(), status);
        result
    }

    async fn tick_inner(&self, ctx: &DbContext<DB>) -> EngineResult<usize> {
        let batch_size = self.config.batch_size;
        let max_retries = self.config.max_retries;
        let retry_interval = chrono::Duration::seconds(self.config.retry_interval_secs as i64);

        with_tx(ctx, |tx_ctx| async move {
            let events = self.repo.get_pending_events(&tx_ctx, batch_size).await?;
            let mut handled = 0usize;

            for mut event in events {
                let now = Utc::now();
                // Back off retried events until their minimum wait has
                // elapsed.
                if event.retries > 0 && event.updated_at + retry_interval > now {
                    continue;
                }

                match self.processor.process(&event).await {
                    Ok(()) => {
                        event.mark_processed(now);
                        debug!(event_id = %event.id, event_type = %event.event_type, "event processed");
                    }
                    Err(failure) => {
                        event.record_failure(&failure.message, failure.fatal, max_retries, now);
                        warn!(
                            event_id = %event.id,
                            event_type = %event.event_type,
                            retries = event.retries,
                            fatal = failure.fatal,
                            status = %event.status,
                            "event processing failed"
                        );
                    }
                }
                self.repo.update(&tx_ctx, &event).await?;
                handled += 1;
            }
            Ok(handled)
        })
        .await
    }

    /// Long-running loop: sleep `interval`, tick, repeat until
    /// cancelled. Cancellation is honored before a transaction opens;
    /// an in-flight tick always completes its commit or rollback, so no
    /// event is dropped mid-commit.
    pub async fn run(&self, ctx: DbContext<DB>, cancel: CancellationToken) -> EngineResult<()> {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick only double-polls startup; skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("outbox processor cancelled");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            if cancel.is_cancelled() {
                info!("outbox processor cancelled");
                return Ok(());
            }

            match self.tick(&ctx).await {
                Ok(0) => {}
                Ok(handled) => debug!(handled, "outbox tick complete"),
                Err(err) => warn!(error = %err, "outbox tick failed"),
            }
        }
    }
}

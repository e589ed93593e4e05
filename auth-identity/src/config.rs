use error_common::{EngineError, EngineResult};
use serde::Deserialize;
use std::time::Duration;

/// Failed-attempt lockout tuning. The counter trips at `threshold`
/// consecutive failures and the client stays rejected for `backoff`.
#[derive(Debug, Clone, Deserialize)]
pub struct LockoutConfig {
    #[serde(default = "default_threshold")]
    pub threshold: i32,
    #[serde(default = "default_backoff", with = "duration_secs")]
    pub backoff: Duration,
}

fn default_threshold() -> i32 {
    5
}

fn default_backoff() -> Duration {
    Duration::from_secs(15 * 60)
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            backoff: default_backoff(),
        }
    }
}

impl LockoutConfig {
    /// Read `LOCKOUT_THRESHOLD` and `LOCKOUT_BACKOFF_SECS` from the
    /// environment, defaulting anything unset.
    pub fn from_env() -> EngineResult<Self> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("LOCKOUT_THRESHOLD") {
            config.threshold = raw
                .parse()
                .map_err(|_| EngineError::validation("LOCKOUT_THRESHOLD must be an integer"))?;
        }
        if let Ok(raw) = std::env::var("LOCKOUT_BACKOFF_SECS") {
            let secs: u64 = raw
                .parse()
                .map_err(|_| EngineError::validation("LOCKOUT_BACKOFF_SECS must be an integer"))?;
            config.backoff = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

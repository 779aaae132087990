//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// Default checkpoint key prefix.
pub const DEFAULT_CHECKPOINT_PREFIX: &str = "resumable_";

/// Configuration shared by every transfer mode.
///
/// Durations are (de)serialized as integer milliseconds so a config file
/// reads `{"timeout": 30000, "retryDelay": 1000}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferConfig {
    /// Upper bound for every single transport call.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// Retries per chunk in resumable mode (attempts = retries + 1).
    pub retry_count: u32,
    /// Delay before the first retry of a chunk.
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
    /// Multiplier applied to the delay on each further retry.
    /// `1.0` keeps the delay fixed.
    pub backoff_factor: f64,
    /// Cap for the retry delay when `backoff_factor > 1.0`.
    #[serde(with = "duration_ms")]
    pub max_retry_delay: Duration,
    /// Default in-flight limit for parallel paginated transfers.
    pub max_concurrency: usize,
    /// Chunk size for resumable transfers and compressed streams.
    pub chunk_size: u64,
    /// Prefix prepended to checkpoint keys in the store.
    pub checkpoint_prefix: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
            backoff_factor: 1.0,
            max_retry_delay: Duration::from_secs(30),
            max_concurrency: 5,
            chunk_size: DEFAULT_CHUNK_SIZE,
            checkpoint_prefix: DEFAULT_CHECKPOINT_PREFIX.to_string(),
        }
    }
}

impl TransferConfig {
    /// Loads a config from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, TransferError> {
        let data = std::fs::read_to_string(path)?;
        let config: TransferConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the engine cannot work with.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.timeout.is_zero() {
            return Err(TransferError::InvalidOptions("timeout must be > 0".into()));
        }
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidOptions(
                "chunk size must be > 0".into(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(TransferError::InvalidOptions(
                "max concurrency must be > 0".into(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(TransferError::InvalidOptions(format!(
                "backoff factor must be >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// With the default factor of 1.0 every retry waits `retry_delay`.
    pub fn retry_delay_for(&self, attempt: u32) -> Duration {
        if self.backoff_factor <= 1.0 {
            return self.retry_delay;
        }
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let ms = self.retry_delay.as_millis() as f64 * self.backoff_factor.powi(exp);
        let capped = ms.min(self.max_retry_delay.as_millis() as f64);
        Duration::from_millis(capped.round() as u64)
    }

    /// Store key for a caller-supplied checkpoint key.
    pub fn checkpoint_store_key(&self, key: &str) -> String {
        format!("{}{key}", self.checkpoint_prefix)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let c = TransferConfig::default();
        assert_eq!(c.timeout, Duration::from_secs(30));
        assert_eq!(c.retry_count, 3);
        assert_eq!(c.retry_delay, Duration::from_secs(1));
        assert_eq!(c.max_concurrency, 5);
        assert_eq!(c.chunk_size, 1024 * 1024);
        assert_eq!(c.checkpoint_prefix, "resumable_");
        assert!(c.validate().is_ok());
    }

    #[test]
    fn fixed_delay_by_default() {
        let c = TransferConfig::default();
        for attempt in 1..6 {
            assert_eq!(c.retry_delay_for(attempt), Duration::from_secs(1));
        }
    }

    #[test]
    fn exponential_delay_is_capped() {
        let c = TransferConfig {
            retry_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_retry_delay: Duration::from_millis(500),
            ..TransferConfig::default()
        };
        assert_eq!(c.retry_delay_for(1), Duration::from_millis(100));
        assert_eq!(c.retry_delay_for(2), Duration::from_millis(200));
        assert_eq!(c.retry_delay_for(3), Duration::from_millis(400));
        assert_eq!(c.retry_delay_for(4), Duration::from_millis(500));
        assert_eq!(c.retry_delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let zero_chunk = TransferConfig {
            chunk_size: 0,
            ..TransferConfig::default()
        };
        assert!(zero_chunk.validate().is_err());

        let zero_conc = TransferConfig {
            max_concurrency: 0,
            ..TransferConfig::default()
        };
        assert!(zero_conc.validate().is_err());

        let shrinking = TransferConfig {
            backoff_factor: 0.5,
            ..TransferConfig::default()
        };
        assert!(shrinking.validate().is_err());
    }

    #[test]
    fn deserialize_partial_json() {
        let c: TransferConfig =
            serde_json::from_str(r#"{"timeout": 5000, "retryCount": 7, "chunkSize": 4096}"#)
                .unwrap();
        assert_eq!(c.timeout, Duration::from_secs(5));
        assert_eq!(c.retry_count, 7);
        assert_eq!(c.chunk_size, 4096);
        assert_eq!(c.retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transfer.json");
        std::fs::write(&path, r#"{"maxConcurrency": 2, "checkpointPrefix": "up_"}"#).unwrap();
        let c = TransferConfig::load(&path).unwrap();
        assert_eq!(c.max_concurrency, 2);
        assert_eq!(c.checkpoint_store_key("job"), "up_job");
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transfer.json");
        std::fs::write(&path, r#"{"chunkSize": 0}"#).unwrap();
        assert!(matches!(
            TransferConfig::load(&path),
            Err(TransferError::InvalidOptions(_))
        ));
    }
}

use crate::application::retry::RetryPolicy;
use crate::error::{Result, TransferError};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Runtime configuration of the transfer engine.
///
/// Every field has a default, so a config file only needs to name the values it
/// overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Consumer group used to track acknowledged offsets.
    pub consumer_group: String,
    /// Partitions of the `transaction_initiated` topic, one worker each.
    pub partitions: usize,
    /// Capacity of the bounded queue between a partition's fetcher and its worker.
    pub channel_capacity: usize,
    /// Maximum records pulled from the log per fetch.
    pub fetch_batch: usize,
    /// How long a fetch waits for new records before returning empty.
    pub fetch_wait_ms: u64,
    /// Optimistic-conflict retries of the apply step.
    pub apply_retry: RetryPolicy,
    /// Retries of outcome-event publication.
    pub emit_retry: RetryPolicy,
    /// Retries of audit appends.
    pub audit_retry: RetryPolicy,
    /// Audit entries waiting for the sink; further entries are dropped.
    pub audit_queue_capacity: usize,
    /// Pause before a worker rewinds to the committed offset after a transient failure.
    pub redelivery_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            consumer_group: "transfer-engine".to_string(),
            partitions: 4,
            channel_capacity: 64,
            fetch_batch: 32,
            fetch_wait_ms: 50,
            apply_retry: RetryPolicy::new(5, Duration::from_millis(5), Duration::from_millis(200)),
            emit_retry: RetryPolicy::new(5, Duration::from_millis(10), Duration::from_secs(1)),
            audit_retry: RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(500)),
            audit_queue_capacity: 1_024,
            redelivery_backoff_ms: 100,
        }
    }
}

impl EngineConfig {
    /// Loads a JSON config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.partitions == 0 {
            return Err(TransferError::ConfigError(
                "partitions must be at least 1".to_string(),
            ));
        }
        if self.channel_capacity == 0 || self.fetch_batch == 0 || self.audit_queue_capacity == 0 {
            return Err(TransferError::ConfigError(
                "channel_capacity, fetch_batch and audit_queue_capacity must be at least 1"
                    .to_string(),
            ));
        }
        if self.consumer_group.is_empty() {
            return Err(TransferError::ConfigError(
                "consumer_group must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn fetch_wait(&self) -> Duration {
        Duration::from_millis(self.fetch_wait_ms)
    }

    pub fn redelivery_backoff(&self) -> Duration {
        Duration::from_millis(self.redelivery_backoff_ms)
    }
}

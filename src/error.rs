use thiserror::Error;

/// Errors raised while moving a transfer through the engine.
///
/// Business rejections (invalid request, insufficient funds, contention) are not
/// errors: they end up as a FAILED [`TransferRecord`](crate::domain::transfer::TransferRecord).
/// Everything here is either an infrastructure failure or a malformed input.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Ledger store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Event log unavailable: {0}")]
    LogUnavailable(String),
    #[error("Audit append failed: {0}")]
    AuditAppendFailure(String),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
}

impl TransferError {
    /// Transient failures are retried locally and, if that is exhausted, by
    /// leaving the inbound event unacknowledged so the log redelivers it.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransferError::StoreUnavailable(_)
                | TransferError::LogUnavailable(_)
                | TransferError::AuditAppendFailure(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;

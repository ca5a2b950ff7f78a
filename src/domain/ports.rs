use super::account::{Account, AccountId, Balance};
use super::events::AuditEntry;
use super::transfer::{TransferId, TransferRecord};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A guarded write to one account inside a [`LedgerCommit`].
///
/// `new_balance == None` only asserts the version, which lets a rejection be
/// decided against a consistent snapshot without mutating anything.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountMutation {
    pub account: AccountId,
    pub expected_version: u64,
    pub new_balance: Option<Balance>,
}

/// Everything that must become visible atomically for one transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerCommit {
    pub record: TransferRecord,
    pub mutations: Vec<AccountMutation>,
}

/// Result of [`LedgerStore::commit`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Balances (if any) and the record were written together.
    Committed,
    /// An account moved past `expected_version`; nothing was written.
    VersionConflict { account: AccountId },
    /// Another delivery of the same transfer committed first; nothing was written.
    AlreadyRecorded(TransferRecord),
}

/// Transactional account and transfer-record storage.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Creates the account at version 0 unless it already exists.
    async fn open_account(&self, id: AccountId, balance: Balance) -> Result<bool>;
    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>>;
    async fn accounts(&self) -> Result<Vec<Account>>;
    async fn get_record(&self, id: &TransferId) -> Result<Option<TransferRecord>>;
    /// Applies every mutation and inserts the record in one atomic scope.
    async fn commit(&self, commit: LedgerCommit) -> Result<CommitOutcome>;
}

/// A record read from one partition of a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
    pub key: String,
    pub payload: serde_json::Value,
}

/// Durable, partitioned, append-only log with consumer-group offsets.
#[async_trait]
pub trait EventLog: Send + Sync {
    fn partition_count(&self, topic: &str) -> usize;
    async fn publish(&self, topic: &str, key: &str, payload: serde_json::Value) -> Result<()>;
    /// Reads up to `max` records starting at `from`, waiting at most `wait`
    /// for the first one to arrive.
    async fn fetch(
        &self,
        topic: &str,
        partition: usize,
        from: u64,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>>;
    /// Offset of the next record the group has not yet acknowledged.
    async fn committed_offset(&self, group: &str, topic: &str, partition: usize) -> Result<u64>;
    /// Acknowledges every record of the partition up to and including `offset`.
    async fn ack(&self, group: &str, topic: &str, partition: usize, offset: u64) -> Result<()>;
    /// Offset one past the last published record.
    async fn end_offset(&self, topic: &str, partition: usize) -> Result<u64>;
}

/// Append-only sink for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<()>;
}

pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type EventLogRef = Arc<dyn EventLog>;
pub type AuditSinkRef = Arc<dyn AuditSink>;

#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use transfer_engine::application::retry::RetryPolicy;
use transfer_engine::config::EngineConfig;
use transfer_engine::domain::account::{Account, AccountId, Balance};
use transfer_engine::domain::events::AuditEntry;
use transfer_engine::domain::ports::{
    AuditSink, CommitOutcome, Delivery, EventLog, LedgerCommit, LedgerStore,
};
use transfer_engine::domain::transfer::{TransferId, TransferRecord};
use transfer_engine::error::{Result, TransferError};
use transfer_engine::infrastructure::in_memory::{InMemoryEventLog, InMemoryLedgerStore};

/// Engine settings with no waiting between retries, so tests run fast.
pub fn fast_config(partitions: usize) -> EngineConfig {
    EngineConfig {
        partitions,
        fetch_wait_ms: 5,
        redelivery_backoff_ms: 1,
        apply_retry: RetryPolicy::immediate(20),
        emit_retry: RetryPolicy::immediate(2),
        audit_retry: RetryPolicy::immediate(2),
        ..EngineConfig::default()
    }
}

pub async fn seeded_store(accounts: &[(&str, Decimal)]) -> Arc<InMemoryLedgerStore> {
    let store = Arc::new(InMemoryLedgerStore::new());
    for (id, balance) in accounts {
        store
            .open_account(AccountId::from(*id), Balance::new(*balance))
            .await
            .unwrap();
    }
    store
}

pub async fn balance_of(store: &dyn LedgerStore, id: &str) -> Balance {
    store
        .get_account(&AccountId::from(id))
        .await
        .unwrap()
        .unwrap()
        .balance
}

pub async fn total_balance(store: &dyn LedgerStore) -> Balance {
    store
        .accounts()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.balance)
        .sum()
}

/// Every record published to `topic`, across all partitions.
pub async fn topic_payloads(log: &InMemoryEventLog, topic: &str) -> Vec<serde_json::Value> {
    let mut payloads = Vec::new();
    for partition in 0..log.partition_count(topic) {
        let deliveries = log
            .fetch(topic, partition, 0, usize::MAX, Duration::ZERO)
            .await
            .unwrap();
        payloads.extend(deliveries.into_iter().map(|d| d.payload));
    }
    payloads
}

/// How a [`FaultyLedgerStore`] misbehaves on `commit`.
pub enum CommitFault {
    /// The first `n` commits fail as if the store were down.
    Unavailable(u32),
    /// Every commit that touches an account reports a version conflict.
    AlwaysConflict,
    /// Every commit fails with a non-transient error.
    Corrupt,
}

/// Ledger store wrapper that injects commit faults. `commits` counts the
/// commits passed through to the inner store, `faults` the ones it rejected.
pub struct FaultyLedgerStore {
    inner: Arc<InMemoryLedgerStore>,
    fault: CommitFault,
    unavailable_left: AtomicU32,
    pub commits: AtomicU32,
    pub faults: AtomicU32,
}

impl FaultyLedgerStore {
    pub fn new(inner: Arc<InMemoryLedgerStore>, fault: CommitFault) -> Self {
        let unavailable_left = match fault {
            CommitFault::Unavailable(n) => n,
            _ => 0,
        };
        Self {
            inner,
            fault,
            unavailable_left: AtomicU32::new(unavailable_left),
            commits: AtomicU32::new(0),
            faults: AtomicU32::new(0),
        }
    }

    fn inject(&self, commit: &LedgerCommit) -> Option<Result<CommitOutcome>> {
        match self.fault {
            CommitFault::Unavailable(_) => {
                let left = self.unavailable_left.load(Ordering::SeqCst);
                if left == 0 {
                    return None;
                }
                self.unavailable_left.store(left - 1, Ordering::SeqCst);
                Some(Err(TransferError::StoreUnavailable(
                    "connection reset".into(),
                )))
            }
            CommitFault::AlwaysConflict => {
                let first = commit.mutations.first()?;
                Some(Ok(CommitOutcome::VersionConflict {
                    account: first.account.clone(),
                }))
            }
            CommitFault::Corrupt => Some(Err(TransferError::ValidationError(
                "corrupt account row".into(),
            ))),
        }
    }
}

#[async_trait]
impl LedgerStore for FaultyLedgerStore {
    async fn open_account(&self, id: AccountId, balance: Balance) -> Result<bool> {
        self.inner.open_account(id, balance).await
    }

    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>> {
        self.inner.get_account(id).await
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        self.inner.accounts().await
    }

    async fn get_record(&self, id: &TransferId) -> Result<Option<TransferRecord>> {
        self.inner.get_record(id).await
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<CommitOutcome> {
        if let Some(result) = self.inject(&commit) {
            self.faults.fetch_add(1, Ordering::SeqCst);
            return result;
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.commit(commit).await
    }
}

/// Event log whose first `failures` publishes to `topic` fail.
pub struct FlakyEventLog {
    inner: Arc<InMemoryEventLog>,
    topic: &'static str,
    failures_left: AtomicU32,
}

impl FlakyEventLog {
    pub fn new(inner: Arc<InMemoryEventLog>, topic: &'static str, failures: u32) -> Self {
        Self {
            inner,
            topic,
            failures_left: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl EventLog for FlakyEventLog {
    fn partition_count(&self, topic: &str) -> usize {
        self.inner.partition_count(topic)
    }

    async fn publish(&self, topic: &str, key: &str, payload: serde_json::Value) -> Result<()> {
        if topic == self.topic {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(TransferError::LogUnavailable("broker unreachable".into()));
            }
        }
        self.inner.publish(topic, key, payload).await
    }

    async fn fetch(
        &self,
        topic: &str,
        partition: usize,
        from: u64,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>> {
        self.inner.fetch(topic, partition, from, max, wait).await
    }

    async fn committed_offset(&self, group: &str, topic: &str, partition: usize) -> Result<u64> {
        self.inner.committed_offset(group, topic, partition).await
    }

    async fn ack(&self, group: &str, topic: &str, partition: usize, offset: u64) -> Result<()> {
        self.inner.ack(group, topic, partition, offset).await
    }

    async fn end_offset(&self, topic: &str, partition: usize) -> Result<u64> {
        self.inner.end_offset(topic, partition).await
    }
}

/// Audit sink that is always down.
#[derive(Default)]
pub struct BrokenAuditSink {
    pub attempts: AtomicU32,
}

#[async_trait]
impl AuditSink for BrokenAuditSink {
    async fn append(&self, _entry: AuditEntry) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TransferError::AuditAppendFailure("disk full".into()))
    }
}

/// Audit sink that keeps entries in memory.
#[derive(Default)]
pub struct CollectingAuditSink {
    pub entries: Mutex<Vec<AuditEntry>>,
}

#[async_trait]
impl AuditSink for CollectingAuditSink {
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        self.entries.lock().await.push(entry);
        Ok(())
    }
}

pub fn write_csv(
    path: &Path,
    header: &[&str],
    rows: &[Vec<String>],
) -> std::result::Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    wtr.write_record(header)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}

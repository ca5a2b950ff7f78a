use crate::domain::account::{Account, AccountId, Balance};
use crate::domain::events::{AuditEntry, TOPIC_AUDIT_LOG};
use crate::domain::ports::{
    AuditSink, CommitOutcome, Delivery, EventLog, EventLogRef, LedgerCommit, LedgerStore,
};
use crate::domain::transfer::{TransferId, TransferRecord};
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<AccountId, Account>,
    records: HashMap<TransferId, TransferRecord>,
}

/// A thread-safe in-memory ledger store.
///
/// A single lock around accounts and records plays the role of the store's
/// transaction isolation: a [`LedgerCommit`] is checked and applied while the
/// lock is held, so readers never observe a half-applied transfer.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory ledger store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn open_account(&self, id: AccountId, balance: Balance) -> Result<bool> {
        if balance.is_negative() {
            return Err(TransferError::ValidationError(format!(
                "Account {} cannot open with a negative balance",
                id
            )));
        }
        let mut state = self.state.write().await;
        if state.accounts.contains_key(&id) {
            return Ok(false);
        }
        state.accounts.insert(id.clone(), Account::new(id, balance));
        Ok(true)
    }

    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>> {
        let state = self.state.read().await;
        Ok(state.accounts.get(id).cloned())
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        let state = self.state.read().await;
        let mut accounts: Vec<Account> = state.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }

    async fn get_record(&self, id: &TransferId) -> Result<Option<TransferRecord>> {
        let state = self.state.read().await;
        Ok(state.records.get(id).cloned())
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<CommitOutcome> {
        let mut state = self.state.write().await;

        if let Some(existing) = state.records.get(&commit.record.transfer_id) {
            return Ok(CommitOutcome::AlreadyRecorded(existing.clone()));
        }

        for mutation in &commit.mutations {
            let account = state.accounts.get(&mutation.account).ok_or_else(|| {
                TransferError::ValidationError(format!("Unknown account {}", mutation.account))
            })?;
            if account.version != mutation.expected_version {
                return Ok(CommitOutcome::VersionConflict {
                    account: mutation.account.clone(),
                });
            }
            if mutation.new_balance.is_some_and(|b| b.is_negative()) {
                return Err(TransferError::ValidationError(format!(
                    "Commit would overdraw account {}",
                    mutation.account
                )));
            }
        }

        // Every check passed, nothing below can fail.
        for mutation in commit.mutations {
            if let Some(balance) = mutation.new_balance
                && let Some(account) = state.accounts.get_mut(&mutation.account)
            {
                *account = account.committed(balance);
            }
        }
        state
            .records
            .insert(commit.record.transfer_id.clone(), commit.record);
        Ok(CommitOutcome::Committed)
    }
}

#[derive(Debug, Clone)]
struct StoredRecord {
    key: String,
    payload: serde_json::Value,
}

#[derive(Default)]
struct Partition {
    records: RwLock<Vec<StoredRecord>>,
    notify: Notify,
}

struct Topic {
    partitions: Vec<Partition>,
}

impl Topic {
    fn new(partitions: usize) -> Self {
        Self {
            partitions: (0..partitions).map(|_| Partition::default()).collect(),
        }
    }
}

/// Routes a record key to a partition.
pub fn partition_for(key: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as usize
}

/// An in-memory, partitioned event log with consumer-group offsets.
///
/// Records are retained for the lifetime of the log, so a consumer that
/// restarts from its committed offset sees every unacknowledged record again.
/// Every topic has the same number of partitions.
pub struct InMemoryEventLog {
    partitions: usize,
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    offsets: Mutex<HashMap<(String, String, usize), u64>>,
}

impl InMemoryEventLog {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            topics: RwLock::new(HashMap::new()),
            offsets: Mutex::new(HashMap::new()),
        }
    }

    async fn topic(&self, name: &str) -> Arc<Topic> {
        if let Some(topic) = self.topics.read().await.get(name) {
            return topic.clone();
        }
        let mut topics = self.topics.write().await;
        topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new(self.partitions)))
            .clone()
    }

    fn check_partition(&self, topic: &str, partition: usize) -> Result<()> {
        if partition < self.partitions {
            Ok(())
        } else {
            Err(TransferError::ValidationError(format!(
                "Topic {} has no partition {}",
                topic, partition
            )))
        }
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    fn partition_count(&self, _topic: &str) -> usize {
        self.partitions
    }

    async fn publish(&self, topic: &str, key: &str, payload: serde_json::Value) -> Result<()> {
        let topic = self.topic(topic).await;
        let partition = &topic.partitions[partition_for(key, self.partitions)];
        partition.records.write().await.push(StoredRecord {
            key: key.to_string(),
            payload,
        });
        partition.notify.notify_waiters();
        Ok(())
    }

    async fn fetch(
        &self,
        topic_name: &str,
        partition: usize,
        from: u64,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>> {
        self.check_partition(topic_name, partition)?;
        let topic = self.topic(topic_name).await;
        let part = &topic.partitions[partition];
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            // Register for wakeups before looking, so a publish in between is not missed.
            let notified = part.notify.notified();
            {
                let records = part.records.read().await;
                let start = from as usize;
                if start < records.len() {
                    return Ok(records[start..]
                        .iter()
                        .take(max)
                        .enumerate()
                        .map(|(i, record)| Delivery {
                            topic: topic_name.to_string(),
                            partition,
                            offset: from + i as u64,
                            key: record.key.clone(),
                            payload: record.payload.clone(),
                        })
                        .collect());
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn committed_offset(&self, group: &str, topic: &str, partition: usize) -> Result<u64> {
        self.check_partition(topic, partition)?;
        let offsets = self.offsets.lock().await;
        Ok(offsets
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
            .unwrap_or(0))
    }

    async fn ack(&self, group: &str, topic: &str, partition: usize, offset: u64) -> Result<()> {
        self.check_partition(topic, partition)?;
        let mut offsets = self.offsets.lock().await;
        let committed = offsets
            .entry((group.to_string(), topic.to_string(), partition))
            .or_insert(0);
        *committed = (*committed).max(offset + 1);
        Ok(())
    }

    async fn end_offset(&self, topic: &str, partition: usize) -> Result<u64> {
        self.check_partition(topic, partition)?;
        let topic = self.topic(topic).await;
        let len = topic.partitions[partition].records.read().await.len();
        Ok(len as u64)
    }
}

/// Audit sink that appends entries to the `audit_log` topic of an event log,
/// keyed by transfer id so one transfer's entries stay in order.
pub struct EventLogAuditSink {
    log: EventLogRef,
}

impl EventLogAuditSink {
    pub fn new(log: EventLogRef) -> Self {
        Self { log }
    }
}

#[async_trait]
impl AuditSink for EventLogAuditSink {
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        let key = entry.detail["transferId"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let payload = serde_json::to_value(&entry)?;
        self.log.publish(TOPIC_AUDIT_LOG, &key, payload).await
    }
}

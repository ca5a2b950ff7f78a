use crate::domain::account::{Account, AccountId, Balance};
use crate::domain::ports::{CommitOutcome, LedgerCommit, LedgerStore};
use crate::domain::transfer::{TransferId, TransferRecord};
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for storing account rows.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for storing terminal transfer records.
pub const CF_TRANSFERS: &str = "transfers";

/// A persistent ledger store implementation using RocksDB.
///
/// Accounts and transfer records live in separate Column Families. A commit
/// checks versions and writes every account row plus the record in a single
/// `WriteBatch`, so a crash can never leave a balance change without its
/// record (or the reverse). Commits are serialized by `commit_lock`; reads go
/// straight to the database.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBLedgerStore {
    db: Arc<DB>,
    commit_lock: Arc<Mutex<()>>,
}

impl RocksDBLedgerStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families ("accounts" and "transfers") exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_accounts = ColumnFamilyDescriptor::new(CF_ACCOUNTS, Options::default());
        let cf_transfers = ColumnFamilyDescriptor::new(CF_TRANSFERS, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_accounts, cf_transfers])?;

        Ok(Self {
            db: Arc::new(db),
            commit_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            TransferError::InternalError(Box::new(std::io::Error::other(format!(
                "{} column family not found",
                name
            ))))
        })
    }

    fn read<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        let bytes = self.db.get_pinned_cf(cf, key).map_err(unavailable)?;
        match bytes {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf_name: &str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        let cf = self.cf(cf_name)?;
        batch.put_cf(cf, key, serde_json::to_vec(value)?);
        Ok(())
    }
}

fn unavailable(e: rocksdb::Error) -> TransferError {
    TransferError::StoreUnavailable(e.to_string())
}

#[async_trait]
impl LedgerStore for RocksDBLedgerStore {
    async fn open_account(&self, id: AccountId, balance: Balance) -> Result<bool> {
        if balance.is_negative() {
            return Err(TransferError::ValidationError(format!(
                "Account {} cannot open with a negative balance",
                id
            )));
        }
        let _guard = self.commit_lock.lock().await;
        if self
            .read::<Account>(CF_ACCOUNTS, id.as_str().as_bytes())?
            .is_some()
        {
            return Ok(false);
        }
        let mut batch = WriteBatch::default();
        self.put(
            &mut batch,
            CF_ACCOUNTS,
            id.as_str().as_bytes(),
            &Account::new(id.clone(), balance),
        )?;
        self.db.write(batch).map_err(unavailable)?;
        Ok(true)
    }

    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>> {
        self.read(CF_ACCOUNTS, id.as_str().as_bytes())
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        let handle = self.cf(CF_ACCOUNTS)?;

        let mut accounts = Vec::new();
        let iter = self.db.iterator_cf(handle, rocksdb::IteratorMode::Start);

        for item in iter {
            let (_key, value) = item.map_err(unavailable)?;
            let account: Account = serde_json::from_slice(&value)?;
            accounts.push(account);
        }

        Ok(accounts)
    }

    async fn get_record(&self, id: &TransferId) -> Result<Option<TransferRecord>> {
        self.read(CF_TRANSFERS, id.as_str().as_bytes())
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<CommitOutcome> {
        let _guard = self.commit_lock.lock().await;
        let record_key = commit.record.transfer_id.as_str().as_bytes();

        if let Some(existing) = self.read::<TransferRecord>(CF_TRANSFERS, record_key)? {
            return Ok(CommitOutcome::AlreadyRecorded(existing));
        }

        let mut batch = WriteBatch::default();
        for mutation in &commit.mutations {
            let key = mutation.account.as_str().as_bytes();
            let account: Account = self.read(CF_ACCOUNTS, key)?.ok_or_else(|| {
                TransferError::ValidationError(format!("Unknown account {}", mutation.account))
            })?;
            if account.version != mutation.expected_version {
                return Ok(CommitOutcome::VersionConflict {
                    account: mutation.account.clone(),
                });
            }
            if let Some(balance) = mutation.new_balance {
                if balance.is_negative() {
                    return Err(TransferError::ValidationError(format!(
                        "Commit would overdraw account {}",
                        mutation.account
                    )));
                }
                self.put(&mut batch, CF_ACCOUNTS, key, &account.committed(balance))?;
            }
        }
        self.put(&mut batch, CF_TRANSFERS, record_key, &commit.record)?;

        self.db.write(batch).map_err(unavailable)?;
        Ok(CommitOutcome::Committed)
    }
}

use crate::domain::account::{Account, AccountId};
use crate::domain::ports::{AccountMutation, CommitOutcome, LedgerCommit, LedgerStoreRef};
use crate::domain::transfer::{FailureReason, TransferId, TransferRecord, TransferRequest};
use crate::error::Result;

/// Durable record of transfers that already reached a terminal state.
///
/// Records live in the ledger store and are only ever written through
/// [`LedgerStore::commit`](crate::domain::ports::LedgerStore::commit), in the
/// same atomic scope as the balance mutation they describe. Once a record is
/// committed it is never overwritten, so lookups are monotonic.
#[derive(Clone)]
pub struct IdempotencyLedger {
    store: LedgerStoreRef,
}

impl IdempotencyLedger {
    pub fn new(store: LedgerStoreRef) -> Self {
        Self { store }
    }

    /// Returns the terminal record for `id`, if one was committed.
    pub async fn record_exists(&self, id: &TransferId) -> Result<Option<TransferRecord>> {
        Ok(self
            .store
            .get_record(id)
            .await?
            .filter(TransferRecord::is_terminal))
    }

    pub async fn account(&self, id: &AccountId) -> Result<Option<Account>> {
        self.store.get_account(id).await
    }

    /// Commits a COMPLETED record together with both balance writes.
    ///
    /// `source` and `destination` carry the post-transfer balances and the
    /// versions that were read before computing them.
    pub async fn commit_completed(
        &self,
        request: &TransferRequest,
        source: &Account,
        destination: &Account,
    ) -> Result<(TransferRecord, CommitOutcome)> {
        let record = TransferRecord::completed(request);
        let mutations = vec![
            AccountMutation {
                account: source.id.clone(),
                expected_version: source.version,
                new_balance: Some(source.balance),
            },
            AccountMutation {
                account: destination.id.clone(),
                expected_version: destination.version,
                new_balance: Some(destination.balance),
            },
        ];
        self.commit(record, mutations).await
    }

    /// Commits a FAILED record. When `guard` is given, the commit only succeeds
    /// if that account is still at the version the rejection was based on.
    pub async fn commit_failed(
        &self,
        request: &TransferRequest,
        reason: FailureReason,
        guard: Option<&Account>,
    ) -> Result<(TransferRecord, CommitOutcome)> {
        let record = TransferRecord::failed(request, reason);
        let mutations = guard
            .map(|account| AccountMutation {
                account: account.id.clone(),
                expected_version: account.version,
                new_balance: None,
            })
            .into_iter()
            .collect();
        self.commit(record, mutations).await
    }

    async fn commit(
        &self,
        record: TransferRecord,
        mutations: Vec<AccountMutation>,
    ) -> Result<(TransferRecord, CommitOutcome)> {
        let outcome = self
            .store
            .commit(LedgerCommit {
                record: record.clone(),
                mutations,
            })
            .await?;
        Ok((record, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::Balance;
    use crate::domain::ports::LedgerStore;
    use crate::domain::transfer::TransferStatus;
    use crate::infrastructure::in_memory::InMemoryLedgerStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn ledger_with(
        accounts: &[(&str, Balance)],
    ) -> (IdempotencyLedger, Arc<InMemoryLedgerStore>) {
        let store = Arc::new(InMemoryLedgerStore::new());
        for (id, balance) in accounts {
            store.open_account(AccountId::from(*id), *balance).await.unwrap();
        }
        (IdempotencyLedger::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_record_absent_before_commit() {
        let (ledger, _) = ledger_with(&[]).await;
        assert!(ledger.record_exists(&"t1".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_is_monotonic() {
        let (ledger, _) = ledger_with(&[("A", Balance::new(dec!(10)))]).await;
        let request = TransferRequest::new("t1", "A", "B", dec!(50));

        let (_, outcome) = ledger
            .commit_failed(&request, FailureReason::InvalidRequest, None)
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Committed);

        // A second commit for the same transfer must not replace the first.
        let (_, outcome) = ledger
            .commit_failed(&request, FailureReason::ContentionExceeded, None)
            .await
            .unwrap();
        match outcome {
            CommitOutcome::AlreadyRecorded(existing) => {
                assert_eq!(existing.failure_reason, Some(FailureReason::InvalidRequest))
            }
            other => panic!("expected AlreadyRecorded, got {:?}", other),
        }

        let stored = ledger.record_exists(&"t1".into()).await.unwrap().unwrap();
        assert_eq!(stored.status, TransferStatus::Failed);
        assert_eq!(stored.failure_reason, Some(FailureReason::InvalidRequest));
    }

    #[tokio::test]
    async fn test_guarded_failure_detects_stale_read() {
        let (ledger, store) = ledger_with(&[
            ("A", Balance::new(dec!(10))),
            ("B", Balance::ZERO),
        ])
        .await;
        let stale = store.get_account(&"A".into()).await.unwrap().unwrap();

        // Move A forward so the snapshot above is stale.
        let mut source = stale.clone();
        source.balance = Balance::new(dec!(5));
        let mut destination = store.get_account(&"B".into()).await.unwrap().unwrap();
        destination.balance = Balance::new(dec!(5));
        let first = TransferRequest::new("t1", "A", "B", dec!(5));
        let (_, outcome) = ledger
            .commit_completed(&first, &source, &destination)
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Committed);

        let second = TransferRequest::new("t2", "A", "B", dec!(50));
        let (_, outcome) = ledger
            .commit_failed(&second, FailureReason::InsufficientFunds, Some(&stale))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::VersionConflict {
                account: "A".into()
            }
        );
        assert!(ledger.record_exists(&"t2".into()).await.unwrap().is_none());
    }
}

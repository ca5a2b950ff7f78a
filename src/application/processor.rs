use super::audit::AuditEmitter;
use super::idempotency::IdempotencyLedger;
use super::publisher::OutcomePublisher;
use super::retry::RetryPolicy;
use crate::domain::account::{Account, Amount};
use crate::domain::events::AuditEventType;
use crate::domain::ports::CommitOutcome;
use crate::domain::transfer::{
    FailureReason, TransferRecord, TransferRequest, TransferState, TransferStatus,
};
use crate::error::Result;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

/// How the apply step ended.
enum Resolution {
    /// This call committed the terminal record.
    Recorded(TransferRecord),
    /// A concurrent delivery of the same transfer committed first.
    Replay(TransferRecord),
}

/// The transfer state machine.
///
/// Drives a [`TransferRequest`] from RECEIVED through APPLYING to a durable
/// COMPLETED or FAILED record, then publishes the outcome and audits every
/// transition. Safe to call any number of times for the same transfer: only
/// the first call that commits mutates balances, later calls replay.
pub struct TransferProcessor {
    ledger: IdempotencyLedger,
    publisher: OutcomePublisher,
    audit: AuditEmitter,
    apply_retry: RetryPolicy,
}

impl TransferProcessor {
    pub fn new(
        ledger: IdempotencyLedger,
        publisher: OutcomePublisher,
        audit: AuditEmitter,
        apply_retry: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            publisher,
            audit,
            apply_retry,
        }
    }

    /// Processes one `transaction_initiated` event.
    ///
    /// Returns the terminal record. An `Err` is always an infrastructure
    /// failure; the caller must not acknowledge the event.
    #[instrument(skip_all, fields(transfer_id = %request.transfer_id))]
    pub async fn handle(&self, request: TransferRequest) -> Result<TransferRecord> {
        if let Some(record) = self.ledger.record_exists(&request.transfer_id).await? {
            debug!(status = ?record.status, "Transfer already terminal, replaying outcome");
            return self.replay(record).await;
        }

        self.transition(&request, TransferState::Received);
        let record = match self.resolve(&request).await? {
            Resolution::Recorded(record) => record,
            Resolution::Replay(record) => {
                debug!("Concurrent delivery committed first, replaying outcome");
                return self.replay(record).await;
            }
        };

        match record.failure_reason {
            None => info!(
                from = %record.from_account,
                to = %record.to_account,
                amount = %record.amount,
                "Transfer completed"
            ),
            Some(reason) => info!(reason = %reason, "Transfer failed"),
        }
        self.audit.record(audit_type(&record), record_detail(&record));
        self.publisher.publish(&record).await?;
        Ok(record)
    }

    /// Validates, then runs the optimistic apply loop until a record commits.
    async fn resolve(&self, request: &TransferRequest) -> Result<Resolution> {
        let Some(amount) = request.validated_amount() else {
            return self.fail(request, FailureReason::InvalidRequest, None).await;
        };

        self.transition(request, TransferState::Applying);
        let max_attempts = self.apply_retry.max_attempts();
        for attempt in 1..=max_attempts {
            let source = self.ledger.account(&request.from_account).await?;
            let destination = self.ledger.account(&request.to_account).await?;
            let (Some(source), Some(destination)) = (source, destination) else {
                return self.fail(request, FailureReason::InvalidRequest, None).await;
            };

            let (record, outcome) = match plan_balances(&source, &destination, amount) {
                Ok((debited, credited)) => {
                    self.ledger
                        .commit_completed(request, &debited, &credited)
                        .await?
                }
                Err((reason, basis)) => {
                    self.ledger
                        .commit_failed(request, reason, Some(basis))
                        .await?
                }
            };

            match outcome {
                CommitOutcome::Committed => return Ok(Resolution::Recorded(record)),
                CommitOutcome::AlreadyRecorded(existing) => {
                    return Ok(Resolution::Replay(existing));
                }
                CommitOutcome::VersionConflict { account } => {
                    warn!(attempt, max_attempts, account = %account, "Version conflict on apply");
                    if attempt < max_attempts {
                        tokio::time::sleep(self.apply_retry.backoff(attempt)).await;
                    }
                }
            }
        }

        self.fail(request, FailureReason::ContentionExceeded, None).await
    }

    async fn fail(
        &self,
        request: &TransferRequest,
        reason: FailureReason,
        guard: Option<&Account>,
    ) -> Result<Resolution> {
        let (record, outcome) = self.ledger.commit_failed(request, reason, guard).await?;
        Ok(match outcome {
            CommitOutcome::AlreadyRecorded(existing) => Resolution::Replay(existing),
            _ => Resolution::Recorded(record),
        })
    }

    async fn replay(&self, record: TransferRecord) -> Result<TransferRecord> {
        self.audit
            .record(AuditEventType::TransferReplayed, record_detail(&record));
        self.publisher.publish(&record).await?;
        Ok(record)
    }

    fn transition(&self, request: &TransferRequest, state: TransferState) {
        let event_type = match state {
            TransferState::Received => AuditEventType::TransferReceived,
            _ => AuditEventType::TransferApplying,
        };
        self.audit.record(
            event_type,
            json!({
                "transferId": request.transfer_id,
                "fromAccount": request.from_account,
                "toAccount": request.to_account,
                "amount": request.amount,
                "state": state.as_str(),
            }),
        );
    }
}

/// Computes post-transfer rows, keeping the versions that were read.
///
/// A rejection names the reason and the account whose snapshot it was decided
/// on: the source when it cannot cover the amount, the destination when the
/// credit would overflow.
fn plan_balances<'a>(
    source: &'a Account,
    destination: &'a Account,
    amount: Amount,
) -> std::result::Result<(Account, Account), (FailureReason, &'a Account)> {
    let mut debited = source.clone();
    debited
        .debit(amount)
        .map_err(|_| (FailureReason::InsufficientFunds, source))?;
    let mut credited = destination.clone();
    credited
        .credit(amount)
        .map_err(|_| (FailureReason::InvalidRequest, destination))?;
    Ok((debited, credited))
}

fn audit_type(record: &TransferRecord) -> AuditEventType {
    match record.status {
        TransferStatus::Completed => AuditEventType::TransferCompleted,
        _ => AuditEventType::TransferFailed,
    }
}

fn record_detail(record: &TransferRecord) -> serde_json::Value {
    json!({
        "transferId": record.transfer_id,
        "fromAccount": record.from_account,
        "toAccount": record.to_account,
        "amount": record.amount,
        "state": record.state().as_str(),
        "reason": record.failure_reason,
        "appliedAt": record.applied_at,
    })
}

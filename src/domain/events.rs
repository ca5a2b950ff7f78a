//! Event payloads exchanged with the event log and the audit sink.

use super::account::AccountId;
use super::transfer::{FailureReason, TransferId, TransferRecord, TransferStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const TOPIC_TRANSACTION_INITIATED: &str = "transaction_initiated";
pub const TOPIC_TRANSACTION_COMPLETED: &str = "transaction_completed";
pub const TOPIC_TRANSACTION_FAILED: &str = "transaction_failed";
pub const TOPIC_AUDIT_LOG: &str = "audit_log";

/// Outbound event describing the terminal outcome of a transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutcomeEvent {
    TransactionCompleted {
        #[serde(rename = "transferId")]
        transfer_id: TransferId,
        #[serde(rename = "fromAccount")]
        from_account: AccountId,
        #[serde(rename = "toAccount")]
        to_account: AccountId,
        amount: Decimal,
    },
    TransactionFailed {
        #[serde(rename = "transferId")]
        transfer_id: TransferId,
        #[serde(rename = "fromAccount")]
        from_account: AccountId,
        #[serde(rename = "toAccount")]
        to_account: AccountId,
        amount: Decimal,
        reason: FailureReason,
    },
}

impl OutcomeEvent {
    /// Builds the outcome event for a terminal record.
    ///
    /// The event is derived from the record alone, so every replay of the same
    /// transfer produces an identical event.
    pub fn from_record(record: &TransferRecord) -> Self {
        match (record.status, record.failure_reason) {
            (TransferStatus::Failed, Some(reason)) => OutcomeEvent::TransactionFailed {
                transfer_id: record.transfer_id.clone(),
                from_account: record.from_account.clone(),
                to_account: record.to_account.clone(),
                amount: record.amount,
                reason,
            },
            _ => OutcomeEvent::TransactionCompleted {
                transfer_id: record.transfer_id.clone(),
                from_account: record.from_account.clone(),
                to_account: record.to_account.clone(),
                amount: record.amount,
            },
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            OutcomeEvent::TransactionCompleted { .. } => TOPIC_TRANSACTION_COMPLETED,
            OutcomeEvent::TransactionFailed { .. } => TOPIC_TRANSACTION_FAILED,
        }
    }

    pub fn transfer_id(&self) -> &TransferId {
        match self {
            OutcomeEvent::TransactionCompleted { transfer_id, .. }
            | OutcomeEvent::TransactionFailed { transfer_id, .. } => transfer_id,
        }
    }
}

/// Audit event type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    TransferReceived,
    TransferApplying,
    TransferCompleted,
    TransferFailed,
    TransferReplayed,
}

/// Immutable record of a state transition, appended to the audit sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event_type: AuditEventType,
    pub detail: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(event_type: AuditEventType, detail: serde_json::Value) -> Self {
        Self {
            event_type,
            detail,
            timestamp: Utc::now(),
        }
    }
}

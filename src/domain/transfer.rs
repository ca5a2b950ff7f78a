use super::account::{AccountId, Amount};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Globally unique transfer identifier, used as the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub String);

impl TransferId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransferId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A request to move `amount` from one account to another.
///
/// The amount is kept as a raw decimal: a non-positive amount is a request the
/// engine must still answer with a FAILED record, so it cannot be rejected at
/// deserialization time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub transfer_id: TransferId,
    pub from_account: AccountId,
    pub to_account: AccountId,
    pub amount: Decimal,
    #[serde(default = "Utc::now")]
    pub requested_at: DateTime<Utc>,
}

impl TransferRequest {
    pub fn new(
        transfer_id: impl Into<TransferId>,
        from_account: impl Into<AccountId>,
        to_account: impl Into<AccountId>,
        amount: Decimal,
    ) -> Self {
        Self {
            transfer_id: transfer_id.into(),
            from_account: from_account.into(),
            to_account: to_account.into(),
            amount,
            requested_at: Utc::now(),
        }
    }

    /// Checks the shape of the request, independent of any ledger state.
    pub fn validated_amount(&self) -> Option<Amount> {
        if self.from_account == self.to_account {
            return None;
        }
        Amount::new(self.amount).ok()
    }
}

/// Durable status of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
}

/// Why a transfer ended up FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// Unknown or identical accounts, or a non-positive amount.
    InvalidRequest,
    /// Source balance does not cover the amount.
    InsufficientFunds,
    /// Optimistic version check kept failing until the retry ceiling.
    ContentionExceeded,
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::InvalidRequest => "INVALID_REQUEST",
            FailureReason::InsufficientFunds => "INSUFFICIENT_FUNDS",
            FailureReason::ContentionExceeded => "CONTENTION_EXCEEDED",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Processing state of a transfer inside the engine.
///
/// ```text
/// RECEIVED → APPLYING → COMPLETED
///                 ↘ FAILED
/// ```
///
/// Only the terminal states are ever persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Received,
    Applying,
    Completed,
    Failed,
}

impl TransferState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Received => "RECEIVED",
            TransferState::Applying => "APPLYING",
            TransferState::Completed => "COMPLETED",
            TransferState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted outcome of a transfer, one per transfer identifier.
///
/// The request fields are kept alongside the outcome so a replay can re-emit
/// the exact same outcome event without consulting the redelivered payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub transfer_id: TransferId,
    pub from_account: AccountId,
    pub to_account: AccountId,
    pub amount: Decimal,
    pub status: TransferStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    pub applied_at: DateTime<Utc>,
}

impl TransferRecord {
    pub fn completed(request: &TransferRequest) -> Self {
        Self::from_request(request, TransferStatus::Completed, None)
    }

    pub fn failed(request: &TransferRequest, reason: FailureReason) -> Self {
        Self::from_request(request, TransferStatus::Failed, Some(reason))
    }

    fn from_request(
        request: &TransferRequest,
        status: TransferStatus,
        failure_reason: Option<FailureReason>,
    ) -> Self {
        Self {
            transfer_id: request.transfer_id.clone(),
            from_account: request.from_account.clone(),
            to_account: request.to_account.clone(),
            amount: request.amount,
            status,
            failure_reason,
            applied_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn state(&self) -> TransferState {
        match self.status {
            TransferStatus::Pending => TransferState::Applying,
            TransferStatus::Completed => TransferState::Completed,
            TransferStatus::Failed => TransferState::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_terminal_states() {
        assert!(TransferState::Completed.is_terminal());
        assert!(TransferState::Failed.is_terminal());
        assert!(!TransferState::Received.is_terminal());
        assert!(!TransferState::Applying.is_terminal());
    }

    #[test]
    fn test_request_validation() {
        assert!(TransferRequest::new("t1", "A", "B", dec!(10)).validated_amount().is_some());
        assert!(TransferRequest::new("t1", "A", "A", dec!(10)).validated_amount().is_none());
        assert!(TransferRequest::new("t1", "A", "B", dec!(0)).validated_amount().is_none());
        assert!(TransferRequest::new("t1", "A", "B", dec!(-3)).validated_amount().is_none());
    }

    #[test]
    fn test_request_deserializes_wire_payload() {
        let json = r#"{"transferId":"t-9","fromAccount":"A","toAccount":"B","amount":"100.25"}"#;
        let request: TransferRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.transfer_id, TransferId::from("t-9"));
        assert_eq!(request.amount, dec!(100.25));
    }

    #[test]
    fn test_failed_record_carries_reason() {
        let request = TransferRequest::new("t1", "A", "B", dec!(10));
        let record = TransferRecord::failed(&request, FailureReason::InsufficientFunds);
        assert_eq!(record.status, TransferStatus::Failed);
        assert_eq!(record.failure_reason, Some(FailureReason::InsufficientFunds));
        assert!(record.is_terminal());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "FAILED");
        assert_eq!(json["failureReason"], "INSUFFICIENT_FUNDS");
    }

    #[test]
    fn test_completed_record_has_no_reason() {
        let request = TransferRequest::new("t1", "A", "B", dec!(10));
        let record = TransferRecord::completed(&request);
        assert_eq!(record.failure_reason, None);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("failureReason").is_none());
    }
}

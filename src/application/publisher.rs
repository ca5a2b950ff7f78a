use super::retry::{RetryPolicy, retry};
use crate::domain::events::{OutcomeEvent, TOPIC_TRANSACTION_INITIATED};
use crate::domain::ports::{EventLog, EventLogRef};
use crate::domain::transfer::{TransferRecord, TransferRequest};
use crate::error::Result;
use tracing::debug;

/// Publishes outcome events for committed transfers.
///
/// Publication is retried on its own policy. If that is exhausted the error is
/// returned so the inbound event stays unacknowledged; the redelivered event
/// then hits the idempotency ledger and only the publication is repeated.
#[derive(Clone)]
pub struct OutcomePublisher {
    log: EventLogRef,
    policy: RetryPolicy,
}

impl OutcomePublisher {
    pub fn new(log: EventLogRef, policy: RetryPolicy) -> Self {
        Self { log, policy }
    }

    pub async fn publish(&self, record: &TransferRecord) -> Result<OutcomeEvent> {
        let event = OutcomeEvent::from_record(record);
        let payload = serde_json::to_value(&event)?;
        let topic = event.topic();
        let key = record.transfer_id.as_str();

        retry(&self.policy, "publish_outcome", || {
            self.log.publish(topic, key, payload.clone())
        })
        .await?;

        debug!(transfer_id = %record.transfer_id, topic, "Outcome event published");
        Ok(event)
    }
}

/// Appends a `transaction_initiated` event, keyed by transfer id.
pub async fn publish_initiated(log: &dyn EventLog, request: &TransferRequest) -> Result<()> {
    let payload = serde_json::to_value(request)?;
    log.publish(
        TOPIC_TRANSACTION_INITIATED,
        request.transfer_id.as_str(),
        payload,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::TOPIC_TRANSACTION_COMPLETED;
    use crate::domain::transfer::FailureReason;
    use crate::infrastructure::in_memory::InMemoryEventLog;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_routes_by_outcome() {
        let log = Arc::new(InMemoryEventLog::new(1));
        let publisher = OutcomePublisher::new(log.clone(), RetryPolicy::immediate(1));

        let request = TransferRequest::new("t1", "A", "B", dec!(10));
        publisher
            .publish(&TransferRecord::completed(&request))
            .await
            .unwrap();
        publisher
            .publish(&TransferRecord::failed(&request, FailureReason::InsufficientFunds))
            .await
            .unwrap();

        let completed = log
            .fetch(TOPIC_TRANSACTION_COMPLETED, 0, 0, 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].key, "t1");
        assert_eq!(completed[0].payload["event"], "transaction_completed");

        let failed = log
            .fetch(crate::domain::events::TOPIC_TRANSACTION_FAILED, 0, 0, 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].payload["reason"], "INSUFFICIENT_FUNDS");
    }

    #[tokio::test]
    async fn test_initiated_payload_round_trips_into_request() {
        let log = InMemoryEventLog::new(1);
        let request = TransferRequest::new("t7", "A", "B", dec!(3.5));
        publish_initiated(&log, &request).await.unwrap();

        let deliveries = log
            .fetch(TOPIC_TRANSACTION_INITIATED, 0, 0, 10, Duration::ZERO)
            .await
            .unwrap();
        let decoded: TransferRequest =
            serde_json::from_value(deliveries[0].payload.clone()).unwrap();
        assert_eq!(decoded, request);
    }
}

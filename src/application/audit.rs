//! Best-effort audit trail.
//!
//! Entries are handed to a background task over a bounded channel. Queuing
//! never waits: when the queue is full the entry is logged and dropped, so an
//! unavailable sink never stalls a worker. The task retries each append with
//! backoff and logs the entry it finally gives up on.

use super::retry::{RetryPolicy, retry};
use crate::domain::events::{AuditEntry, AuditEventType};
use crate::domain::ports::AuditSinkRef;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

enum AuditCommand {
    Append(AuditEntry),
    Flush(oneshot::Sender<()>),
}

/// Handle used by the state machine to record transitions.
#[derive(Clone)]
pub struct AuditEmitter {
    tx: mpsc::Sender<AuditCommand>,
}

impl AuditEmitter {
    /// Starts the background appender. The returned task ends once every
    /// emitter clone has been dropped and the queue is drained.
    pub fn spawn(
        sink: AuditSinkRef,
        policy: RetryPolicy,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_appender(sink, policy, rx));
        (Self { tx }, handle)
    }

    /// Queues an entry. Never blocks and never fails the caller.
    pub fn append(&self, entry: AuditEntry) {
        match self.tx.try_send(AuditCommand::Append(entry)) {
            Ok(()) => {}
            Err(TrySendError::Full(AuditCommand::Append(entry))) => error!(
                event_type = ?entry.event_type,
                detail = %entry.detail,
                "Audit queue full, entry dropped"
            ),
            Err(_) => error!("Audit appender stopped, entry dropped"),
        }
    }

    pub fn record(&self, event_type: AuditEventType, detail: serde_json::Value) {
        self.append(AuditEntry::new(event_type, detail));
    }

    /// Waits until every entry queued before this call has been handled.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(AuditCommand::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

async fn run_appender(
    sink: AuditSinkRef,
    policy: RetryPolicy,
    mut rx: mpsc::Receiver<AuditCommand>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            AuditCommand::Append(entry) => {
                let result = retry(&policy, "audit_append", || sink.append(entry.clone())).await;
                match result {
                    Ok(()) => debug!(event_type = ?entry.event_type, "Audit entry appended"),
                    Err(e) => error!(
                        event_type = ?entry.event_type,
                        detail = %entry.detail,
                        error = %e,
                        "Audit append failed, giving up on entry"
                    ),
                }
            }
            AuditCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

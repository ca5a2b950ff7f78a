//! Partition workers and the engine that runs them.

use super::audit::AuditEmitter;
use super::idempotency::IdempotencyLedger;
use super::processor::TransferProcessor;
use super::publisher::OutcomePublisher;
use crate::config::EngineConfig;
use crate::domain::events::TOPIC_TRANSACTION_INITIATED;
use crate::domain::ports::{AuditSinkRef, Delivery, EventLogRef, LedgerStoreRef};
use crate::domain::transfer::TransferRequest;
use crate::error::{Result, TransferError};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Consumes one partition of `transaction_initiated`.
///
/// A fetch task pulls records from the committed offset into a bounded queue;
/// the worker handles them in log order and acknowledges each one only after
/// its terminal record is committed and its outcome published. On a transient
/// failure the queue is discarded and consumption restarts from the committed
/// offset, so the failed event is delivered again.
pub struct PartitionWorker {
    partition: usize,
    processor: Arc<TransferProcessor>,
    log: EventLogRef,
    config: Arc<EngineConfig>,
}

impl PartitionWorker {
    pub fn new(
        partition: usize,
        processor: Arc<TransferProcessor>,
        log: EventLogRef,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            partition,
            processor,
            log,
            config,
        }
    }

    /// Runs until `shutdown` flips to `true` or a non-transient error occurs.
    ///
    /// Shutdown is only observed between events: an event that is being handled
    /// always reaches commit-or-abort first.
    #[instrument(skip_all, fields(partition = self.partition))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Partition worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.consume(&mut shutdown).await {
                Ok(()) => break,
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "Transient failure, rewinding to committed offset");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.redelivery_backoff()) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Partition worker failed");
                    return Err(e);
                }
            }
        }
        info!("Partition worker stopped");
        Ok(())
    }

    /// One consumption session, starting at the committed offset. Returns
    /// `Ok(())` only on shutdown.
    async fn consume(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let start = self
            .log
            .committed_offset(
                &self.config.consumer_group,
                TOPIC_TRANSACTION_INITIATED,
                self.partition,
            )
            .await?;
        debug!(offset = start, "Consuming from committed offset");

        let (tx, mut rx) = mpsc::channel(self.config.channel_capacity);
        let fetcher = tokio::spawn(fetch_loop(
            self.log.clone(),
            self.partition,
            start,
            self.config.clone(),
            tx,
        ));

        let result = self.drain_queue(&mut rx, shutdown).await;
        // The fetcher only reads, so stopping it mid-fetch loses nothing.
        fetcher.abort();
        result
    }

    async fn drain_queue(
        &self,
        rx: &mut mpsc::Receiver<Result<Delivery>>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    // A dropped sender means nobody can ask us to stop any more.
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                    continue;
                }
                next = rx.recv() => next,
            };
            match next {
                Some(Ok(delivery)) => self.process(delivery).await?,
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(TransferError::LogUnavailable(
                        "fetcher stopped unexpectedly".to_string(),
                    ));
                }
            }
        }
    }

    async fn process(&self, delivery: Delivery) -> Result<()> {
        match serde_json::from_value::<TransferRequest>(delivery.payload.clone()) {
            Ok(request) => {
                self.processor.handle(request).await?;
            }
            Err(e) => {
                // Nothing identifies the transfer, so no record can be written.
                error!(
                    offset = delivery.offset,
                    key = %delivery.key,
                    error = %e,
                    "Skipping malformed transaction_initiated event"
                );
            }
        }
        self.log
            .ack(
                &self.config.consumer_group,
                TOPIC_TRANSACTION_INITIATED,
                self.partition,
                delivery.offset,
            )
            .await
    }
}

async fn fetch_loop(
    log: EventLogRef,
    partition: usize,
    mut next: u64,
    config: Arc<EngineConfig>,
    tx: mpsc::Sender<Result<Delivery>>,
) {
    loop {
        let batch = log
            .fetch(
                TOPIC_TRANSACTION_INITIATED,
                partition,
                next,
                config.fetch_batch,
                config.fetch_wait(),
            )
            .await;
        match batch {
            Ok(deliveries) => {
                for delivery in deliveries {
                    next = delivery.offset + 1;
                    // Blocks while the worker is behind; ends when it is gone.
                    if tx.send(Ok(delivery)).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }
}

/// Runs one [`PartitionWorker`] per partition of `transaction_initiated`.
pub struct TransferEngine {
    log: EventLogRef,
    config: Arc<EngineConfig>,
    processor: Arc<TransferProcessor>,
    audit: AuditEmitter,
    audit_task: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<Result<()>>>,
}

impl TransferEngine {
    /// Wires the state machine to its collaborators and spawns the workers.
    pub fn start(
        config: EngineConfig,
        ledger: LedgerStoreRef,
        log: EventLogRef,
        audit_sink: AuditSinkRef,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let (audit, audit_task) = AuditEmitter::spawn(
            audit_sink,
            config.audit_retry.clone(),
            config.audit_queue_capacity,
        );
        let processor = Arc::new(TransferProcessor::new(
            IdempotencyLedger::new(ledger),
            OutcomePublisher::new(log.clone(), config.emit_retry.clone()),
            audit.clone(),
            config.apply_retry.clone(),
        ));

        let (shutdown_tx, _) = watch::channel(false);
        let partitions = log.partition_count(TOPIC_TRANSACTION_INITIATED);
        let workers = (0..partitions)
            .map(|partition| {
                let worker =
                    PartitionWorker::new(partition, processor.clone(), log.clone(), config.clone());
                tokio::spawn(worker.run(shutdown_tx.subscribe()))
            })
            .collect();

        info!(
            partitions,
            group = %config.consumer_group,
            "Transfer engine started"
        );

        Ok(Self {
            log,
            config,
            processor,
            audit,
            audit_task,
            shutdown_tx,
            workers,
        })
    }

    pub fn processor(&self) -> Arc<TransferProcessor> {
        self.processor.clone()
    }

    /// Waits until every partition has acknowledged everything published so far.
    ///
    /// Fails as soon as a partition with pending events has no live worker,
    /// since nothing would ever acknowledge them.
    pub async fn drain(&self) -> Result<()> {
        loop {
            let mut pending = 0;
            for (partition, worker) in self.workers.iter().enumerate() {
                let end = self
                    .log
                    .end_offset(TOPIC_TRANSACTION_INITIATED, partition)
                    .await?;
                let committed = self
                    .log
                    .committed_offset(
                        &self.config.consumer_group,
                        TOPIC_TRANSACTION_INITIATED,
                        partition,
                    )
                    .await?;
                let behind = end.saturating_sub(committed);
                if behind > 0 && worker.is_finished() {
                    let message =
                        format!("partition {partition} worker stopped, {behind} events pending");
                    return Err(TransferError::InternalError(message.into()));
                }
                pending += behind;
            }
            if pending == 0 {
                self.audit.flush().await;
                return Ok(());
            }
            debug!(pending, "Waiting for partitions to drain");
            tokio::time::sleep(self.config.fetch_wait()).await;
        }
    }

    /// Stops every worker at its next event boundary, then flushes the audit trail.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);

        let mut first_error = None;
        for worker in self.workers {
            let result = worker
                .await
                .map_err(|e| TransferError::InternalError(Box::new(e)))
                .and_then(|r| r);
            if let Err(e) = result {
                error!(error = %e, "Partition worker ended with error");
                first_error.get_or_insert(e);
            }
        }

        // The appender exits once the last emitter handle is gone.
        drop(self.processor);
        drop(self.audit);
        if let Err(e) = self.audit_task.await {
            error!(error = %e, "Audit appender panicked");
        }

        info!("Transfer engine stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

//! Application layer containing the transfer state machine and its plumbing.
//!
//! [`processor::TransferProcessor`] is the state machine itself. It is fed by
//! [`worker::PartitionWorker`]s, one per event-log partition, which pull events
//! through bounded `tokio` channels and acknowledge them only after commit.
//! Outcome publication and auditing are split out into their own components so
//! their retries never touch the ledger.

pub mod audit;
pub mod idempotency;
pub mod processor;
pub mod publisher;
pub mod retry;
pub mod worker;

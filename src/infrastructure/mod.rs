//! Adapters for the ledger store, event log and audit sink.

pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;

use crate::domain::account::AccountId;
use crate::domain::transfer::{TransferId, TransferRequest};
use crate::error::{Result, TransferError};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct TransferRow {
    transfer_id: TransferId,
    from: AccountId,
    to: AccountId,
    amount: Decimal,
}

impl From<TransferRow> for TransferRequest {
    fn from(row: TransferRow) -> Self {
        Self {
            transfer_id: row.transfer_id,
            from_account: row.from,
            to_account: row.to,
            amount: row.amount,
            requested_at: Utc::now(),
        }
    }
}

/// Reads transfer requests from a CSV source with the header
/// `transfer_id, from, to, amount`.
///
/// This reader wraps `csv::Reader` and provides an iterator over `Result<TransferRequest>`.
/// It handles whitespace trimming and flexible record lengths automatically.
pub struct TransferReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> TransferReader<R> {
    /// Creates a new `TransferReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes transfers.
    ///
    /// Amounts are not checked here: a non-positive amount is still a transfer
    /// that must end in a FAILED record.
    pub fn transfers(self) -> impl Iterator<Item = Result<TransferRequest>> {
        self.reader
            .into_deserialize::<TransferRow>()
            .map(|result| result.map(TransferRequest::from).map_err(TransferError::from))
    }
}

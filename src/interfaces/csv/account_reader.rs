use crate::domain::account::{AccountId, Balance};
use crate::error::{Result, TransferError};
use serde::Deserialize;
use std::io::Read;

/// An opening balance, one per CSV row.
#[derive(Debug, Deserialize, PartialEq)]
pub struct OpeningBalance {
    pub account: AccountId,
    pub balance: Balance,
}

/// Reads opening balances from a CSV source with the header `account, balance`.
pub struct AccountReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> AccountReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source);
        Self { reader }
    }

    pub fn accounts(self) -> impl Iterator<Item = Result<OpeningBalance>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(TransferError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reads_opening_balances() {
        let data = "account, balance\nA, 150\nB, 0.25";
        let rows: Vec<OpeningBalance> = AccountReader::new(data.as_bytes())
            .accounts()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(
            rows,
            vec![
                OpeningBalance {
                    account: "A".into(),
                    balance: Balance::new(dec!(150)),
                },
                OpeningBalance {
                    account: "B".into(),
                    balance: Balance::new(dec!(0.25)),
                },
            ]
        );
    }
}

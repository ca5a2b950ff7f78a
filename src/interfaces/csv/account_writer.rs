use crate::domain::account::Account;
use crate::error::Result;
use std::io::Write;

/// Writes account balances as CSV with the header `account,balance,version`.
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_accounts(&mut self, accounts: Vec<Account>) -> Result<()> {
        self.writer.write_record(["account", "balance", "version"])?;
        for account in accounts {
            self.writer.write_record([
                account.id.to_string(),
                account.balance.to_string(),
                account.version.to_string(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

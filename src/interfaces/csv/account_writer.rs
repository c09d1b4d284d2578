use crate::domain::account::Account;
use crate::domain::payment::LedgerEntry;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct AccountRow<'a> {
    user: &'a str,
    balance: String,
    version: u64,
}

#[derive(Serialize)]
struct EntryRow<'a> {
    kind: &'static str,
    id: &'a str,
    payment: &'a str,
    user: &'a str,
    amount: String,
    status: String,
}

/// Writes account and ledger snapshots as CSV.
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes `user,balance,version` for every account.
    pub fn write_accounts(&mut self, accounts: Vec<Account>) -> Result<()> {
        if accounts.is_empty() {
            self.writer.write_record(["user", "balance", "version"])?;
        }
        for account in &accounts {
            self.writer.serialize(AccountRow {
                user: account.user_id.as_str(),
                balance: account.balance.to_string(),
                version: account.version,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Writes `kind,id,payment,user,amount,status` for every ledger entry.
    pub fn write_entries(&mut self, entries: Vec<LedgerEntry>) -> Result<()> {
        if entries.is_empty() {
            self.writer
                .write_record(["kind", "id", "payment", "user", "amount", "status"])?;
        }
        for entry in &entries {
            let (kind, id, status) = match entry {
                LedgerEntry::Payment(p) => ("payment", p.payment_id.as_str(), p.status.to_string()),
                LedgerEntry::Refund(r) => ("refund", r.refund_id.as_str(), r.status.to_string()),
            };
            self.writer.serialize(EntryRow {
                kind,
                id,
                payment: entry.payment_id().as_str(),
                user: entry.user_id().as_str(),
                amount: entry.amount().to_string(),
                status,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

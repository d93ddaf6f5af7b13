use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::amount::AmountParseError;
use crate::model::{
    Account, AccountId, AccountKind, EntryId, NewAccount, TransactionEntry, TransferId,
    TransferOrder, TransferRequest, UserId,
};
use crate::Amount;

/// Errors that can occur when reading or writing csv files
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("cannot open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: invalid amount: {source}")]
    Amount {
        line: usize,
        source: AmountParseError,
    },

    #[error("line {line}: {reason}")]
    Invalid { line: usize, reason: String },

    #[error("failed to write csv: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush csv output: {0}")]
    Flush(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
struct AccountRow {
    owner: UserId,
    number: String,
    kind: String,
    balance: String,
    credit_limit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransferRow {
    from: AccountId,
    to: AccountId,
    amount: String,
    memo: Option<String>,
    user: Option<UserId>,
}

#[derive(Debug, Serialize)]
struct BalanceRow<'a> {
    id: AccountId,
    number: &'a str,
    kind: &'a str,
    balance: String,
    credit_limit: Option<String>,
}

#[derive(Debug, Serialize)]
struct HistoryRow<'a> {
    id: EntryId,
    account: AccountId,
    amount: String,
    r#type: &'a str,
    description: &'a str,
    counterparty: Option<AccountId>,
    transfer: Option<TransferId>,
    date: String,
}

fn reader(path: &Path) -> Result<csv::Reader<std::fs::File>, CsvError> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })
}

fn parse_amount(line: usize, raw: &str) -> Result<Amount, CsvError> {
    raw.parse()
        .map_err(|source| CsvError::Amount { line, source })
}

/// Read accounts to open from a csv file (`owner,number,kind,balance,credit_limit`)
pub fn read_accounts(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<NewAccount, CsvError>>, CsvError> {
    let reader = reader(path.as_ref())?;

    Ok(reader
        .into_deserialize::<AccountRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            let kind: AccountKind = row
                .kind
                .parse()
                .map_err(|reason| CsvError::Invalid { line, reason })?;
            let credit_limit = row
                .credit_limit
                .as_deref()
                .map(|raw| parse_amount(line, raw))
                .transpose()?;
            Ok(NewAccount {
                owner_id: row.owner,
                account_number: row.number,
                kind,
                balance: parse_amount(line, &row.balance)?,
                credit_limit,
            })
        }))
}

/// Read transfer requests from a csv file (`from,to,amount,memo,user`)
pub fn read_transfers(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<TransferOrder, CsvError>>, CsvError> {
    let reader = reader(path.as_ref())?;

    Ok(reader
        .into_deserialize::<TransferRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            Ok(TransferOrder {
                caller: row.user,
                request: TransferRequest {
                    from_account_id: row.from,
                    to_account_id: row.to,
                    amount: parse_amount(line, &row.amount)?,
                    memo: row.memo,
                },
            })
        }))
}

/// Write account balances in csv format
pub fn write_accounts<'a>(
    out: impl io::Write,
    accounts: impl IntoIterator<Item = &'a Account>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);

    for account in accounts {
        writer.serialize(BalanceRow {
            id: account.id,
            number: &account.account_number,
            kind: account.kind.as_str(),
            balance: account.balance.to_string(),
            credit_limit: account.credit_limit.map(|limit| limit.to_string()),
        })?;
    }

    writer.flush()?;
    Ok(())
}

/// Write transaction entries in csv format
pub fn write_history<'a>(
    out: impl io::Write,
    entries: impl IntoIterator<Item = &'a TransactionEntry>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);

    for entry in entries {
        writer.serialize(HistoryRow {
            id: entry.id,
            account: entry.account_id,
            amount: entry.amount.to_string(),
            r#type: entry.entry_type.as_str(),
            description: &entry.description,
            counterparty: entry.counterparty_account_id,
            transfer: entry.transfer_id,
            date: entry.date.to_rfc3339(),
        })?;
    }

    writer.flush()?;
    Ok(())
}

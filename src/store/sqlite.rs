use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::{debug, trace};

use super::{Ledger, LedgerStore, StoreError, newest_first, transfers_newest_first};
use crate::Amount;
use crate::model::{
    Account, AccountId, NewAccount, NewEntry, NewTransfer, TransactionEntry, TransferRecord,
    UserId,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id       INTEGER NOT NULL,
    account_number TEXT    NOT NULL UNIQUE,
    kind           TEXT    NOT NULL,
    balance        INTEGER NOT NULL,
    credit_limit   INTEGER,
    created_at     INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS transfers (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    from_account_id INTEGER NOT NULL REFERENCES accounts(id),
    to_account_id   INTEGER NOT NULL REFERENCES accounts(id),
    amount          INTEGER NOT NULL,
    memo            TEXT,
    date            INTEGER NOT NULL,
    status          TEXT    NOT NULL
);
CREATE TABLE IF NOT EXISTS entries (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id              INTEGER NOT NULL REFERENCES accounts(id),
    amount                  INTEGER NOT NULL,
    description             TEXT    NOT NULL,
    category                TEXT    NOT NULL,
    type                    TEXT    NOT NULL,
    date                    INTEGER NOT NULL,
    counterparty_account_id INTEGER REFERENCES accounts(id),
    transfer_id             INTEGER REFERENCES transfers(id)
);
CREATE INDEX IF NOT EXISTS entries_account ON entries(account_id);
CREATE INDEX IF NOT EXISTS entries_counterparty ON entries(counterparty_account_id);
CREATE INDEX IF NOT EXISTS accounts_owner ON accounts(owner_id);
";

const ACCOUNT_COLUMNS: &str =
    "id, owner_id, account_number, kind, balance, credit_limit, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, description, category, type, date, \
     counterparty_account_id, transfer_id";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, memo, date, status";

/// Ledger store backed by a SQLite database.
///
/// One connection is shared behind a mutex; every unit of work runs inside an
/// immediate transaction on it, which serializes writers across processes too.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and make sure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened ledger database");
        Self::with_connection(conn)
    }

    /// Private database living as long as the store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

/// Timestamps are stored as microseconds since the epoch.
fn to_micros(date: DateTime<Utc>) -> i64 {
    date.timestamp_micros()
}

fn from_micros(micros: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| rusqlite::Error::IntegralValueOutOfRange(0, micros))
}

/// What a timestamp looks like after a trip through the database.
fn stored(date: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(to_micros(date)).unwrap_or(date)
}

fn parse_column<T: std::str::FromStr<Err = String>>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn row_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let id: i64 = row.get(idx)?;
    u64::try_from(id).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, id))
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        account_number: row.get(2)?,
        kind: parse_column(row, 3)?,
        balance: Amount::from_cents(row.get(4)?),
        credit_limit: row.get::<_, Option<i64>>(5)?.map(Amount::from_cents),
        created_at: from_micros(row.get(6)?)?,
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<TransactionEntry> {
    Ok(TransactionEntry {
        id: row_id(row, 0)?,
        account_id: row.get(1)?,
        amount: Amount::from_cents(row.get(2)?),
        description: row.get(3)?,
        category: row.get(4)?,
        entry_type: parse_column(row, 5)?,
        date: from_micros(row.get(6)?)?,
        counterparty_account_id: row.get(7)?,
        transfer_id: row
            .get::<_, Option<i64>>(8)?
            .map(|id| u64::try_from(id).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(8, id)))
            .transpose()?,
    })
}

fn transfer_from_row(row: &Row<'_>) -> rusqlite::Result<TransferRecord> {
    Ok(TransferRecord {
        id: row_id(row, 0)?,
        from_account_id: row.get(1)?,
        to_account_id: row.get(2)?,
        amount: Amount::from_cents(row.get(3)?),
        memo: row.get(4)?,
        date: from_micros(row.get(5)?)?,
        status: parse_column(row, 6)?,
    })
}

fn select_account(conn: &Connection, id: AccountId) -> Result<Account, StoreError> {
    conn.query_row(
        &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
        params![id],
        account_from_row,
    )
    .optional()?
    .ok_or(StoreError::AccountNotFound(id))
}

impl LedgerStore for SqliteStore {
    fn open_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        account.validate().map_err(StoreError::InvalidAccount)?;

        let conn = self.conn()?;
        let taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM accounts WHERE account_number = ?1)",
            params![account.account_number],
            |row| row.get(0),
        )?;
        if taken {
            return Err(StoreError::InvalidAccount(format!(
                "account number '{}' already exists",
                account.account_number
            )));
        }

        let created_at = stored(Utc::now());
        conn.execute(
            "INSERT INTO accounts (owner_id, account_number, kind, balance, credit_limit, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                account.owner_id,
                account.account_number,
                account.kind.as_str(),
                account.balance.cents(),
                account.credit_limit.map(Amount::cents),
                to_micros(created_at),
            ],
        )?;
        let id = AccountId::try_from(conn.last_insert_rowid())
            .map_err(|_| StoreError::Backend("account id out of range".to_string()))?;
        Ok(account.into_account(id, created_at))
    }

    fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        let conn = self.conn()?;
        select_account(&conn, id)
    }

    fn get_account_by_number(&self, number: &str) -> Result<Account, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_number = ?1"),
            params![number],
            account_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::AccountNumberNotFound(number.to_string()))
    }

    fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id"))?;
        let accounts = stmt
            .query_map([], account_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    fn accounts_for_owner(&self, owner: UserId) -> Result<Vec<Account>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE owner_id = ?1 ORDER BY id"
        ))?;
        let accounts = stmt
            .query_map(params![owner], account_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    fn list_entries_for_account(
        &self,
        id: AccountId,
    ) -> Result<Vec<TransactionEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE account_id = ?1 OR counterparty_account_id = ?1
             ORDER BY date DESC, id DESC"
        ))?;
        let entries = stmt
            .query_map(params![id], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn list_entries_for_user(&self, owner: UserId) -> Result<Vec<TransactionEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE account_id IN (SELECT id FROM accounts WHERE owner_id = ?1)
                OR counterparty_account_id IN (SELECT id FROM accounts WHERE owner_id = ?1)"
        ))?;
        let entries = stmt
            .query_map(params![owner], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(newest_first(entries))
    }

    fn list_transfers_for_user(&self, owner: UserId) -> Result<Vec<TransferRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers
             WHERE from_account_id IN (SELECT id FROM accounts WHERE owner_id = ?1)
                OR to_account_id IN (SELECT id FROM accounts WHERE owner_id = ?1)"
        ))?;
        let transfers = stmt
            .query_map(params![owner], transfer_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(transfers_newest_first(transfers))
    }

    fn atomically<T, E, F>(&self, accounts: &[AccountId], work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Ledger) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        trace!(accounts = ?accounts, "sqlite unit of work started");

        let value = work(&mut SqliteUnit {
            tx: &tx,
            locked: accounts,
        })?;
        // dropping `tx` on the error path above rolls the unit back
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }
}

struct SqliteUnit<'a> {
    tx: &'a rusqlite::Transaction<'a>,
    /// Balances outside this set belong to no unit of ours.
    locked: &'a [AccountId],
}

impl Ledger for SqliteUnit<'_> {
    fn account(&self, id: AccountId) -> Result<Account, StoreError> {
        select_account(self.tx, id)
    }

    fn adjust_balance(&mut self, id: AccountId, delta: Amount) -> Result<Account, StoreError> {
        let account = select_account(self.tx, id)?;
        if !self.locked.contains(&id) {
            return Err(StoreError::NotLocked(id));
        }
        let balance = account
            .balance
            .checked_add(delta)
            .ok_or(StoreError::Overflow(id))?;
        self.tx.execute(
            "UPDATE accounts SET balance = ?1 WHERE id = ?2",
            params![balance.cents(), id],
        )?;
        Ok(Account { balance, ..account })
    }

    fn append_entry(&mut self, entry: NewEntry) -> Result<TransactionEntry, StoreError> {
        let entry = NewEntry {
            date: stored(entry.date),
            ..entry
        };
        let transfer_id = entry.transfer_id.map(sql_id).transpose()?;
        self.tx.execute(
            "INSERT INTO entries (account_id, amount, description, category, type, date,
                                  counterparty_account_id, transfer_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.account_id,
                entry.amount.cents(),
                entry.description,
                entry.category,
                entry.entry_type.as_str(),
                to_micros(entry.date),
                entry.counterparty_account_id,
                transfer_id,
            ],
        )?;
        let id = row_id_of(self.tx.last_insert_rowid())?;
        Ok(entry.into_entry(id))
    }

    fn append_transfer(&mut self, record: NewTransfer) -> Result<TransferRecord, StoreError> {
        let record = NewTransfer {
            date: stored(record.date),
            ..record
        };
        self.tx.execute(
            "INSERT INTO transfers (from_account_id, to_account_id, amount, memo, date, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.from_account_id,
                record.to_account_id,
                record.amount.cents(),
                record.memo,
                to_micros(record.date),
                record.status.as_str(),
            ],
        )?;
        let id = row_id_of(self.tx.last_insert_rowid())?;
        Ok(record.into_record(id))
    }
}

fn row_id_of(rowid: i64) -> Result<u64, StoreError> {
    u64::try_from(rowid).map_err(|_| StoreError::Backend(format!("negative row id {rowid}")))
}

fn sql_id(id: u64) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| StoreError::Backend(format!("row id {id} out of range")))
}

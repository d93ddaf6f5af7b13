//! Ledger storage.
//!
//! [`LedgerStore`] is the capability the engine and the history projector are
//! written against. Two backends implement it:
//!
//! - [`MemoryStore`]: map-backed, with one mutex per account as the
//!   serialization point.
//! - [`SqliteStore`]: a SQLite database, where every unit of work is an
//!   immediate transaction.
//!
//! Balance-affecting writes go through [`LedgerStore::atomically`]: the work
//! closure sees a [`Ledger`] view, and either every write it stages is
//! published at once or none is.

use std::cmp::Reverse;
use std::collections::HashSet;

use thiserror::Error;

use crate::Amount;
use crate::model::{
    Account, AccountId, NewAccount, NewEntry, NewTransfer, TransactionEntry, TransferRecord,
    UserId,
};

mod memory;
pub use memory::MemoryStore;

mod sqlite;
pub use sqlite::SqliteStore;

/// Storage-layer failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("account number '{0}' not found")]
    AccountNumberNotFound(String),

    #[error("invalid account: {0}")]
    InvalidAccount(String),

    #[error("account {0} is not locked by this unit of work")]
    NotLocked(AccountId),

    #[error("balance of account {0} would overflow")]
    Overflow(AccountId),

    #[error("lock poisoned")]
    Poisoned,

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Read/write view handed to a unit of work.
///
/// Reads reflect writes already staged by the same unit.
pub trait Ledger {
    fn account(&self, id: AccountId) -> Result<Account, StoreError>;

    /// Add `delta` to the account balance and return the updated account.
    fn adjust_balance(&mut self, id: AccountId, delta: Amount) -> Result<Account, StoreError>;

    fn append_entry(&mut self, entry: NewEntry) -> Result<TransactionEntry, StoreError>;

    fn append_transfer(&mut self, record: NewTransfer) -> Result<TransferRecord, StoreError>;
}

/// Durable keyed storage for accounts, entries and transfer records.
///
/// Every read returns owned copies. Nothing is ever deleted, and accounts are
/// only mutated through `adjust_balance`.
pub trait LedgerStore: Send + Sync {
    /// Provision a new account with its seed balance.
    fn open_account(&self, account: NewAccount) -> Result<Account, StoreError>;

    fn get_account(&self, id: AccountId) -> Result<Account, StoreError>;

    fn get_account_by_number(&self, number: &str) -> Result<Account, StoreError>;

    /// Every account, in id order, read from one snapshot.
    fn list_accounts(&self) -> Result<Vec<Account>, StoreError>;

    fn accounts_for_owner(&self, owner: UserId) -> Result<Vec<Account>, StoreError>;

    /// Entries belonging to the account or naming it as counterparty, newest first.
    fn list_entries_for_account(&self, id: AccountId)
    -> Result<Vec<TransactionEntry>, StoreError>;

    /// Entries touching any account of `owner`, newest first, without duplicates.
    fn list_entries_for_user(&self, owner: UserId) -> Result<Vec<TransactionEntry>, StoreError>;

    /// Transfers from or to any account of `owner`, newest first.
    fn list_transfers_for_user(&self, owner: UserId) -> Result<Vec<TransferRecord>, StoreError>;

    /// Run `work` as one all-or-nothing unit.
    ///
    /// The serialization points of `accounts` are taken in ascending id order
    /// and held until the unit is published or discarded. Writes staged by
    /// `work` become visible together when it returns `Ok`, and are dropped
    /// when it returns `Err`.
    fn atomically<T, E, F>(&self, accounts: &[AccountId], work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Ledger) -> Result<T, E>,
        E: From<StoreError>;

    fn adjust_balance(&self, id: AccountId, delta: Amount) -> Result<Account, StoreError> {
        self.atomically(&[id], |ledger| ledger.adjust_balance(id, delta))
    }

    fn append_entry(&self, entry: NewEntry) -> Result<TransactionEntry, StoreError> {
        self.atomically(&[], |ledger| ledger.append_entry(entry))
    }

    fn append_transfer(&self, record: NewTransfer) -> Result<TransferRecord, StoreError> {
        self.atomically(&[], |ledger| ledger.append_transfer(record))
    }
}

/// Sort newest first (ties by descending id) and drop repeated entries.
pub(crate) fn newest_first(mut entries: Vec<TransactionEntry>) -> Vec<TransactionEntry> {
    let mut seen = HashSet::with_capacity(entries.len());
    entries.retain(|e| seen.insert(e.id));
    entries.sort_by_key(|e| Reverse((e.date, e.id)));
    entries
}

pub(crate) fn transfers_newest_first(mut transfers: Vec<TransferRecord>) -> Vec<TransferRecord> {
    transfers.sort_by_key(|t| Reverse((t.date, t.id)));
    transfers
}

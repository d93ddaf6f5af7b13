use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::trace;

use super::{Ledger, LedgerStore, StoreError, newest_first, transfers_newest_first};
use crate::Amount;
use crate::model::{
    Account, AccountId, EntryId, NewAccount, NewEntry, NewTransfer, TransactionEntry,
    TransferId, TransferRecord, UserId,
};

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    entries: Vec<TransactionEntry>,
    transfers: Vec<TransferRecord>,
    next_account_id: AccountId,
}

/// In-memory ledger store.
///
/// Each account has its own mutex, held for the whole of a unit of work that
/// touches it. Staged writes are published under a short write lock on the
/// tables, so readers see either all of a unit or none of it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    account_locks: Mutex<HashMap<AccountId, Arc<Mutex<()>>>>,
    next_entry_id: AtomicU64,
    next_transfer_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }

    /// Serialization points for `accounts`, sorted by id and deduplicated.
    fn account_locks(&self, accounts: &[AccountId]) -> Result<Vec<Arc<Mutex<()>>>, StoreError> {
        let mut ids = accounts.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut locks = self.account_locks.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(ids
            .into_iter()
            .map(|id| Arc::clone(locks.entry(id).or_default()))
            .collect())
    }

    /// Ids start at 1, like a database sequence.
    fn next_id(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn publish(&self, unit: MemoryUnit<'_>) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if unit
            .balances
            .keys()
            .any(|id| !tables.accounts.contains_key(id))
        {
            return Err(StoreError::Backend(
                "staged balance for an unknown account".to_string(),
            ));
        }
        for (id, balance) in unit.balances {
            if let Some(account) = tables.accounts.get_mut(&id) {
                account.balance = balance;
            }
        }
        tables.entries.extend(unit.entries);
        tables.transfers.extend(unit.transfers);
        Ok(())
    }
}

impl LedgerStore for MemoryStore {
    fn open_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        account.validate().map_err(StoreError::InvalidAccount)?;

        let mut tables = self.write()?;
        if tables
            .accounts
            .values()
            .any(|a| a.account_number == account.account_number)
        {
            return Err(StoreError::InvalidAccount(format!(
                "account number '{}' already exists",
                account.account_number
            )));
        }

        tables.next_account_id += 1;
        let account = account.into_account(tables.next_account_id, Utc::now());
        tables.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        self.read()?
            .accounts
            .get(&id)
            .cloned()
            .ok_or(StoreError::AccountNotFound(id))
    }

    fn get_account_by_number(&self, number: &str) -> Result<Account, StoreError> {
        self.read()?
            .accounts
            .values()
            .find(|a| a.account_number == number)
            .cloned()
            .ok_or_else(|| StoreError::AccountNumberNotFound(number.to_string()))
    }

    fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self.read()?.accounts.values().cloned().collect())
    }

    fn accounts_for_owner(&self, owner: UserId) -> Result<Vec<Account>, StoreError> {
        Ok(self
            .read()?
            .accounts
            .values()
            .filter(|a| a.owner_id == owner)
            .cloned()
            .collect())
    }

    fn list_entries_for_account(
        &self,
        id: AccountId,
    ) -> Result<Vec<TransactionEntry>, StoreError> {
        let entries = self
            .read()?
            .entries
            .iter()
            .filter(|e| e.account_id == id || e.counterparty_account_id == Some(id))
            .cloned()
            .collect();
        Ok(newest_first(entries))
    }

    fn list_entries_for_user(&self, owner: UserId) -> Result<Vec<TransactionEntry>, StoreError> {
        let tables = self.read()?;
        let owned = |id: &AccountId| {
            tables
                .accounts
                .get(id)
                .is_some_and(|a| a.owner_id == owner)
        };
        let entries = tables
            .entries
            .iter()
            .filter(|e| owned(&e.account_id) || e.counterparty_account_id.is_some_and(|c| owned(&c)))
            .cloned()
            .collect();
        Ok(newest_first(entries))
    }

    fn list_transfers_for_user(&self, owner: UserId) -> Result<Vec<TransferRecord>, StoreError> {
        let tables = self.read()?;
        let owned = |id: &AccountId| {
            tables
                .accounts
                .get(id)
                .is_some_and(|a| a.owner_id == owner)
        };
        let transfers = tables
            .transfers
            .iter()
            .filter(|t| owned(&t.from_account_id) || owned(&t.to_account_id))
            .cloned()
            .collect();
        Ok(transfers_newest_first(transfers))
    }

    fn atomically<T, E, F>(&self, accounts: &[AccountId], work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Ledger) -> Result<T, E>,
        E: From<StoreError>,
    {
        let locks = self.account_locks(accounts)?;
        let _guards = locks
            .iter()
            .map(|lock| lock.lock().map_err(|_| StoreError::Poisoned))
            .collect::<Result<Vec<_>, _>>()?;
        trace!(accounts = ?accounts, "account locks acquired");

        let mut unit = MemoryUnit {
            store: self,
            locked: accounts,
            balances: HashMap::new(),
            entries: Vec::new(),
            transfers: Vec::new(),
        };
        let value = work(&mut unit)?;
        self.publish(unit)?;
        Ok(value)
    }
}

/// Writes staged by one unit of work.
struct MemoryUnit<'a> {
    store: &'a MemoryStore,
    locked: &'a [AccountId],
    balances: HashMap<AccountId, Amount>,
    entries: Vec<TransactionEntry>,
    transfers: Vec<TransferRecord>,
}

impl Ledger for MemoryUnit<'_> {
    fn account(&self, id: AccountId) -> Result<Account, StoreError> {
        let mut account = self.store.get_account(id)?;
        if let Some(balance) = self.balances.get(&id) {
            account.balance = *balance;
        }
        Ok(account)
    }

    fn adjust_balance(&mut self, id: AccountId, delta: Amount) -> Result<Account, StoreError> {
        let mut account = self.account(id)?;
        if !self.locked.contains(&id) {
            return Err(StoreError::NotLocked(id));
        }
        account.balance = account
            .balance
            .checked_add(delta)
            .ok_or(StoreError::Overflow(id))?;
        self.balances.insert(id, account.balance);
        Ok(account)
    }

    fn append_entry(&mut self, entry: NewEntry) -> Result<TransactionEntry, StoreError> {
        let id: EntryId = MemoryStore::next_id(&self.store.next_entry_id);
        let entry = entry.into_entry(id);
        self.entries.push(entry.clone());
        Ok(entry)
    }

    fn append_transfer(&mut self, record: NewTransfer) -> Result<TransferRecord, StoreError> {
        let id: TransferId = MemoryStore::next_id(&self.store.next_transfer_id);
        let record = record.into_record(id);
        self.transfers.push(record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract::store_contract_tests;

    store_contract_tests!(MemoryStore::new());

    #[test]
    fn overflow_is_reported_not_wrapped() {
        let store = MemoryStore::new();
        let a = store
            .open_account(NewAccount::checking(1, "A", Amount::from_cents(i64::MAX)))
            .unwrap();
        assert!(matches!(
            store.adjust_balance(a.id, Amount::from_cents(1)),
            Err(StoreError::Overflow(_))
        ));
        assert_eq!(store.get_account(a.id).unwrap().balance, a.balance);
    }

    #[test]
    fn account_ids_are_sequential_from_one() {
        let store = MemoryStore::new();
        let a = store
            .open_account(NewAccount::checking(1, "A", Amount::ZERO))
            .unwrap();
        let b = store
            .open_account(NewAccount::checking(1, "B", Amount::ZERO))
            .unwrap();
        assert_eq!((a.id, b.id), (1, 2));
    }

    #[test]
    fn same_account_twice_locks_once() {
        let store = MemoryStore::new();
        let a = store
            .open_account(NewAccount::checking(1, "A", Amount::ZERO))
            .unwrap();
        // would deadlock if the id were locked twice
        let result: Result<(), StoreError> = store.atomically(&[a.id, a.id], |_| Ok(()));
        assert!(result.is_ok());
    }
}

//! Read-side views over the ledger.

use crate::model::{AccountId, TransactionEntry, TransferRecord, UserId};
use crate::store::{LedgerStore, StoreError, newest_first, transfers_newest_first};

/// Transaction history projections. Read-only, derived entirely from the store.
pub struct History<'a, S> {
    store: &'a S,
}

impl<'a, S: LedgerStore> History<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Entries of the account, plus outflows elsewhere naming it as counterparty.
    pub fn account_history(&self, account: AccountId) -> Result<Vec<TransactionEntry>, StoreError> {
        Ok(newest_first(self.store.list_entries_for_account(account)?))
    }

    /// Union of the histories of every account the user owns.
    pub fn user_history(&self, user: UserId) -> Result<Vec<TransactionEntry>, StoreError> {
        Ok(newest_first(self.store.list_entries_for_user(user)?))
    }

    pub fn user_transfers(&self, user: UserId) -> Result<Vec<TransferRecord>, StoreError> {
        Ok(transfers_newest_first(
            self.store.list_transfers_for_user(user)?,
        ))
    }
}

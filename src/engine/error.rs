//! Error types for transfer execution.

use thiserror::Error;

use crate::Amount;
use crate::invariant::InsufficientFunds;
use crate::model::{AccountId, UserId};
use crate::store::StoreError;

/// Error returned by [`Engine::execute`](super::Engine::execute).
///
/// Everything except `StorageFault` is a rejection: detected before any
/// mutation, and only worth retrying with a different request.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("invalid amount {0}: transfers must be positive")]
    InvalidAmount(Amount),

    #[error("cannot transfer from account {0} to itself")]
    SameAccount(AccountId),

    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error(transparent)]
    InsufficientFunds(#[from] InsufficientFunds),

    #[error("user {caller} does not own account {account}")]
    NotOwner { account: AccountId, caller: UserId },

    #[error("storage fault, transfer did not complete: {0}")]
    StorageFault(#[source] StoreError),
}

impl TransferError {
    pub fn is_rejection(&self) -> bool {
        !matches!(self, TransferError::StorageFault(_))
    }
}

impl From<StoreError> for TransferError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AccountNotFound(id) => TransferError::AccountNotFound(id),
            other => TransferError::StorageFault(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_account_maps_to_rejection() {
        let err = TransferError::from(StoreError::AccountNotFound(3));
        assert!(matches!(err, TransferError::AccountNotFound(3)));
        assert!(err.is_rejection());
    }

    #[test]
    fn other_store_errors_are_faults() {
        let err = TransferError::from(StoreError::Poisoned);
        assert!(matches!(err, TransferError::StorageFault(StoreError::Poisoned)));
        assert!(!err.is_rejection());
    }

    #[test]
    fn messages_carry_details() {
        let err = TransferError::from(InsufficientFunds {
            account: 4,
            requested: Amount::from_cents(1_000_000),
            shortfall: Amount::from_cents(995_000),
        });
        assert_eq!(
            err.to_string(),
            "insufficient funds in account 4: requested 10000.00, short by 9950.00"
        );
        assert_eq!(
            TransferError::NotOwner {
                account: 1,
                caller: 9
            }
            .to_string(),
            "user 9 does not own account 1"
        );
    }
}

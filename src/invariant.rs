//! Funds-availability rule applied before any debit.
//!
//! Checking and savings accounts may not go below zero. Credit accounts carry
//! debt, which may not exceed the credit limit (an absent limit is zero).

use thiserror::Error;

use crate::Amount;
use crate::model::{Account, AccountId};

/// A debit was refused because the account cannot cover it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("insufficient funds in account {account}: requested {requested}, short by {shortfall}")]
pub struct InsufficientFunds {
    pub account: AccountId,
    pub requested: Amount,
    pub shortfall: Amount,
}

/// Decide whether `amount` (positive, "withdraw this much") may leave `account`.
///
/// This only looks at the given snapshot. Callers must run it again under the
/// account lock right before committing the debit.
pub fn check_debit(account: &Account, amount: Amount) -> Result<(), InsufficientFunds> {
    let shortfall = if account.kind.is_credit() {
        let limit = account.credit_limit.unwrap_or_default();
        account
            .balance
            .checked_add(amount)
            .and_then(|debt| debt.checked_sub(limit))
    } else {
        amount.checked_sub(account.balance)
    };
    // a debt too large to represent is past any limit
    let shortfall = shortfall.unwrap_or(Amount::MAX);

    if shortfall.is_positive() {
        return Err(InsufficientFunds {
            account: account.id,
            requested: amount,
            shortfall,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewAccount;
    use chrono::Utc;

    fn checking(balance: i64) -> Account {
        NewAccount::checking(1, "K-1", Amount::from_cents(balance)).into_account(1, Utc::now())
    }

    fn credit(balance: i64, limit: Option<i64>) -> Account {
        let mut account = NewAccount::credit(1, "C-1", Amount::from_cents(balance), Amount::ZERO);
        account.credit_limit = limit.map(Amount::from_cents);
        account.into_account(2, Utc::now())
    }

    #[test]
    fn debit_within_balance_is_accepted() {
        assert!(check_debit(&checking(500), Amount::from_cents(200)).is_ok());
    }

    #[test]
    fn debit_of_entire_balance_is_accepted() {
        assert!(check_debit(&checking(500), Amount::from_cents(500)).is_ok());
    }

    #[test]
    fn overdraft_is_rejected_with_shortfall() {
        let err = check_debit(&checking(5_000), Amount::from_cents(1_000_000)).unwrap_err();
        assert_eq!(
            err,
            InsufficientFunds {
                account: 1,
                requested: Amount::from_cents(1_000_000),
                shortfall: Amount::from_cents(995_000),
            }
        );
    }

    #[test]
    fn credit_debit_up_to_limit_is_accepted() {
        assert!(check_debit(&credit(700, Some(1_000)), Amount::from_cents(300)).is_ok());
    }

    #[test]
    fn credit_debit_past_limit_is_rejected() {
        let err = check_debit(&credit(700, Some(1_000)), Amount::from_cents(301)).unwrap_err();
        assert_eq!(err.shortfall, Amount::from_cents(1));
        assert_eq!(err.account, 2);
    }

    #[test]
    fn credit_without_limit_behaves_as_zero_limit() {
        assert!(check_debit(&credit(0, None), Amount::from_cents(1)).is_err());
        // an overpaid card can still spend its credit balance
        assert!(check_debit(&credit(-100, None), Amount::from_cents(100)).is_ok());
    }

    #[test]
    fn debt_past_the_representable_range_is_rejected() {
        let huge = "92233720368547758.07".parse::<Amount>().unwrap();
        let err = check_debit(&credit(100, Some(100_000)), huge).unwrap_err();
        assert_eq!(err.requested, huge);
        assert_eq!(err.shortfall, Amount::MAX);
    }

    #[test]
    fn debit_against_a_negative_balance_does_not_wrap() {
        let err = check_debit(&checking(-1), Amount::MAX).unwrap_err();
        assert_eq!(err.shortfall, Amount::MAX);
    }
}

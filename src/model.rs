//! Core domain types for the ledger engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Amount;

/// Account identifier.
pub type AccountId = u32;

/// Identifier of the user owning an account.
pub type UserId = u32;

/// Transaction entry identifier.
pub type EntryId = u64;

/// Transfer record identifier.
pub type TransferId = u64;

/// The kind of an account decides which funds-availability rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Checking,
    Savings,
    /// Balance is outstanding debt, bounded above by the credit limit.
    Credit,
}

impl AccountKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountKind::Checking => "checking",
            AccountKind::Savings => "savings",
            AccountKind::Credit => "credit",
        }
    }

    pub fn is_credit(self) -> bool {
        self == AccountKind::Credit
    }

    /// Balance delta applied when `amount` leaves an account of this kind.
    pub fn debit_delta(self, amount: Amount) -> Amount {
        match self {
            AccountKind::Credit => amount,
            AccountKind::Checking | AccountKind::Savings => -amount,
        }
    }

    /// Balance delta applied when `amount` enters an account of this kind.
    pub fn credit_delta(self, amount: Amount) -> Amount {
        -self.debit_delta(amount)
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checking" => Ok(AccountKind::Checking),
            "savings" => Ok(AccountKind::Savings),
            "credit" => Ok(AccountKind::Credit),
            other => Err(format!("unknown account kind '{other}'")),
        }
    }
}

/// A ledger account. Only the balance ever changes after opening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    pub owner_id: UserId,
    pub account_number: String,
    pub kind: AccountKind,
    pub balance: Amount,
    /// Only present on credit accounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_limit: Option<Amount>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Signed funds held by the account: debt on a credit account counts negative.
    pub fn net_position(&self) -> Amount {
        if self.kind.is_credit() {
            -self.balance
        } else {
            self.balance
        }
    }
}

/// Input to account provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub owner_id: UserId,
    pub account_number: String,
    pub kind: AccountKind,
    pub balance: Amount,
    pub credit_limit: Option<Amount>,
}

impl NewAccount {
    pub fn checking(owner_id: UserId, account_number: impl Into<String>, balance: Amount) -> Self {
        Self {
            owner_id,
            account_number: account_number.into(),
            kind: AccountKind::Checking,
            balance,
            credit_limit: None,
        }
    }

    pub fn savings(owner_id: UserId, account_number: impl Into<String>, balance: Amount) -> Self {
        Self {
            kind: AccountKind::Savings,
            ..Self::checking(owner_id, account_number, balance)
        }
    }

    pub fn credit(
        owner_id: UserId,
        account_number: impl Into<String>,
        balance: Amount,
        credit_limit: Amount,
    ) -> Self {
        Self {
            owner_id,
            account_number: account_number.into(),
            kind: AccountKind::Credit,
            balance,
            credit_limit: Some(credit_limit),
        }
    }

    /// Check the opening invariants, returning a description of the first violation.
    pub fn validate(&self) -> Result<(), String> {
        if self.account_number.trim().is_empty() {
            return Err("account number must not be empty".to_string());
        }
        match (self.kind, self.credit_limit) {
            (AccountKind::Credit, Some(limit)) if limit.is_negative() => {
                Err(format!("credit limit {limit} must not be negative"))
            }
            (AccountKind::Credit, limit) if self.balance > limit.unwrap_or_default() => {
                Err(format!(
                    "opening debt {} exceeds credit limit {}",
                    self.balance,
                    limit.unwrap_or_default()
                ))
            }
            (AccountKind::Credit, _) => Ok(()),
            (kind, Some(_)) => Err(format!("{kind} account cannot carry a credit limit")),
            (_, None) if self.balance.is_negative() => Err(format!(
                "opening balance {} must not be negative",
                self.balance
            )),
            (_, None) => Ok(()),
        }
    }

    pub fn into_account(self, id: AccountId, created_at: DateTime<Utc>) -> Account {
        Account {
            id,
            owner_id: self.owner_id,
            account_number: self.account_number,
            kind: self.kind,
            balance: self.balance,
            credit_limit: self.credit_limit,
            created_at,
        }
    }
}

/// Kind of movement an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Deposit,
    Withdrawal,
    Transfer,
}

impl EntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryType::Deposit => "deposit",
            EntryType::Withdrawal => "withdrawal",
            EntryType::Transfer => "transfer",
        }
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(EntryType::Deposit),
            "withdrawal" => Ok(EntryType::Withdrawal),
            "transfer" => Ok(EntryType::Transfer),
            other => Err(format!("unknown entry type '{other}'")),
        }
    }
}

/// One leg of the append-only audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEntry {
    pub id: EntryId,
    pub account_id: AccountId,
    /// Negative for outflow, positive for inflow.
    pub amount: Amount,
    pub description: String,
    pub category: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub date: DateTime<Utc>,
    /// Destination account, set on the outflow leg of a transfer only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_account_id: Option<AccountId>,
    /// Transfer record that produced this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<TransferId>,
}

/// An entry waiting for its identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub account_id: AccountId,
    pub amount: Amount,
    pub description: String,
    pub category: String,
    pub entry_type: EntryType,
    pub date: DateTime<Utc>,
    pub counterparty_account_id: Option<AccountId>,
    pub transfer_id: Option<TransferId>,
}

impl NewEntry {
    pub fn into_entry(self, id: EntryId) -> TransactionEntry {
        TransactionEntry {
            id,
            account_id: self.account_id,
            amount: self.amount,
            description: self.description,
            category: self.category,
            entry_type: self.entry_type,
            date: self.date,
            counterparty_account_id: self.counterparty_account_id,
            transfer_id: self.transfer_id,
        }
    }
}

/// Outcome of a transfer. The engine only ever produces `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        }
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(TransferStatus::Completed),
            "failed" => Ok(TransferStatus::Failed),
            other => Err(format!("unknown transfer status '{other}'")),
        }
    }
}

/// The causal unit behind a pair of transfer entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    /// Always positive.
    pub amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    pub date: DateTime<Utc>,
    pub status: TransferStatus,
}

/// A transfer record waiting for its identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Amount,
    pub memo: Option<String>,
    pub date: DateTime<Utc>,
    pub status: TransferStatus,
}

impl NewTransfer {
    pub fn into_record(self, id: TransferId) -> TransferRecord {
        TransferRecord {
            id,
            from_account_id: self.from_account_id,
            to_account_id: self.to_account_id,
            amount: self.amount,
            memo: self.memo,
            date: self.date,
            status: self.status,
        }
    }
}

/// A request to move `amount` from one account to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Amount,
    #[serde(default)]
    pub memo: Option<String>,
}

impl TransferRequest {
    pub fn new(from: AccountId, to: AccountId, amount: Amount) -> Self {
        Self {
            from_account_id: from,
            to_account_id: to,
            amount,
            memo: None,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }
}

/// A transfer request, optionally submitted on behalf of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOrder {
    pub caller: Option<UserId>,
    pub request: TransferRequest,
}

impl From<TransferRequest> for TransferOrder {
    fn from(request: TransferRequest) -> Self {
        Self {
            caller: None,
            request,
        }
    }
}

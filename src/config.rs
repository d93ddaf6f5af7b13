//! Command-line configuration of the `ledger-eng` binary.

use std::path::PathBuf;

use clap::Parser;

use crate::model::UserId;

/// Execute a csv file of transfer requests against a double-entry ledger.
#[derive(Debug, Clone, Parser)]
#[command(name = "ledger-eng", version)]
pub struct Config {
    /// Transfer requests (`from,to,amount,memo,user`)
    pub transfers: PathBuf,

    /// Accounts to open before executing transfers (`owner,number,kind,balance,credit_limit`)
    #[arg(long, env = "LEDGER_ACCOUNTS")]
    pub accounts: Option<PathBuf>,

    /// SQLite database holding the ledger; kept in memory when absent
    #[arg(long, env = "LEDGER_DATABASE")]
    pub database: Option<PathBuf>,

    /// Print the transaction history of this user instead of account balances
    #[arg(long, value_name = "USER")]
    pub history: Option<UserId>,
}

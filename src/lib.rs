pub mod amount;
pub mod config;
pub mod csv;
pub mod engine;
pub mod history;
pub mod invariant;
pub mod model;
pub mod store;

pub use amount::Amount;
pub use engine::{Engine, RunSummary, TransferError};
pub use history::History;
pub use model::{Account, AccountId, TransferRecord, TransferRequest, UserId};
pub use store::{LedgerStore, MemoryStore, SqliteStore, StoreError};

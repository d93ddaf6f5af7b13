//! Transfer engine.
//!
//! The engine moves funds between two accounts as one unit: validate, check
//! funds, debit the source, credit the destination, then record two paired
//! entries and a transfer record. Also supports running a stream of requests
//! concurrently.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_stream::{Stream, StreamExt};
use tracing::{error, info};

use crate::history::History;
use crate::invariant;
use crate::model::{
    EntryType, NewEntry, NewTransfer, TransferOrder, TransferRecord, TransferRequest,
    TransferStatus, UserId,
};
use crate::store::LedgerStore;

mod state;
pub use state::TransferState;

mod error;
pub use error::TransferError;

const TRANSFER_CATEGORY: &str = "Transfer";

/// Outcome counts of [`Engine::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub completed: usize,
    pub rejected: usize,
    pub failed: usize,
}

/// The transfer engine, generic over its ledger store.
pub struct Engine<S> {
    store: S,
}

/// Public API
impl<S: LedgerStore> Engine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Read-side views over the same store.
    pub fn history(&self) -> History<'_, S> {
        History::new(&self.store)
    }

    /// Execute one transfer.
    pub fn execute(&self, request: TransferRequest) -> Result<TransferRecord, TransferError> {
        self.execute_as(None, request)
    }

    /// Execute one transfer on behalf of `caller`, who must own the source account.
    pub fn execute_for(
        &self,
        caller: UserId,
        request: TransferRequest,
    ) -> Result<TransferRecord, TransferError> {
        self.execute_as(Some(caller), request)
    }

    pub fn submit(&self, order: TransferOrder) -> Result<TransferRecord, TransferError> {
        self.execute_as(order.caller, order.request)
    }
}

impl<S: LedgerStore + 'static> Engine<S> {
    /// Run every order of the stream on the blocking pool, concurrently.
    ///
    /// Failed transfers are counted and logged, they never stop the run.
    pub async fn run(
        self: Arc<Self>,
        mut stream: impl Stream<Item = TransferOrder> + Unpin,
    ) -> RunSummary {
        let mut tasks = JoinSet::new();
        while let Some(order) = stream.next().await {
            let engine = Arc::clone(&self);
            tasks.spawn_blocking(move || engine.submit(order));
        }

        let mut summary = RunSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(_)) => summary.completed += 1,
                Ok(Err(e)) if e.is_rejection() => summary.rejected += 1,
                Ok(Err(_)) => summary.failed += 1,
                Err(e) => {
                    error!(reason = %e, "transfer task did not finish");
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}

/// Private API
impl<S: LedgerStore> Engine<S> {
    fn execute_as(
        &self,
        caller: Option<UserId>,
        request: TransferRequest,
    ) -> Result<TransferRecord, TransferError> {
        let mut state = TransferState::Validating;
        let result = self.process(caller, &request, &mut state);
        if result.is_err() && !state.is_committing() {
            state.advance(TransferState::Rejected);
        }
        Self::log_result(&request, state, &result);
        result
    }

    /// Small helper to log `execute` results
    fn log_result(
        request: &TransferRequest,
        state: TransferState,
        result: &Result<TransferRecord, TransferError>,
    ) {
        let from = request.from_account_id;
        let to = request.to_account_id;
        let amount = request.amount;
        match result {
            Ok(record) => {
                info!(transfer = record.id, from, to, amount = %amount, "transfer completed");
            }
            Err(e) if state.is_committing() => {
                error!(
                    from,
                    to,
                    amount = %amount,
                    stage = ?state,
                    reason = %e,
                    "transfer aborted, unit of work rolled back"
                );
            }
            Err(e) if e.is_rejection() => {
                info!(from, to, amount = %amount, reason = %e, "transfer rejected");
            }
            Err(e) => {
                error!(from, to, amount = %amount, reason = %e, "transfer failed");
            }
        }
    }

    /// Walk one request through the transfer states:
    /// - Reject non-positive amounts and self-transfers
    /// - Load both accounts, enforce ownership of the source when a caller is given
    /// - Check funds on the snapshot
    /// - Inside one unit of work: re-check funds, debit, credit, record
    fn process(
        &self,
        caller: Option<UserId>,
        request: &TransferRequest,
        state: &mut TransferState,
    ) -> Result<TransferRecord, TransferError> {
        let from = request.from_account_id;
        let to = request.to_account_id;
        let amount = request.amount;

        if !amount.is_positive() {
            return Err(TransferError::InvalidAmount(amount));
        }
        if from == to {
            return Err(TransferError::SameAccount(from));
        }

        let source = self.store.get_account(from)?;
        match caller {
            Some(caller) if source.owner_id != caller => {
                return Err(TransferError::NotOwner {
                    account: from,
                    caller,
                });
            }
            _ => {}
        }
        self.store.get_account(to)?;

        state.advance(TransferState::Checking);
        invariant::check_debit(&source, amount)?;

        let memo = request
            .memo
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);

        let record = self.store.atomically(&[from, to], |ledger| {
            // the snapshot above may be stale by now
            let source = ledger.account(from)?;
            let destination = ledger.account(to)?;
            invariant::check_debit(&source, amount)?;

            state.advance(TransferState::Debiting);
            ledger.adjust_balance(from, source.kind.debit_delta(amount))?;

            state.advance(TransferState::Crediting);
            ledger.adjust_balance(to, destination.kind.credit_delta(amount))?;

            state.advance(TransferState::Recording);
            let date = Utc::now();
            let record = ledger.append_transfer(NewTransfer {
                from_account_id: from,
                to_account_id: to,
                amount,
                memo,
                date,
                status: TransferStatus::Completed,
            })?;
            ledger.append_entry(NewEntry {
                account_id: from,
                amount: -amount,
                description: format!("Transfer to account {}", destination.account_number),
                category: TRANSFER_CATEGORY.to_string(),
                entry_type: EntryType::Transfer,
                date,
                counterparty_account_id: Some(to),
                transfer_id: Some(record.id),
            })?;
            ledger.append_entry(NewEntry {
                account_id: to,
                amount,
                description: format!("Transfer from account {}", source.account_number),
                category: TRANSFER_CATEGORY.to_string(),
                entry_type: EntryType::Transfer,
                date,
                counterparty_account_id: None,
                transfer_id: Some(record.id),
            })?;
            Ok::<_, TransferError>(record)
        })?;

        state.advance(TransferState::Completed);
        Ok(record)
    }
}
